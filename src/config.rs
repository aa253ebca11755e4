//! Layered configuration.
//!
//! Resolution order, later layers overriding only the keys they define:
//! defaults → user settings (`~/.synapse/settings.json`) → project settings
//! (`<project>/.synapse/settings.json`) → environment → explicit overrides.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;

use crate::compliance::ComplianceSettings;

pub const SETTINGS_DIR: &str = ".synapse";
pub const SETTINGS_FILE: &str = "settings.json";

pub const ENV_FILE_SAFETY_ENABLED: &str = "SYNAPSE_FILE_SAFETY_ENABLED";
pub const ENV_FILE_SAFETY_RETENTION_DAYS: &str = "SYNAPSE_FILE_SAFETY_RETENTION_DAYS";
pub const ENV_FILE_SAFETY_DB_PATH: &str = "SYNAPSE_FILE_SAFETY_DB_PATH";
pub const ENV_LONG_MESSAGE_DIR: &str = "SYNAPSE_LONG_MESSAGE_DIR";
pub const ENV_LONG_MESSAGE_THRESHOLD: &str = "SYNAPSE_LONG_MESSAGE_THRESHOLD";
pub const ENV_LONG_MESSAGE_TTL: &str = "SYNAPSE_LONG_MESSAGE_TTL";
pub const ENV_LOG_LEVEL: &str = "SYNAPSE_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "SYNAPSE_LOG_FILE";
pub const ENV_LOG_DIR: &str = "SYNAPSE_LOG_DIR";
pub const ENV_REGISTRY_DIR: &str = "SYNAPSE_REGISTRY_DIR";
pub const ENV_REPLY_TARGET_DIR: &str = "SYNAPSE_REPLY_TARGET_DIR";
pub const ENV_EXTERNAL_DIR: &str = "SYNAPSE_EXTERNAL_DIR";

pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_LONG_MESSAGE_THRESHOLD: usize = 200;
pub const DEFAULT_LONG_MESSAGE_TTL_SECS: u64 = 3600;

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SynapseConfig {
    pub file_safety_enabled: bool,
    pub file_safety_retention_days: i64,
    pub file_safety_db_path: PathBuf,
    pub long_message_dir: PathBuf,
    pub long_message_threshold: usize,
    pub long_message_ttl_secs: u64,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
    pub registry_dir: PathBuf,
    pub reply_target_dir: PathBuf,
    pub external_dir: PathBuf,
    pub compliance: ComplianceSettings,
}

/// A partial configuration. `None` fields leave lower layers untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub file_safety_enabled: Option<bool>,
    pub file_safety_retention_days: Option<i64>,
    pub file_safety_db_path: Option<PathBuf>,
    pub long_message_dir: Option<PathBuf>,
    pub long_message_threshold: Option<usize>,
    pub long_message_ttl_secs: Option<u64>,
    pub log_level: Option<String>,
    pub log_to_file: Option<bool>,
    pub log_dir: Option<PathBuf>,
    pub registry_dir: Option<PathBuf>,
    pub reply_target_dir: Option<PathBuf>,
    pub external_dir: Option<PathBuf>,
    pub compliance: Option<ComplianceSettings>,
}

/// On-disk shape of `settings.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default)]
    pub compliance: Option<ComplianceSettings>,
}

impl ConfigLayer {
    /// Build a layer from `SYNAPSE_*` style key/value pairs. Unknown keys and
    /// unparsable values are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                ENV_FILE_SAFETY_ENABLED => layer.file_safety_enabled = parse_flag(value),
                ENV_FILE_SAFETY_RETENTION_DAYS => {
                    layer.file_safety_retention_days = value.parse().ok()
                }
                ENV_FILE_SAFETY_DB_PATH => layer.file_safety_db_path = non_empty_path(value),
                ENV_LONG_MESSAGE_DIR => layer.long_message_dir = non_empty_path(value),
                ENV_LONG_MESSAGE_THRESHOLD => layer.long_message_threshold = value.parse().ok(),
                ENV_LONG_MESSAGE_TTL => layer.long_message_ttl_secs = value.parse().ok(),
                ENV_LOG_LEVEL => {
                    layer.log_level = Some(value.to_ascii_lowercase()).filter(|v| !v.is_empty())
                }
                ENV_LOG_FILE => layer.log_to_file = parse_flag(value),
                ENV_LOG_DIR => layer.log_dir = non_empty_path(value),
                ENV_REGISTRY_DIR => layer.registry_dir = non_empty_path(value),
                ENV_REPLY_TARGET_DIR => layer.reply_target_dir = non_empty_path(value),
                ENV_EXTERNAL_DIR => layer.external_dir = non_empty_path(value),
                _ => {}
            }
        }
        layer
    }

    /// Layer from the process environment.
    pub fn from_process_env() -> Self {
        Self::from_vars(std::env::vars().filter(|(key, _)| key.starts_with("SYNAPSE_")))
    }

    pub fn from_settings(settings: &SettingsFile) -> Self {
        let vars = settings.env.iter().filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((key.clone(), rendered))
        });
        let mut layer = Self::from_vars(vars);
        layer.compliance = settings.compliance.clone();
        layer
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &ConfigLayer) {
        fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        set(&mut self.file_safety_enabled, &other.file_safety_enabled);
        set(
            &mut self.file_safety_retention_days,
            &other.file_safety_retention_days,
        );
        set(&mut self.file_safety_db_path, &other.file_safety_db_path);
        set(&mut self.long_message_dir, &other.long_message_dir);
        set(&mut self.long_message_threshold, &other.long_message_threshold);
        set(&mut self.long_message_ttl_secs, &other.long_message_ttl_secs);
        set(&mut self.log_level, &other.log_level);
        set(&mut self.log_to_file, &other.log_to_file);
        set(&mut self.log_dir, &other.log_dir);
        set(&mut self.registry_dir, &other.registry_dir);
        set(&mut self.reply_target_dir, &other.reply_target_dir);
        set(&mut self.external_dir, &other.external_dir);
        match (&mut self.compliance, &other.compliance) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (slot @ None, Some(theirs)) => *slot = Some(theirs.clone()),
            _ => {}
        }
    }
}

impl SynapseConfig {
    /// Defaults for a project rooted at `project_root` with the given home.
    pub fn defaults(project_root: &Path, home: &Path) -> Self {
        Self {
            file_safety_enabled: false,
            file_safety_retention_days: DEFAULT_RETENTION_DAYS,
            file_safety_db_path: project_root.join(SETTINGS_DIR).join("file_safety.db"),
            long_message_dir: std::env::temp_dir().join("synapse-a2a").join("messages"),
            long_message_threshold: DEFAULT_LONG_MESSAGE_THRESHOLD,
            long_message_ttl_secs: DEFAULT_LONG_MESSAGE_TTL_SECS,
            log_level: "info".to_string(),
            log_to_file: false,
            log_dir: home.join(SETTINGS_DIR).join("logs"),
            registry_dir: home.join(".a2a").join("registry"),
            reply_target_dir: home.join(".a2a").join("reply"),
            external_dir: home.join(".a2a").join("external"),
            compliance: ComplianceSettings::default(),
        }
    }

    /// Pure resolver: apply the four optional layers over `defaults`.
    pub fn resolve(
        defaults: SynapseConfig,
        user: Option<&ConfigLayer>,
        project: Option<&ConfigLayer>,
        env: Option<&ConfigLayer>,
        explicit: Option<&ConfigLayer>,
    ) -> SynapseConfig {
        let mut merged = ConfigLayer::default();
        for layer in [user, project, env, explicit].into_iter().flatten() {
            merged.merge(layer);
        }

        let mut compliance = defaults.compliance;
        if let Some(layer) = &merged.compliance {
            compliance.merge(layer);
        }

        SynapseConfig {
            file_safety_enabled: merged
                .file_safety_enabled
                .unwrap_or(defaults.file_safety_enabled),
            file_safety_retention_days: merged
                .file_safety_retention_days
                .unwrap_or(defaults.file_safety_retention_days),
            file_safety_db_path: merged
                .file_safety_db_path
                .unwrap_or(defaults.file_safety_db_path),
            long_message_dir: merged.long_message_dir.unwrap_or(defaults.long_message_dir),
            long_message_threshold: merged
                .long_message_threshold
                .unwrap_or(defaults.long_message_threshold),
            long_message_ttl_secs: merged
                .long_message_ttl_secs
                .unwrap_or(defaults.long_message_ttl_secs),
            log_level: merged.log_level.unwrap_or(defaults.log_level),
            log_to_file: merged.log_to_file.unwrap_or(defaults.log_to_file),
            log_dir: merged.log_dir.unwrap_or(defaults.log_dir),
            registry_dir: merged.registry_dir.unwrap_or(defaults.registry_dir),
            reply_target_dir: merged.reply_target_dir.unwrap_or(defaults.reply_target_dir),
            external_dir: merged.external_dir.unwrap_or(defaults.external_dir),
            compliance,
        }
    }

    /// Read settings files and the environment for `project_root`.
    pub fn load(project_root: &Path, explicit: Option<&ConfigLayer>) -> SynapseConfig {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::load_with(project_root, &home, &ConfigLayer::from_process_env(), explicit)
    }

    /// `load` with the home directory and environment layer supplied.
    pub fn load_with(
        project_root: &Path,
        home: &Path,
        env: &ConfigLayer,
        explicit: Option<&ConfigLayer>,
    ) -> SynapseConfig {
        let user = read_settings(&settings_path(home)).map(|s| ConfigLayer::from_settings(&s));
        let project =
            read_settings(&settings_path(project_root)).map(|s| ConfigLayer::from_settings(&s));
        Self::resolve(
            Self::defaults(project_root, home),
            user.as_ref(),
            project.as_ref(),
            Some(env),
            explicit,
        )
    }
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Missing files read as `None`; malformed files are logged and skipped.
pub fn read_settings(path: &Path) -> Option<SettingsFile> {
    let body = match std::fs::read_to_string(path) {
        Ok(body) => body,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            tracing::warn!(target = "synapse::config", path = %path.display(), error = %error, "failed reading settings file");
            return None;
        }
    };
    match serde_json::from_str::<SettingsFile>(&body) {
        Ok(settings) => Some(settings),
        Err(error) => {
            tracing::warn!(target = "synapse::config", path = %path.display(), error = %error, "ignoring malformed settings file");
            None
        }
    }
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use serde_json::json;

    use super::*;
    use crate::compliance::ComplianceMode;

    fn defaults() -> SynapseConfig {
        SynapseConfig::defaults(Path::new("/work/project"), Path::new("/home/dev"))
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SynapseConfig::resolve(defaults(), None, None, None, None);
        assert!(!cfg.file_safety_enabled);
        assert_eq!(cfg.file_safety_retention_days, 30);
        assert_eq!(cfg.long_message_threshold, 200);
        assert_eq!(cfg.long_message_ttl_secs, 3600);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(
            cfg.file_safety_db_path,
            PathBuf::from("/work/project/.synapse/file_safety.db")
        );
        assert_eq!(cfg.registry_dir, PathBuf::from("/home/dev/.a2a/registry"));
        assert_eq!(cfg.compliance.mode_for("claude"), ComplianceMode::Manual);
    }

    #[test]
    fn later_layers_override_only_their_keys() {
        let user = ConfigLayer::from_vars([
            (ENV_FILE_SAFETY_ENABLED, "true"),
            (ENV_LONG_MESSAGE_THRESHOLD, "500"),
        ]);
        let project = ConfigLayer::from_vars([(ENV_LONG_MESSAGE_THRESHOLD, "300")]);
        let env = ConfigLayer::from_vars([(ENV_LOG_LEVEL, "DEBUG")]);
        let explicit = ConfigLayer {
            log_level: Some("trace".into()),
            ..Default::default()
        };

        let cfg = SynapseConfig::resolve(
            defaults(),
            Some(&user),
            Some(&project),
            Some(&env),
            Some(&explicit),
        );
        assert!(cfg.file_safety_enabled);
        assert_eq!(cfg.long_message_threshold, 300);
        assert_eq!(cfg.log_level, "trace");
        assert_eq!(cfg.file_safety_retention_days, 30);
    }

    #[test]
    fn env_beats_project_settings() {
        let project = ConfigLayer::from_vars([(ENV_FILE_SAFETY_RETENTION_DAYS, "7")]);
        let env = ConfigLayer::from_vars([(ENV_FILE_SAFETY_RETENTION_DAYS, "90")]);
        let cfg = SynapseConfig::resolve(defaults(), None, Some(&project), Some(&env), None);
        assert_eq!(cfg.file_safety_retention_days, 90);
    }

    #[test]
    fn settings_file_env_map_accepts_non_string_values() {
        let settings: SettingsFile = serde_json::from_value(json!({
            "env": {
                "SYNAPSE_FILE_SAFETY_ENABLED": true,
                "SYNAPSE_LONG_MESSAGE_TTL": 60,
                "UNRELATED": "x"
            },
            "compliance": { "defaultMode": "prefill" }
        }))
        .unwrap();
        let layer = ConfigLayer::from_settings(&settings);
        assert_eq!(layer.file_safety_enabled, Some(true));
        assert_eq!(layer.long_message_ttl_secs, Some(60));
        assert_eq!(
            layer.compliance.as_ref().and_then(|c| c.default_mode),
            Some(ComplianceMode::Prefill)
        );
    }

    #[test]
    fn project_compliance_merges_over_user() {
        let user = ConfigLayer {
            compliance: Some(
                serde_json::from_value(json!({
                    "defaultMode": "auto",
                    "providers": { "gemini": { "mode": "prefill" } }
                }))
                .unwrap(),
            ),
            ..Default::default()
        };
        let project = ConfigLayer {
            compliance: Some(
                serde_json::from_value(json!({ "providers": { "codex": { "mode": "manual" } } }))
                    .unwrap(),
            ),
            ..Default::default()
        };
        let cfg = SynapseConfig::resolve(defaults(), Some(&user), Some(&project), None, None);
        assert_eq!(cfg.compliance.mode_for("claude"), ComplianceMode::Auto);
        assert_eq!(cfg.compliance.mode_for("gemini"), ComplianceMode::Prefill);
        assert_eq!(cfg.compliance.mode_for("codex"), ComplianceMode::Manual);
    }

    #[test]
    fn malformed_settings_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_settings(&path).is_none());
        assert!(read_settings(&dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn load_reads_project_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        let project = dir.path().join("project");
        for (root, body) in [
            (&home, r#"{"env": {"SYNAPSE_LONG_MESSAGE_TTL": "999", "SYNAPSE_LONG_MESSAGE_THRESHOLD": "300"}}"#),
            (&project, r#"{"env": {"SYNAPSE_LONG_MESSAGE_TTL": "120"}}"#),
        ] {
            std::fs::create_dir_all(root.join(SETTINGS_DIR)).unwrap();
            std::fs::write(settings_path(root), body).unwrap();
        }
        let explicit = ConfigLayer {
            long_message_threshold: Some(42),
            ..Default::default()
        };

        let cfg = SynapseConfig::load_with(&project, &home, &ConfigLayer::default(), Some(&explicit));
        assert_eq!(cfg.long_message_ttl_secs, 120);
        assert_eq!(cfg.long_message_threshold, 42);
        assert_eq!(
            cfg.file_safety_db_path,
            project.join(".synapse").join("file_safety.db")
        );

        let cfg = SynapseConfig::load_with(&project, &home, &ConfigLayer::default(), None);
        assert_eq!(cfg.long_message_threshold, 300);
    }

    #[test]
    fn flags_parse_common_spellings() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
