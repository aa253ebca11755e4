//! Compliance modes gate which automated actions may run without a human
//! in the loop.
//!
//! The mode for a provider resolves as `providers[provider].mode`, then the
//! configured `defaultMode`, then `manual`.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceMode {
    #[default]
    Manual,
    Prefill,
    Auto,
}

impl ComplianceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Prefill => "prefill",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for ComplianceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown compliance mode '{0}' (expected manual, prefill or auto)")]
pub struct UnknownMode(pub String);

impl FromStr for ComplianceMode {
    type Err = UnknownMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "prefill" => Ok(Self::Prefill),
            "auto" => Ok(Self::Auto),
            _ => Err(UnknownMode(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    InjectInput,
    SubmitInput,
    AutoConfirm,
    RouteOutput,
    ExecTool,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::InjectInput,
        ActionType::SubmitInput,
        ActionType::AutoConfirm,
        ActionType::RouteOutput,
        ActionType::ExecTool,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InjectInput => "INJECT_INPUT",
            Self::SubmitInput => "SUBMIT_INPUT",
            Self::AutoConfirm => "AUTO_CONFIRM",
            Self::RouteOutput => "ROUTE_OUTPUT",
            Self::ExecTool => "EXEC_TOOL",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A denied action at the point of execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{action} blocked by compliance mode '{mode}'")]
pub struct ComplianceBlocked {
    pub mode: ComplianceMode,
    pub action: ActionType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCompliance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ComplianceMode>,
}

/// The `compliance` block of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<ComplianceMode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, ProviderCompliance>,
}

impl ComplianceSettings {
    /// Overlay `other` on top of `self`; keys `other` defines win.
    pub fn merge(&mut self, other: &ComplianceSettings) {
        if other.default_mode.is_some() {
            self.default_mode = other.default_mode;
        }
        for (provider, override_) in &other.providers {
            let entry = self.providers.entry(provider.clone()).or_default();
            if override_.mode.is_some() {
                entry.mode = override_.mode;
            }
        }
    }

    pub fn mode_for(&self, provider: &str) -> ComplianceMode {
        self.providers
            .get(&provider.to_ascii_lowercase())
            .and_then(|p| p.mode)
            .or(self.default_mode)
            .unwrap_or_default()
    }
}

/// Resolved, stateless permission check for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEngine {
    mode: ComplianceMode,
}

impl PolicyEngine {
    pub fn new(mode: ComplianceMode) -> Self {
        Self { mode }
    }

    pub fn for_provider(settings: &ComplianceSettings, provider: &str) -> Self {
        Self::new(settings.mode_for(provider))
    }

    pub fn mode(&self) -> ComplianceMode {
        self.mode
    }

    pub fn check(&self, action: ActionType) -> Decision {
        let allowed = match (self.mode, action) {
            (ComplianceMode::Auto, _) => true,
            (ComplianceMode::Prefill, ActionType::InjectInput) => true,
            // EXEC_TOOL follows SUBMIT_INPUT in prefill
            (ComplianceMode::Prefill, _) => false,
            (ComplianceMode::Manual, _) => false,
        };
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    pub fn require(&self, action: ActionType) -> Result<(), ComplianceBlocked> {
        match self.check(action) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(ComplianceBlocked {
                mode: self.mode,
                action,
            }),
        }
    }
}

/// Human-readable summary of the resolved compliance settings.
pub fn render_banner(settings: &ComplianceSettings) -> String {
    let default_mode = settings.default_mode.unwrap_or_default();
    let mut out = format!("Compliance mode: {default_mode}");
    let overrides: Vec<String> = settings
        .providers
        .iter()
        .filter_map(|(provider, cfg)| cfg.mode.map(|mode| format!("{provider}={mode}")))
        .collect();
    if !overrides.is_empty() {
        out.push_str(&format!(" (overrides: {})", overrides.join(", ")));
    }
    let hint = match default_mode {
        ComplianceMode::Manual => "messages are copied for you to paste; nothing is typed automatically",
        ComplianceMode::Prefill => "messages are typed into the prompt and wait for your Enter",
        ComplianceMode::Auto => "messages are typed and submitted automatically",
    };
    out.push('\n');
    out.push_str(hint);
    out
}
