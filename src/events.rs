use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::SynapseConfig;

pub const LOG_FILE_NAME: &str = "synapse.log";

fn build_filter(level: &str) -> EnvFilter {
    // RUST_LOG wins over the configured level when set.
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn log_file_path(cfg: &SynapseConfig) -> Option<PathBuf> {
    cfg.log_to_file.then(|| cfg.log_dir.join(LOG_FILE_NAME))
}

pub fn init_logging(cfg: &SynapseConfig) -> Result<()> {
    let filter = build_filter(&cfg.log_level);

    if let Some(path) = log_file_path(cfg) {
        std::fs::create_dir_all(&cfg.log_dir)
            .with_context(|| format!("failed to create log dir {}", cfg.log_dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        tracing::debug!(target = "synapse::logging", file = %path.display(), "file logging enabled");
        return Ok(());
    }

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Writes one JSON line per event to stderr when enabled.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    json_output: bool,
}

impl EventEmitter {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    pub fn enabled(&self) -> bool {
        self.json_output
    }

    pub fn emit<T: Serialize>(&self, event_type: &str, payload: T) {
        if !self.json_output {
            return;
        }

        let line = json!({
            "ts": Utc::now().to_rfc3339(),
            "type": event_type,
            "payload": payload,
        });

        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{log_file_path, EventEmitter, LOG_FILE_NAME};
    use crate::config::SynapseConfig;
    use serde_json::json;

    #[test]
    fn emit_disabled_is_noop() {
        let emitter = EventEmitter::new(false);
        assert!(!emitter.enabled());
        emitter.emit("task_status", json!({"task_id": "t1"}));
    }

    #[test]
    fn emit_enabled_no_panic() {
        let emitter = EventEmitter::new(true);
        emitter.emit("task_status", json!({"task_id": "t1", "state": "working"}));
        emitter.emit("agent_registered", "plain string payload");
        emitter.emit("lock_count", 42);
    }

    #[test]
    fn log_file_only_when_enabled() {
        let mut cfg = SynapseConfig::defaults(Path::new("/p"), Path::new("/home/u"));
        assert!(log_file_path(&cfg).is_none());
        cfg.log_to_file = true;
        assert_eq!(
            log_file_path(&cfg).unwrap(),
            Path::new("/home/u/.synapse/logs").join(LOG_FILE_NAME)
        );
    }
}
