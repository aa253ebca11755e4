//! File-backed directory of running agents.
//!
//! One JSON file per agent under the registry directory. Liveness is checked
//! lazily on read: dead entries are removed by whoever lists them next.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    helpers::{lock_dir, read_json_file, unix_now_secs, write_json_atomic},
    process::{SharedLiveness, SystemLiveness, DEFAULT_PORT_PROBE_TIMEOUT},
};

pub const STATUS_READY: &str = "READY";
pub const STATUS_PROCESSING: &str = "PROCESSING";
pub const STATUS_IDLE: &str = "IDLE";

pub const DEFAULT_TRANSPORT_RETENTION_SECS: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub port: u16,
    pub status: String,
    pub pid: u32,
    pub working_dir: String,
    pub endpoint: String,
    #[serde(default)]
    pub active_transport: Option<String>,
    #[serde(default)]
    pub last_transport: Option<String>,
    #[serde(default)]
    pub transport_updated_at: Option<f64>,
    #[serde(default)]
    pub registered_at: Option<String>,
}

impl AgentRecord {
    /// Record for the current process.
    pub fn new(agent_id: &str, agent_type: &str, port: u16, status: &str) -> Self {
        let working_dir = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        Self {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            port,
            status: status.to_string(),
            pid: std::process::id(),
            working_dir,
            endpoint: format!("http://localhost:{port}"),
            active_transport: None,
            last_transport: None,
            transport_updated_at: None,
            registered_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// `type-port` shorthand, the disambiguator shown to users.
    pub fn short_name(&self) -> String {
        format!("{}-{}", self.agent_type, self.port)
    }
}

pub fn make_agent_id(agent_type: &str, port: u16) -> String {
    format!("synapse-{agent_type}-{port}")
}

pub struct AgentRegistry {
    dir: PathBuf,
    liveness: SharedLiveness,
}

impl AgentRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_liveness(dir, SystemLiveness::shared())
    }

    pub fn with_liveness(dir: impl Into<PathBuf>, liveness: SharedLiveness) -> Self {
        Self {
            dir: dir.into(),
            liveness,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn liveness(&self) -> &SharedLiveness {
        &self.liveness
    }

    fn record_path(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.json"))
    }

    pub fn register(
        &self,
        agent_id: &str,
        agent_type: &str,
        port: u16,
        status: &str,
    ) -> Result<AgentRecord> {
        let record = AgentRecord::new(agent_id, agent_type, port, status);
        self.register_record(&record)?;
        Ok(record)
    }

    pub fn register_record(&self, record: &AgentRecord) -> Result<()> {
        write_json_atomic(&self.record_path(&record.agent_id), record)
            .with_context(|| format!("failed registering agent {}", record.agent_id))?;
        tracing::debug!(target = "synapse::registry", agent_id = %record.agent_id, port = record.port, "agent registered");
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        match read_json_file::<AgentRecord>(&self.record_path(agent_id)) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(target = "synapse::registry", agent_id = %agent_id, error = %error, "unreadable registry entry");
                None
            }
        }
    }

    /// Every stored record, live or not.
    pub fn list_agents(&self) -> HashMap<String, AgentRecord> {
        let mut agents = HashMap::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(target = "synapse::registry", dir = %self.dir.display(), error = %error, "failed listing registry");
                }
                return agents;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json_file::<AgentRecord>(&path) {
                Ok(Some(record)) => {
                    agents.insert(record.agent_id.clone(), record);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(target = "synapse::registry", path = %path.display(), error = %error, "skipping corrupt registry entry");
                }
            }
        }
        agents
    }

    pub fn unregister(&self, agent_id: &str) {
        match std::fs::remove_file(self.record_path(agent_id)) {
            Ok(()) => {
                tracing::debug!(target = "synapse::registry", agent_id = %agent_id, "agent unregistered")
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(target = "synapse::registry", agent_id = %agent_id, error = %error, "failed removing registry entry");
            }
        }
    }

    fn modify(&self, agent_id: &str, apply: impl FnOnce(&mut AgentRecord)) -> bool {
        let _lock = match lock_dir(&self.dir) {
            Ok(lock) => lock,
            Err(error) => {
                tracing::warn!(target = "synapse::registry", agent_id = %agent_id, error = %error, "failed locking registry");
                return false;
            }
        };
        let Some(mut record) = self.get(agent_id) else {
            return false;
        };
        apply(&mut record);
        match self.register_record(&record) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(target = "synapse::registry", agent_id = %agent_id, error = %error, "failed updating registry entry");
                false
            }
        }
    }

    pub fn update_status(&self, agent_id: &str, status: &str) -> bool {
        self.modify(agent_id, |record| record.status = status.to_string())
    }

    /// Set or clear the active transport. The timestamp is refreshed either way.
    pub fn update_transport(&self, agent_id: &str, transport: Option<&str>) -> bool {
        self.modify(agent_id, |record| {
            record.active_transport = transport.map(str::to_string);
            if let Some(value) = transport {
                record.last_transport = Some(value.to_string());
            }
            record.transport_updated_at = Some(unix_now_secs());
        })
    }

    pub fn get_transport_display(&self, agent_id: &str, retention_secs: f64) -> Option<String> {
        let record = self.get(agent_id)?;
        transport_display_at(&record, retention_secs, unix_now_secs())
    }

    /// Records whose process is alive and, unless busy, whose port answers.
    /// Failing entries are unregistered.
    pub fn get_live_agents(&self) -> HashMap<String, AgentRecord> {
        let mut live = self.list_agents();
        live.retain(|agent_id, record| {
            if self.is_live(record) {
                return true;
            }
            tracing::info!(target = "synapse::registry", agent_id = %agent_id, pid = record.pid, port = record.port, "removing dead agent");
            self.unregister(agent_id);
            false
        });
        live
    }

    fn is_live(&self, record: &AgentRecord) -> bool {
        if !self.liveness.is_process_alive(record.pid) {
            return false;
        }
        if record.status == STATUS_PROCESSING {
            return true;
        }
        self.liveness
            .is_port_open("localhost", record.port, DEFAULT_PORT_PROBE_TIMEOUT)
    }
}

pub(crate) fn transport_display_at(
    record: &AgentRecord,
    retention_secs: f64,
    now: f64,
) -> Option<String> {
    if let Some(active) = &record.active_transport {
        return Some(active.clone());
    }
    let updated_at = record.transport_updated_at?;
    if now - updated_at <= retention_secs {
        record.last_transport.clone()
    } else {
        None
    }
}
