//! Who to answer: per-agent map of senders awaiting a reply.
//!
//! Stored as `<dir>/<agent_id>.reply.json` so a separate `synapse reply`
//! invocation can find the sender's endpoint and task id.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::helpers::{lock_dir, read_json_file, unix_now_secs, write_json_atomic, DirLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub sender_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_uds_path: Option<String>,
    pub sender_task_id: Option<String>,
    /// Unix seconds; set on save.
    #[serde(default)]
    pub saved_at: f64,
}

impl ReplyTarget {
    pub fn new(sender_endpoint: Option<String>, sender_task_id: Option<String>) -> Self {
        Self {
            sender_endpoint,
            sender_uds_path: None,
            sender_task_id,
            saved_at: 0.0,
        }
    }
}

type TargetMap = BTreeMap<String, ReplyTarget>;

pub struct ReplyTargetStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl ReplyTargetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.reply.json"))
    }

    fn read_map(&self, agent_id: &str) -> TargetMap {
        let path = self.file_for(agent_id);
        match read_json_file::<TargetMap>(&path) {
            Ok(map) => map.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(target = "synapse::reply_target", path = %path.display(), error = %error, "treating unreadable reply targets as empty");
                TargetMap::new()
            }
        }
    }

    fn write_map(&self, agent_id: &str, map: &TargetMap) -> Result<()> {
        let path = self.file_for(agent_id);
        if map.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
            return Ok(());
        }
        write_json_atomic(&path, map)
    }

    fn lock_for_update(&self, agent_id: &str) -> Option<DirLock> {
        match lock_dir(&self.dir) {
            Ok(lock) => Some(lock),
            Err(error) => {
                tracing::warn!(target = "synapse::reply_target", agent_id = %agent_id, error = %error, "failed locking reply targets");
                None
            }
        }
    }

    /// Upsert the entry for `sender_id`, stamped with the current time.
    pub fn save(&self, agent_id: &str, sender_id: &str, target: ReplyTarget) -> Result<()> {
        let _guard = self.lock.lock();
        let _dir_lock = lock_dir(&self.dir)?;
        let mut map = self.read_map(agent_id);
        let mut target = target;
        target.saved_at = unix_now_secs();
        map.insert(sender_id.to_string(), target);
        self.write_map(agent_id, &map)?;
        tracing::debug!(target = "synapse::reply_target", agent_id = %agent_id, sender_id = %sender_id, "saved reply target");
        Ok(())
    }

    /// With a sender: that sender's entry. Without: the most recently saved.
    pub fn load(&self, agent_id: &str, sender_id: Option<&str>) -> Option<(String, ReplyTarget)> {
        let _guard = self.lock.lock();
        let map = self.read_map(agent_id);
        select(&map, sender_id).map(|(sender, target)| (sender.clone(), target.clone()))
    }

    pub fn list_targets(&self, agent_id: &str) -> Vec<String> {
        let _guard = self.lock.lock();
        self.read_map(agent_id).into_keys().collect()
    }

    /// Load then delete.
    pub fn pop(&self, agent_id: &str, sender_id: Option<&str>) -> Option<(String, ReplyTarget)> {
        let _guard = self.lock.lock();
        let _dir_lock = self.lock_for_update(agent_id)?;
        let mut map = self.read_map(agent_id);
        let sender = select(&map, sender_id).map(|(sender, _)| sender.clone())?;
        let target = map.remove(&sender)?;
        if let Err(error) = self.write_map(agent_id, &map) {
            tracing::warn!(target = "synapse::reply_target", agent_id = %agent_id, error = %error, "failed persisting reply targets");
        }
        Some((sender, target))
    }

    /// Remove entries older than `max_age`; returns how many went.
    pub fn cleanup(&self, agent_id: &str, max_age: Duration) -> usize {
        let _guard = self.lock.lock();
        let Some(_dir_lock) = self.lock_for_update(agent_id) else {
            return 0;
        };
        let mut map = self.read_map(agent_id);
        let cutoff = unix_now_secs() - max_age.as_secs_f64();
        let before = map.len();
        map.retain(|_, target| target.saved_at >= cutoff);
        let removed = before - map.len();
        if removed > 0 {
            if let Err(error) = self.write_map(agent_id, &map) {
                tracing::warn!(target = "synapse::reply_target", agent_id = %agent_id, error = %error, "failed persisting reply targets");
                return 0;
            }
        }
        removed
    }
}

fn select<'a>(map: &'a TargetMap, sender_id: Option<&str>) -> Option<(&'a String, &'a ReplyTarget)> {
    match sender_id {
        Some(sender) => map.get_key_value(sender),
        None => map
            .iter()
            .max_by(|(_, a), (_, b)| a.saved_at.total_cmp(&b.saved_at)),
    }
}
