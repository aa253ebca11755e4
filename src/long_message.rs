//! Overflow for messages too long to type into a terminal prompt.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};

use crate::{
    config::SynapseConfig,
    helpers::{current_timestamp_ms, floor_char_boundary, write_atomic, REPLY_EXPECTED_MARKER},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedMessage {
    Inline(String),
    File { path: PathBuf, reference: String },
}

impl PreparedMessage {
    /// Text to actually send.
    pub fn text(&self) -> &str {
        match self {
            Self::Inline(text) => text,
            Self::File { reference, .. } => reference,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LongMessageStore {
    dir: PathBuf,
    threshold: usize,
    ttl: Duration,
}

impl LongMessageStore {
    pub fn new(dir: impl Into<PathBuf>, threshold: usize, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            threshold,
            ttl,
        }
    }

    pub fn from_config(cfg: &SynapseConfig) -> Self {
        Self::new(
            cfg.long_message_dir.clone(),
            cfg.long_message_threshold,
            Duration::from_secs(cfg.long_message_ttl_secs),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Counted in characters; a message exactly at the threshold stays inline.
    pub fn needs_file_storage(&self, content: &str) -> bool {
        content.chars().count() > self.threshold
    }

    pub fn store(&self, content: &str, task_id: &str) -> Result<PathBuf> {
        let prefix = &task_id[..floor_char_boundary(task_id, 8)];
        let prefix: String = prefix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let path = self
            .dir
            .join(format!("{prefix}-{}.txt", current_timestamp_ms()));
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("failed storing long message for task {task_id}"))?;
        tracing::debug!(target = "synapse::long_message", path = %path.display(), chars = content.chars().count(), "stored long message");
        Ok(path)
    }

    pub fn format_reference(&self, path: &Path, response_expected: bool) -> String {
        let mut reference = format!(
            "[LONG MESSAGE - FILE ATTACHED] The full message is stored at {}. Read that file for the complete content.",
            path.display()
        );
        if response_expected {
            reference.push(' ');
            reference.push_str(REPLY_EXPECTED_MARKER);
        }
        reference
    }

    pub fn prepare(
        &self,
        content: &str,
        task_id: &str,
        response_expected: bool,
    ) -> Result<PreparedMessage> {
        if !self.needs_file_storage(content) {
            return Ok(PreparedMessage::Inline(content.to_string()));
        }
        self.cleanup_expired();
        let path = self.store(content, task_id)?;
        let reference = self.format_reference(&path, response_expected);
        Ok(PreparedMessage::File { path, reference })
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed reading long message {}", path.display()))
    }

    /// Delete stored messages older than the TTL; returns how many went.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_older_than(self.ttl, SystemTime::now())
    }

    fn cleanup_older_than(&self, ttl: Duration, now: SystemTime) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|meta| meta.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > ttl {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(error) => {
                        tracing::warn!(target = "synapse::long_message", path = %path.display(), error = %error, "failed removing expired message");
                    }
                }
            }
        }
        if removed > 0 {
            tracing::debug!(target = "synapse::long_message", removed, "expired long messages removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LongMessageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LongMessageStore::new(dir.path().join("messages"), 200, Duration::from_secs(3600));
        (dir, store)
    }

    #[test]
    fn threshold_boundary_counts_characters() {
        let (_dir, store) = store();
        assert!(!store.needs_file_storage(&"a".repeat(200)));
        assert!(store.needs_file_storage(&"a".repeat(201)));
        // 200 multibyte characters is still 200 characters.
        assert!(!store.needs_file_storage(&"é".repeat(200)));
    }

    #[test]
    fn stored_content_round_trips_and_reference_omits_it() {
        let (_dir, store) = store();
        let content = format!("{}\nline two ✓", "x".repeat(300));
        let prepared = store.prepare(&content, "0123456789abcdef", true).unwrap();

        let PreparedMessage::File { path, reference } = prepared else {
            panic!("expected file storage");
        };
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("01234567-"));
        assert_eq!(store.read(&path).unwrap(), content);
        assert!(!reference.contains(&content));
        assert!(reference.contains(&path.display().to_string()));
        assert!(reference.contains(REPLY_EXPECTED_MARKER));
    }

    #[test]
    fn short_messages_stay_inline() {
        let (_dir, store) = store();
        let prepared = store.prepare("hello", "task", false).unwrap();
        assert_eq!(prepared, PreparedMessage::Inline("hello".into()));
        assert_eq!(prepared.text(), "hello");
        let reference = store.format_reference(Path::new("/tmp/x.txt"), false);
        assert!(!reference.contains(REPLY_EXPECTED_MARKER));
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let (_dir, store) = store();
        let path = store.store(&"y".repeat(500), "task-1").unwrap();
        assert_eq!(store.cleanup_expired(), 0);
        assert!(path.exists());

        let later = SystemTime::now() + Duration::from_secs(7200);
        assert_eq!(store.cleanup_older_than(Duration::from_secs(3600), later), 1);
        assert!(!path.exists());
    }

    #[test]
    fn storing_sweeps_expired_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = LongMessageStore::new(dir.path().join("messages"), 10, Duration::ZERO);
        let PreparedMessage::File { path: old, .. } = store.prepare(&"a".repeat(50), "task-1", false).unwrap() else {
            panic!("expected file storage");
        };
        std::thread::sleep(Duration::from_millis(20));

        let PreparedMessage::File { path: fresh, .. } = store.prepare(&"b".repeat(50), "task-2", false).unwrap() else {
            panic!("expected file storage");
        };
        assert!(!old.exists());
        assert_eq!(store.read(&fresh).unwrap(), "b".repeat(50));
    }

    #[test]
    fn cleanup_of_missing_dir_is_zero() {
        let store = LongMessageStore::new("/nonexistent/synapse", 10, Duration::from_secs(1));
        assert_eq!(store.cleanup_expired(), 0);
    }
}
