//! Cross-agent file locks backed by SQLite.
//!
//! A lock is keyed by the normalized absolute path. Locks whose holder PID is
//! no longer running are stale: they never block another agent and are
//! deleted whenever a read or acquire runs into them. Rows without a PID
//! (written by older schemas) are never considered stale.

use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

use crate::{
    config::SynapseConfig,
    process::{SharedLiveness, SystemLiveness},
};

pub const DEFAULT_LOCK_DURATION_SECS: i64 = 300;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS file_locks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    agent_name TEXT NOT NULL,
    agent_id TEXT,
    agent_type TEXT,
    pid INTEGER,
    task_id TEXT,
    locked_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    intent TEXT
);
CREATE TABLE IF NOT EXISTS file_modifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('CREATE', 'MODIFY', 'DELETE')),
    intent TEXT,
    affected_lines TEXT,
    timestamp TEXT NOT NULL,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_modifications_file_path ON file_modifications(file_path);
CREATE INDEX IF NOT EXISTS idx_modifications_task_id ON file_modifications(task_id);
CREATE INDEX IF NOT EXISTS idx_modifications_timestamp ON file_modifications(timestamp);
CREATE INDEX IF NOT EXISTS idx_modifications_agent_name ON file_modifications(agent_name);
";

/// Columns added after the first release of the lock table.
const LOCK_MIGRATIONS: [(&str, &str); 3] = [
    ("agent_id", "TEXT"),
    ("agent_type", "TEXT"),
    ("pid", "INTEGER"),
];

const LOCK_COLUMNS: &str =
    "id, file_path, agent_name, COALESCE(agent_id, agent_name), agent_type, pid, task_id, locked_at, expires_at, intent";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileSafetyError {
    #[error("file safety database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for FileSafetyError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Database(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockOutcome {
    Acquired {
        expires_at: Option<DateTime<Utc>>,
    },
    Renewed {
        expires_at: Option<DateTime<Utc>>,
    },
    AlreadyLocked {
        holder: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Failed {
        error: String,
    },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Acquired { .. } | Self::Renewed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub file_path: String,
    pub agent_id: String,
    pub agent_type: Option<String>,
    pub task_id: Option<String>,
    pub duration_secs: i64,
    pub intent: Option<String>,
    /// Defaults to the calling process.
    pub pid: Option<u32>,
}

impl LockRequest {
    pub fn new(file_path: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            agent_id: agent_id.into(),
            agent_type: None,
            task_id: None,
            duration_secs: DEFAULT_LOCK_DURATION_SECS,
            intent: None,
            pid: None,
        }
    }

    pub fn agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn duration_secs(mut self, secs: i64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub id: i64,
    pub file_path: String,
    pub agent_name: String,
    pub agent_id: String,
    pub agent_type: Option<String>,
    pub pid: Option<u32>,
    pub task_id: Option<String>,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LockFilter {
    /// Holder id; matches `agent_name` for legacy rows.
    pub agent_id: Option<String>,
    pub agent_type: Option<String>,
    pub pid: Option<u32>,
    pub include_stale: bool,
}

impl LockFilter {
    fn matches(&self, lock: &LockInfo) -> bool {
        self.agent_id
            .as_ref()
            .map_or(true, |id| &lock.agent_id == id || &lock.agent_name == id)
            && self
                .agent_type
                .as_ref()
                .map_or(true, |t| lock.agent_type.as_ref() == Some(t))
            && self.pid.map_or(true, |pid| lock.pid == Some(pid))
    }
}

pub(crate) struct Store {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) liveness: SharedLiveness,
    db_path: PathBuf,
}

/// Lock table plus modification log. Construct with [`FileSafetyManager::disabled`]
/// to turn every operation into a success-shaped no-op.
pub struct FileSafetyManager {
    pub(crate) store: Option<Store>,
}

impl FileSafetyManager {
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn from_config(cfg: &SynapseConfig) -> Result<Self, FileSafetyError> {
        if !cfg.file_safety_enabled {
            return Ok(Self::disabled());
        }
        Self::open(&cfg.file_safety_db_path, cfg.file_safety_retention_days)
    }

    pub fn open(db_path: &Path, retention_days: i64) -> Result<Self, FileSafetyError> {
        Self::open_with_liveness(db_path, retention_days, SystemLiveness::shared())
    }

    pub fn open_with_liveness(
        db_path: &Path,
        retention_days: i64,
        liveness: SharedLiveness,
    ) -> Result<Self, FileSafetyError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                FileSafetyError::Database(format!(
                    "failed creating {}: {error}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        migrate_lock_columns(&conn)?;

        let manager = Self {
            store: Some(Store {
                conn: Mutex::new(conn),
                liveness,
                db_path: db_path.to_path_buf(),
            }),
        };
        if retention_days > 0 {
            if let Err(error) = manager.purge_modifications_older_than(retention_days) {
                tracing::debug!(target = "synapse::file_safety", error = %error, "startup retention sweep skipped");
            }
        }
        tracing::debug!(target = "synapse::file_safety", db = %db_path.display(), "file safety enabled");
        Ok(manager)
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.store.as_ref().map(|store| store.db_path.as_path())
    }

    pub fn acquire_lock(&self, request: &LockRequest) -> LockOutcome {
        let Some(store) = &self.store else {
            return LockOutcome::Acquired { expires_at: None };
        };
        let path = normalize_path(&request.file_path);
        match store.acquire(&path, request) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", file = %path, agent_id = %request.agent_id, error = %error, "lock acquisition failed");
                LockOutcome::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    /// True only when a lock held by exactly `agent_id` was removed.
    pub fn release_lock(&self, file_path: &str, agent_id: &str) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        let path = normalize_path(file_path);
        let result = store.conn.lock().execute(
            "DELETE FROM file_locks WHERE file_path = ?1 AND COALESCE(agent_id, agent_name) = ?2",
            params![path, agent_id],
        );
        match result {
            Ok(rows) => rows > 0,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", file = %path, error = %error, "lock release failed");
                false
            }
        }
    }

    pub fn force_unlock(&self, file_path: &str) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        let path = normalize_path(file_path);
        match store
            .conn
            .lock()
            .execute("DELETE FROM file_locks WHERE file_path = ?1", params![path])
        {
            Ok(rows) => {
                if rows > 0 {
                    tracing::info!(target = "synapse::file_safety", file = %path, "lock force-released");
                }
                rows > 0
            }
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", file = %path, error = %error, "force unlock failed");
                false
            }
        }
    }

    /// Current live lock on `file_path`. Expired and stale rows are removed
    /// and read as `None`; a storage failure is an error, never "unlocked".
    pub fn check_lock(&self, file_path: &str) -> Result<Option<LockInfo>, FileSafetyError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let path = normalize_path(file_path);
        Ok(store.check(&path)?)
    }

    /// Storage errors count as locked.
    pub fn is_locked_by_other(&self, file_path: &str, agent_id: &str) -> bool {
        match self.check_lock(file_path) {
            Ok(Some(lock)) => lock.agent_id != agent_id,
            Ok(None) => false,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", file = %file_path, error = %error, "treating file as locked");
                true
            }
        }
    }

    pub fn list_locks(&self, filter: &LockFilter) -> Vec<LockInfo> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.unexpired_locks() {
            Ok(locks) => locks
                .into_iter()
                .filter(|lock| filter.include_stale || !store.is_stale(lock.pid))
                .filter(|lock| filter.matches(lock))
                .collect(),
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", error = %error, "listing locks failed");
                Vec::new()
            }
        }
    }

    pub fn cleanup_expired_locks(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        match store.conn.lock().execute(
            "DELETE FROM file_locks WHERE expires_at <= ?1",
            params![format_ts(Utc::now())],
        ) {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", error = %error, "expired lock cleanup failed");
                0
            }
        }
    }

    /// Locks whose holder process is gone. Expired rows are included.
    pub fn get_stale_locks(&self) -> Vec<LockInfo> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.all_locks() {
            Ok(locks) => locks
                .into_iter()
                .filter(|lock| store.is_stale(lock.pid))
                .collect(),
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", error = %error, "listing stale locks failed");
                Vec::new()
            }
        }
    }

    pub fn cleanup_stale_locks(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let stale = self.get_stale_locks();
        if stale.is_empty() {
            return 0;
        }
        let conn = store.conn.lock();
        let mut removed = 0;
        for lock in &stale {
            match conn.execute("DELETE FROM file_locks WHERE id = ?1", params![lock.id]) {
                Ok(rows) => removed += rows,
                Err(error) => {
                    tracing::warn!(target = "synapse::file_safety", file = %lock.file_path, error = %error, "stale lock cleanup failed");
                }
            }
        }
        if removed > 0 {
            tracing::info!(target = "synapse::file_safety", removed, "reclaimed stale locks");
        }
        removed
    }
}

impl Store {
    fn acquire(&self, path: &str, request: &LockRequest) -> rusqlite::Result<LockOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        tx.execute(
            "DELETE FROM file_locks WHERE expires_at <= ?1",
            params![format_ts(now)],
        )?;

        let existing: Option<(i64, String, Option<i64>, String)> = tx
            .query_row(
                "SELECT id, COALESCE(agent_id, agent_name), pid, expires_at FROM file_locks WHERE file_path = ?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let pid = request.pid.unwrap_or_else(std::process::id);
        let expires_at = now + chrono::Duration::seconds(request.duration_secs);

        let outcome = match existing {
            Some((id, holder, _, _)) if holder == request.agent_id => {
                tx.execute(
                    "UPDATE file_locks SET expires_at = ?1, intent = ?2, task_id = ?3, pid = ?4, agent_type = COALESCE(?5, agent_type) WHERE id = ?6",
                    params![
                        format_ts(expires_at),
                        request.intent,
                        request.task_id,
                        pid,
                        request.agent_type,
                        id
                    ],
                )?;
                LockOutcome::Renewed {
                    expires_at: Some(expires_at),
                }
            }
            Some((_, holder, holder_pid, holder_expiry)) if !self.is_stale_raw(holder_pid) => {
                LockOutcome::AlreadyLocked {
                    holder,
                    expires_at: parse_ts(&holder_expiry),
                }
            }
            existing => {
                if let Some((id, holder, holder_pid, _)) = existing {
                    tracing::info!(target = "synapse::file_safety", file = %path, holder = %holder, pid = ?holder_pid, "reclaiming lock from dead process");
                    tx.execute("DELETE FROM file_locks WHERE id = ?1", params![id])?;
                }
                tx.execute(
                    "INSERT INTO file_locks (file_path, agent_name, agent_id, agent_type, pid, task_id, locked_at, expires_at, intent)
                     VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        path,
                        request.agent_id,
                        request.agent_type,
                        pid,
                        request.task_id,
                        format_ts(now),
                        format_ts(expires_at),
                        request.intent
                    ],
                )?;
                LockOutcome::Acquired {
                    expires_at: Some(expires_at),
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn check(&self, path: &str) -> rusqlite::Result<Option<LockInfo>> {
        let conn = self.conn.lock();
        let lock = conn
            .query_row(
                &format!("SELECT {LOCK_COLUMNS} FROM file_locks WHERE file_path = ?1"),
                params![path],
                scan_lock,
            )
            .optional()?;
        let Some(lock) = lock else {
            return Ok(None);
        };
        if lock.expires_at <= Utc::now() || self.is_stale(lock.pid) {
            conn.execute("DELETE FROM file_locks WHERE id = ?1", params![lock.id])?;
            return Ok(None);
        }
        Ok(Some(lock))
    }

    fn all_locks(&self) -> rusqlite::Result<Vec<LockInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCK_COLUMNS} FROM file_locks ORDER BY locked_at ASC"
        ))?;
        let rows = stmt.query_map([], scan_lock)?;
        rows.collect()
    }

    fn unexpired_locks(&self) -> rusqlite::Result<Vec<LockInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCK_COLUMNS} FROM file_locks WHERE expires_at > ?1 ORDER BY locked_at ASC"
        ))?;
        let rows = stmt.query_map(params![format_ts(Utc::now())], scan_lock)?;
        rows.collect()
    }

    fn is_stale(&self, pid: Option<u32>) -> bool {
        pid.is_some_and(|pid| !self.liveness.is_process_alive(pid))
    }

    fn is_stale_raw(&self, pid: Option<i64>) -> bool {
        match pid {
            None => false,
            Some(raw) => u32::try_from(raw).map_or(true, |pid| self.is_stale(Some(pid))),
        }
    }
}

fn migrate_lock_columns(conn: &Connection) -> rusqlite::Result<()> {
    let existing: Vec<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(file_locks)")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    let mut added = Vec::new();
    for (column, sql_type) in LOCK_MIGRATIONS {
        if !existing.iter().any(|name| name == column) {
            conn.execute_batch(&format!(
                "ALTER TABLE file_locks ADD COLUMN {column} {sql_type};"
            ))?;
            added.push(column);
        }
    }
    if !added.is_empty() {
        conn.execute(
            "UPDATE file_locks SET agent_id = agent_name WHERE agent_id IS NULL",
            [],
        )?;
        tracing::info!(target = "synapse::file_safety", columns = ?added, "migrated file_locks schema");
    }
    Ok(())
}

fn scan_lock(row: &Row) -> rusqlite::Result<LockInfo> {
    let pid: Option<i64> = row.get(5)?;
    Ok(LockInfo {
        id: row.get(0)?,
        file_path: row.get(1)?,
        agent_name: row.get(2)?,
        agent_id: row.get(3)?,
        agent_type: row.get(4)?,
        pid: pid.and_then(|raw| u32::try_from(raw).ok()),
        task_id: row.get(6)?,
        locked_at: ts_column(row, 7)?,
        expires_at: ts_column(row, 8)?,
        intent: row.get(9)?,
    })
}

pub(crate) fn ts_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp '{raw}'").into(),
        )
    })
}

/// Fixed-width UTC text, so lexical order is chronological order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        })
}

/// Absolute path with `~` expanded and `.`/`..` folded lexically.
pub fn normalize_path(raw: &str) -> String {
    let expanded = if raw == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw))
    } else if let Some(rest) = raw.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw))
    } else {
        PathBuf::from(raw)
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.display().to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::FileSafetyManager;
    use crate::process::testing::FakeLiveness;

    pub(crate) fn manager() -> (tempfile::TempDir, FileSafetyManager, Arc<FakeLiveness>) {
        let dir = tempfile::tempdir().unwrap();
        let liveness = Arc::new(FakeLiveness::default());
        let manager = FileSafetyManager::open_with_liveness(
            &dir.path().join(".synapse").join("file_safety.db"),
            30,
            liveness.clone(),
        )
        .unwrap();
        (dir, manager, liveness)
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::{params, Connection};

    use super::test_support::manager;
    use super::*;

    const DEAD_PID: u32 = 424_242;

    #[test]
    fn contention_then_release() {
        let (_dir, fs, _) = manager();
        let path = "/work/src/main.rs";

        let first = fs.acquire_lock(&LockRequest::new(path, "claude").intent("refactor"));
        assert!(matches!(first, LockOutcome::Acquired { expires_at: Some(_) }));

        match fs.acquire_lock(&LockRequest::new(path, "gemini")) {
            LockOutcome::AlreadyLocked { holder, expires_at } => {
                assert_eq!(holder, "claude");
                assert!(expires_at.is_some());
            }
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }

        assert!(!fs.release_lock(path, "gemini"));
        assert!(fs.release_lock(path, "claude"));
        assert!(fs.check_lock(path).unwrap().is_none());
        assert!(!fs.release_lock(path, "claude"));
    }

    #[test]
    fn same_agent_renews_and_updates_intent() {
        let (_dir, fs, _) = manager();
        let path = "/work/a.rs";
        fs.acquire_lock(&LockRequest::new(path, "claude").intent("first"));
        let renewed = fs.acquire_lock(
            &LockRequest::new(path, "claude")
                .intent("second")
                .task_id("t-2")
                .duration_secs(600),
        );
        assert!(matches!(renewed, LockOutcome::Renewed { .. }));

        let lock = fs.check_lock(path).unwrap().unwrap();
        assert_eq!(lock.intent.as_deref(), Some("second"));
        assert_eq!(lock.task_id.as_deref(), Some("t-2"));
        assert!(lock.expires_at > Utc::now() + chrono::Duration::seconds(500));
    }

    #[test]
    fn stale_lock_is_invisible_and_reclaimable() {
        let (_dir, fs, liveness) = manager();
        let path = "/work/b.rs";
        fs.acquire_lock(&LockRequest::new(path, "crashed").pid(DEAD_PID));
        liveness.kill(DEAD_PID);

        assert!(!fs.is_locked_by_other(path, "gemini"));
        let outcome = fs.acquire_lock(&LockRequest::new(path, "gemini"));
        assert!(matches!(outcome, LockOutcome::Acquired { .. }));
        assert_eq!(fs.check_lock(path).unwrap().unwrap().agent_id, "gemini");
    }

    #[test]
    fn check_lock_deletes_stale_rows() {
        let (_dir, fs, liveness) = manager();
        fs.acquire_lock(&LockRequest::new("/work/c.rs", "crashed").pid(DEAD_PID));
        liveness.kill(DEAD_PID);

        assert!(fs.check_lock("/work/c.rs").unwrap().is_none());
        assert!(fs.list_locks(&LockFilter { include_stale: true, ..Default::default() }).is_empty());
    }

    #[test]
    fn stale_sweep_counts_exactly() {
        let (_dir, fs, liveness) = manager();
        assert!(fs.get_stale_locks().is_empty());

        fs.acquire_lock(&LockRequest::new("/w/1", "a").pid(DEAD_PID));
        fs.acquire_lock(&LockRequest::new("/w/2", "b").pid(DEAD_PID + 1));
        fs.acquire_lock(&LockRequest::new("/w/3", "c"));
        assert!(fs.get_stale_locks().is_empty());

        liveness.kill(DEAD_PID);
        liveness.kill(DEAD_PID + 1);
        assert_eq!(fs.get_stale_locks().len(), 2);
        assert_eq!(fs.list_locks(&LockFilter::default()).len(), 1);
        assert_eq!(
            fs.list_locks(&LockFilter { include_stale: true, ..Default::default() }).len(),
            3
        );

        assert_eq!(fs.cleanup_stale_locks(), 2);
        assert_eq!(fs.cleanup_stale_locks(), 0);
        assert_eq!(fs.list_locks(&LockFilter::default()).len(), 1);
    }

    #[test]
    fn released_locks_leave_no_stale_entries() {
        let (_dir, fs, _) = manager();
        fs.acquire_lock(&LockRequest::new("/w/x", "a"));
        assert!(fs.release_lock("/w/x", "a"));
        assert!(fs.get_stale_locks().is_empty());
        assert_eq!(fs.cleanup_stale_locks(), 0);
    }

    #[test]
    fn expired_locks_are_swept() {
        let (_dir, fs, _) = manager();
        fs.acquire_lock(&LockRequest::new("/w/old", "a").duration_secs(-1));
        fs.acquire_lock(&LockRequest::new("/w/new", "a"));
        assert_eq!(fs.list_locks(&LockFilter::default()).len(), 1);
        assert_eq!(fs.cleanup_expired_locks(), 1);
        assert_eq!(fs.cleanup_expired_locks(), 0);
    }

    #[test]
    fn list_filters_by_agent_type_and_pid() {
        let (_dir, fs, _) = manager();
        fs.acquire_lock(&LockRequest::new("/w/1", "synapse-claude-8100").agent_type("claude").pid(std::process::id()));
        fs.acquire_lock(&LockRequest::new("/w/2", "synapse-gemini-8110").agent_type("gemini").pid(7));

        let by_agent = fs.list_locks(&LockFilter {
            agent_id: Some("synapse-claude-8100".into()),
            ..Default::default()
        });
        assert_eq!(by_agent.len(), 1);
        let by_type = fs.list_locks(&LockFilter {
            agent_type: Some("gemini".into()),
            ..Default::default()
        });
        assert_eq!(by_type[0].file_path, "/w/2");
        let by_pid = fs.list_locks(&LockFilter {
            pid: Some(7),
            ..Default::default()
        });
        assert_eq!(by_pid.len(), 1);
    }

    #[test]
    fn force_unlock_ignores_holder() {
        let (_dir, fs, _) = manager();
        fs.acquire_lock(&LockRequest::new("/w/f", "a"));
        assert!(fs.force_unlock("/w/f"));
        assert!(!fs.force_unlock("/w/f"));
    }

    #[test]
    fn paths_are_normalized_before_keying() {
        let (_dir, fs, _) = manager();
        fs.acquire_lock(&LockRequest::new("/w/src/../src/./lib.rs", "a"));
        let lock = fs.check_lock("/w/src/lib.rs").unwrap().unwrap();
        assert_eq!(lock.file_path, "/w/src/lib.rs");

        let relative = normalize_path("notes.md");
        assert!(Path::new(&relative).is_absolute());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(normalize_path("~/x"), home.join("x").display().to_string());
        }
    }

    #[test]
    fn disabled_manager_is_success_shaped() {
        let fs = FileSafetyManager::disabled();
        assert!(!fs.is_enabled());
        assert_eq!(
            fs.acquire_lock(&LockRequest::new("/w/a", "x")),
            LockOutcome::Acquired { expires_at: None }
        );
        assert!(fs.release_lock("/w/a", "x"));
        assert!(fs.force_unlock("/w/a"));
        assert_eq!(fs.check_lock("/w/a"), Ok(None));
        assert!(!fs.is_locked_by_other("/w/a", "y"));
        assert!(fs.list_locks(&LockFilter::default()).is_empty());
        assert_eq!(fs.cleanup_stale_locks(), 0);
    }

    #[test]
    fn legacy_schema_is_migrated_without_losing_locks() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute_batch(
                "CREATE TABLE file_locks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    file_path TEXT NOT NULL UNIQUE,
                    agent_name TEXT NOT NULL,
                    task_id TEXT,
                    locked_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    intent TEXT
                );",
            )
            .unwrap();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO file_locks (file_path, agent_name, locked_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    "/w/legacy.rs",
                    "old-agent",
                    format_ts(now),
                    format_ts(now + chrono::Duration::seconds(300))
                ],
            )
            .unwrap();
        }

        let fs = FileSafetyManager::open(&db, 30).unwrap();
        let lock = fs.check_lock("/w/legacy.rs").unwrap().unwrap();
        assert_eq!(lock.agent_id, "old-agent");
        assert_eq!(lock.pid, None);
        assert!(fs.get_stale_locks().is_empty());
        assert!(fs.is_locked_by_other("/w/legacy.rs", "someone-else"));
    }

    #[test]
    fn broken_store_fails_closed() {
        let (_dir, fs, _) = manager();
        fs.acquire_lock(&LockRequest::new("/w/a", "x"));
        if let Some(store) = &fs.store {
            store
                .conn
                .lock()
                .execute_batch("DROP TABLE file_locks;")
                .unwrap();
        }
        assert!(matches!(
            fs.check_lock("/w/a"),
            Err(FileSafetyError::Database(_))
        ));
        assert!(fs.is_locked_by_other("/w/a", "x"));
        assert!(matches!(
            fs.acquire_lock(&LockRequest::new("/w/a", "x")),
            LockOutcome::Failed { .. }
        ));
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_ts("2024-01-02T03:04:05Z").is_some());
        assert!(parse_ts("garbage").is_none());
    }
}
