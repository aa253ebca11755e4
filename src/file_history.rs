//! Append-only modification log sharing the file-safety database.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::file_safety::{format_ts, normalize_path, ts_column, FileSafetyManager, LockFilter};

const MODIFICATION_COLUMNS: &str =
    "id, task_id, agent_name, file_path, change_type, intent, affected_lines, timestamp, metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Modify => "MODIFY",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "MODIFY" => Ok(Self::Modify),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("invalid change type '{raw}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModificationRequest {
    pub file_path: String,
    pub agent_name: String,
    pub task_id: String,
    /// Validated against CREATE, MODIFY and DELETE.
    pub change_type: String,
    pub intent: Option<String>,
    pub affected_lines: Option<String>,
    pub metadata: Option<Value>,
}

impl ModificationRequest {
    pub fn new(
        file_path: impl Into<String>,
        agent_name: impl Into<String>,
        task_id: impl Into<String>,
        change_type: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            agent_name: agent_name.into(),
            task_id: task_id.into(),
            change_type: change_type.into(),
            intent: None,
            affected_lines: None,
            metadata: None,
        }
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn affected_lines(mut self, lines: impl Into<String>) -> Self {
        self.affected_lines = Some(lines.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileModification {
    pub id: i64,
    pub task_id: String,
    pub agent_name: String,
    pub file_path: String,
    pub change_type: ChangeType,
    pub intent: Option<String>,
    pub affected_lines: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteValidation {
    pub allowed: bool,
    pub reason: Option<String>,
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSafetyStats {
    pub active_locks: usize,
    pub total_modifications: usize,
    pub by_change_type: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub most_modified_files: Vec<(String, usize)>,
}

impl FileSafetyManager {
    /// Row id of the new entry, or `None` when the change type is invalid or
    /// the write failed.
    pub fn record_modification(&self, request: &ModificationRequest) -> Option<i64> {
        self.record_modification_at(request, Utc::now())
    }

    pub(crate) fn record_modification_at(
        &self,
        request: &ModificationRequest,
        timestamp: DateTime<Utc>,
    ) -> Option<i64> {
        let store = self.store.as_ref()?;
        let change_type = match request.change_type.parse::<ChangeType>() {
            Ok(change_type) => change_type,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", file = %request.file_path, error = %error, "rejecting modification record");
                return None;
            }
        };
        let path = normalize_path(&request.file_path);
        let metadata = request.metadata.as_ref().map(Value::to_string);
        let conn = store.conn.lock();
        let result = conn.execute(
            "INSERT INTO file_modifications (task_id, agent_name, file_path, change_type, intent, affected_lines, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.task_id,
                request.agent_name,
                path,
                change_type.as_str(),
                request.intent,
                request.affected_lines,
                format_ts(timestamp),
                metadata
            ],
        );
        match result {
            Ok(_) => Some(conn.last_insert_rowid()),
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", file = %path, error = %error, "failed recording modification");
                None
            }
        }
    }

    /// Newest first.
    pub fn get_file_history(&self, file_path: &str, limit: usize) -> Vec<FileModification> {
        let path = normalize_path(file_path);
        self.query_modifications(
            &format!(
                "SELECT {MODIFICATION_COLUMNS} FROM file_modifications WHERE file_path = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"
            ),
            params![path, limit_param(limit)],
        )
    }

    /// Newest first, optionally for one agent.
    pub fn get_recent_modifications(
        &self,
        limit: usize,
        agent_name: Option<&str>,
    ) -> Vec<FileModification> {
        match agent_name {
            Some(agent) => self.query_modifications(
                &format!(
                    "SELECT {MODIFICATION_COLUMNS} FROM file_modifications WHERE agent_name = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"
                ),
                params![agent, limit_param(limit)],
            ),
            None => self.query_modifications(
                &format!(
                    "SELECT {MODIFICATION_COLUMNS} FROM file_modifications ORDER BY timestamp DESC, id DESC LIMIT ?1"
                ),
                params![limit_param(limit)],
            ),
        }
    }

    /// Oldest first, so the task reads as a narrative.
    pub fn get_modifications_by_task(&self, task_id: &str) -> Vec<FileModification> {
        self.query_modifications(
            &format!(
                "SELECT {MODIFICATION_COLUMNS} FROM file_modifications WHERE task_id = ?1 ORDER BY timestamp ASC, id ASC"
            ),
            params![task_id],
        )
    }

    fn query_modifications(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Vec<FileModification> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let conn = store.conn.lock();
        let result = conn.prepare(sql).and_then(|mut stmt| {
            let rows = stmt.query_map(params, scan_modification)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        });
        match result {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", error = %error, "modification query failed");
                Vec::new()
            }
        }
    }

    /// Lock status and recent history for `file_path`, formatted for an
    /// agent's working context.
    pub fn get_file_context(&self, file_path: &str, limit: usize) -> String {
        if !self.is_enabled() {
            return String::new();
        }
        let path = normalize_path(file_path);
        let mut lines = vec![format!("File: {path}")];
        match self.check_lock(&path) {
            Ok(Some(lock)) => {
                let mut line = format!(
                    "Lock: held by {} until {}",
                    lock.agent_id,
                    lock.expires_at.format("%H:%M:%S UTC")
                );
                if let Some(intent) = &lock.intent {
                    line.push_str(&format!(" ({intent})"));
                }
                lines.push(line);
            }
            Ok(None) => lines.push("Lock: none".to_string()),
            Err(error) => lines.push(format!("Lock: unknown ({error})")),
        }

        let history = self.get_file_history(&path, limit);
        if history.is_empty() {
            lines.push("No recorded changes.".to_string());
        } else {
            lines.push("Recent changes:".to_string());
            for entry in &history {
                let mut line = format!(
                    "  - {} {} by {} [task {}]",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.change_type,
                    entry.agent_name,
                    entry.task_id
                );
                if let Some(intent) = &entry.intent {
                    line.push_str(&format!(": {intent}"));
                }
                if let Some(affected) = &entry.affected_lines {
                    line.push_str(&format!(" (lines {affected})"));
                }
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    /// Pre-write gate. Denies when another live agent holds the lock or when
    /// the lock state cannot be read.
    pub fn validate_write(&self, file_path: &str, agent_name: &str) -> WriteValidation {
        if !self.is_enabled() {
            return WriteValidation {
                allowed: true,
                reason: None,
                context: String::new(),
            };
        }
        let context = self.get_file_context(file_path, 5);
        match self.check_lock(file_path) {
            Ok(Some(lock)) if lock.agent_id != agent_name => WriteValidation {
                allowed: false,
                reason: Some(format!(
                    "file is locked by {} until {}",
                    lock.agent_id,
                    lock.expires_at.format("%H:%M:%S UTC")
                )),
                context,
            },
            Ok(_) => WriteValidation {
                allowed: true,
                reason: None,
                context,
            },
            Err(error) => WriteValidation {
                allowed: false,
                reason: Some(format!("lock state unavailable: {error}")),
                context,
            },
        }
    }

    /// Delete modification rows older than `days`. Non-positive values are
    /// rejected and return 0.
    pub fn cleanup_old_modifications(&self, days: i64) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        if days <= 0 {
            tracing::warn!(target = "synapse::file_safety", days, "retention days must be positive");
            return 0;
        }
        match self.purge_modifications_older_than(days) {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(target = "synapse::file_safety", removed, days, "pruned modification history");
                }
                removed
            }
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", error = %error, "modification cleanup failed");
                0
            }
        }
    }

    pub(crate) fn purge_modifications_older_than(&self, days: i64) -> rusqlite::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let cutoff = Utc::now() - chrono::Duration::days(days);
        store.conn.lock().execute(
            "DELETE FROM file_modifications WHERE timestamp < ?1",
            params![format_ts(cutoff)],
        )
    }

    pub fn get_statistics(&self) -> FileSafetyStats {
        let Some(store) = &self.store else {
            return FileSafetyStats::default();
        };
        let active_locks = self.list_locks(&LockFilter::default()).len();
        let conn = store.conn.lock();
        let result = (|| -> rusqlite::Result<FileSafetyStats> {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM file_modifications", [], |row| {
                    row.get(0)
                })?;
            let by_change_type = grouped_counts(
                &conn,
                "SELECT change_type, COUNT(*) FROM file_modifications GROUP BY change_type",
            )?;
            let by_agent = grouped_counts(
                &conn,
                "SELECT agent_name, COUNT(*) FROM file_modifications GROUP BY agent_name",
            )?;
            let mut stmt = conn.prepare(
                "SELECT file_path, COUNT(*) AS n FROM file_modifications GROUP BY file_path ORDER BY n DESC, file_path ASC LIMIT 10",
            )?;
            let most_modified_files = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, count_column(row, 1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(FileSafetyStats {
                active_locks,
                total_modifications: usize::try_from(total).unwrap_or(0),
                by_change_type: by_change_type.into_iter().collect(),
                by_agent: by_agent.into_iter().collect(),
                most_modified_files,
            })
        })();
        match result {
            Ok(stats) => stats,
            Err(error) => {
                tracing::warn!(target = "synapse::file_safety", error = %error, "statistics query failed");
                FileSafetyStats {
                    active_locks,
                    ..Default::default()
                }
            }
        }
    }
}

fn grouped_counts(
    conn: &rusqlite::Connection,
    sql: &str,
) -> rusqlite::Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, count_column(row, 1)?)))?;
    rows.collect()
}

fn count_column(row: &Row, idx: usize) -> rusqlite::Result<usize> {
    let raw: i64 = row.get(idx)?;
    Ok(usize::try_from(raw).unwrap_or(0))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn scan_modification(row: &Row) -> rusqlite::Result<FileModification> {
    let change_type: String = row.get(4)?;
    let metadata: Option<String> = row.get(8)?;
    Ok(FileModification {
        id: row.get(0)?,
        task_id: row.get(1)?,
        agent_name: row.get(2)?,
        file_path: row.get(3)?,
        change_type: change_type.parse().unwrap_or(ChangeType::Modify),
        intent: row.get(5)?,
        affected_lines: row.get(6)?,
        timestamp: ts_column(row, 7)?,
        // NULL stays None; unparsable blobs degrade to an empty object.
        metadata: metadata.map(|raw| {
            serde_json::from_str(&raw).unwrap_or_else(|_| Value::Object(Map::new()))
        }),
    })
}
