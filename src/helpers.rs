use std::{
    io::Write,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub(crate) const ANSI_GREEN: &str = "\x1b[32m";
pub(crate) const ANSI_CYAN: &str = "\x1b[36m";
pub(crate) const ANSI_YELLOW: &str = "\x1b[33m";
pub(crate) const ANSI_RED: &str = "\x1b[31m";
pub(crate) const ANSI_RESET: &str = "\x1b[0m";

pub(crate) const REPLY_EXPECTED_MARKER: &str = "[REPLY EXPECTED]";

/// Replace `path` with `bytes` via a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(path);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed creating directory {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed creating temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("failed persisting {}", path.display()))?;
    Ok(())
}

const DIR_LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on `<dir>/.lock`, held until dropped. Serializes
/// read-modify-write cycles across processes sharing `dir`.
pub(crate) struct DirLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<std::fs::File>,
}

pub(crate) fn lock_dir(dir: &Path) -> Result<DirLock> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed creating directory {}", dir.display()))?;
    let path = dir.join(DIR_LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed opening lock file {}", path.display()))?;
    lock_file(file, &path)
}

#[cfg(unix)]
fn lock_file(file: std::fs::File, path: &Path) -> Result<DirLock> {
    use nix::fcntl::{Flock, FlockArg};

    Flock::lock(file, FlockArg::LockExclusive)
        .map(|flock| DirLock { _flock: flock })
        .map_err(|(_, errno)| anyhow::anyhow!("failed locking {}: {errno}", path.display()))
}

#[cfg(not(unix))]
fn lock_file(_file: std::fs::File, _path: &Path) -> Result<DirLock> {
    Ok(DirLock {})
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// `Ok(None)` when the file does not exist.
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Header prepended to messages injected into an agent's terminal.
pub(crate) fn format_injection(
    task_id: &str,
    sender_id: &str,
    body: &str,
    response_expected: bool,
) -> String {
    let short = &task_id[..floor_char_boundary(task_id, 8)];
    if response_expected && !body.contains(REPLY_EXPECTED_MARKER) {
        format!("[A2A:{short}:{sender_id}] {REPLY_EXPECTED_MARKER} {body}")
    } else {
        format!("[A2A:{short}:{sender_id}] {body}")
    }
}

/// Find the nearest character boundary at or before the given byte index.
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Strip ANSI escape sequences from text for robust pattern matching.
pub(crate) fn strip_ansi(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for nc in chars.by_ref() {
                    if nc.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
        .min(u128::from(u64::MAX)) as u64
}

pub(crate) fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |duration| duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_then_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        let value: serde_json::Value = read_json_file(&path).unwrap().unwrap();
        assert_eq!(value["a"], 1);
        assert!(read_json_file::<serde_json::Value>(&dir.path().join("absent.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{oops").unwrap();
        assert!(read_json_file::<serde_json::Value>(&path).is_err());
    }

    #[test]
    fn injection_header_marks_reply_expected_once() {
        let text = format_injection("0123456789abcdef", "synapse-claude-8100", "hello", true);
        assert_eq!(
            text,
            "[A2A:01234567:synapse-claude-8100] [REPLY EXPECTED] hello"
        );
        let already = format_injection("abc", "s", "[REPLY EXPECTED] see file", true);
        assert_eq!(already.matches(REPLY_EXPECTED_MARKER).count(), 1);
        assert_eq!(format_injection("abc", "s", "pong", false), "[A2A:abc:s] pong");
    }

    #[test]
    fn floor_char_boundary_handles_multibyte() {
        let s = "héllo";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[32m→ gemini\x1b[0m"), "→ gemini");
    }

    #[test]
    fn dir_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let held = lock_dir(dir.path()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let path = dir.path().to_path_buf();
        let waiter = std::thread::spawn(move || {
            let _lock = lock_dir(&path).unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
