use synapse::{
    file_history::ModificationRequest,
    file_safety::{FileSafetyManager, LockFilter, LockOutcome, LockRequest},
};

/// A PID that belonged to a process which has since exited.
fn exited_pid() -> u32 {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("spawn helper process");
    let pid = child.id();
    child.wait().expect("reap helper process");
    pid
}

#[test]
fn two_managers_share_one_lock_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join(".synapse").join("file_safety.db");
    let first = FileSafetyManager::open(&db, 30).unwrap();
    let second = FileSafetyManager::open(&db, 30).unwrap();
    let path = dir.path().join("src").join("lib.rs");
    let path = path.to_str().unwrap();

    let outcome = first.acquire_lock(&LockRequest::new(path, "synapse-claude-8100").intent("refactor"));
    assert!(matches!(outcome, LockOutcome::Acquired { .. }));

    match second.acquire_lock(&LockRequest::new(path, "synapse-gemini-8110")) {
        LockOutcome::AlreadyLocked { holder, .. } => assert_eq!(holder, "synapse-claude-8100"),
        other => panic!("expected contention, got {other:?}"),
    }
    assert!(second.is_locked_by_other(path, "synapse-gemini-8110"));
    assert!(!second.validate_write(path, "synapse-gemini-8110").allowed);
    assert!(first.validate_write(path, "synapse-claude-8100").allowed);

    assert!(!second.release_lock(path, "synapse-gemini-8110"));
    assert!(first.release_lock(path, "synapse-claude-8100"));
    assert!(second
        .acquire_lock(&LockRequest::new(path, "synapse-gemini-8110"))
        .is_granted());
}

#[test]
fn locks_of_exited_processes_do_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let manager = FileSafetyManager::open(&dir.path().join("fs.db"), 30).unwrap();
    let path = dir.path().join("notes.md");
    let path = path.to_str().unwrap();

    let dead = exited_pid();
    assert!(manager
        .acquire_lock(&LockRequest::new(path, "synapse-codex-8120").pid(dead))
        .is_granted());
    assert!(manager.check_lock(path).unwrap().is_none());
    assert!(manager.list_locks(&LockFilter::default()).is_empty());

    let outcome = manager.acquire_lock(&LockRequest::new(path, "synapse-claude-8100"));
    assert!(matches!(outcome, LockOutcome::Acquired { .. }));
    assert_eq!(
        manager.check_lock(path).unwrap().unwrap().agent_id,
        "synapse-claude-8100"
    );
    assert!(manager.get_stale_locks().is_empty());
}

#[test]
fn history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fs.db");
    let path = dir.path().join("main.rs");
    let path = path.to_str().unwrap();
    {
        let manager = FileSafetyManager::open(&db, 30).unwrap();
        let request = ModificationRequest::new(path, "synapse-claude-8100", "task-1", "modify")
            .intent("add tests")
            .affected_lines("10-20");
        assert!(manager.record_modification(&request).is_some());
    }

    let manager = FileSafetyManager::open(&db, 30).unwrap();
    let history = manager.get_file_history(path, 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].intent.as_deref(), Some("add tests"));
    assert_eq!(manager.get_modifications_by_task("task-1").len(), 1);

    let stats = manager.get_statistics();
    assert_eq!(stats.total_modifications, 1);
    assert_eq!(stats.by_agent.get("synapse-claude-8100"), Some(&1));
}

#[test]
fn disabled_manager_allows_everything() {
    let manager = FileSafetyManager::disabled();
    assert!(!manager.is_enabled());
    assert!(manager.acquire_lock(&LockRequest::new("/tmp/x", "a")).is_granted());
    assert!(manager.check_lock("/tmp/x").unwrap().is_none());
    assert!(manager.validate_write("/tmp/x", "b").allowed);
    assert_eq!(manager.cleanup_stale_locks(), 0);
}
