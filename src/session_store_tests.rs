use super::*;
use crate::state::AgentInteraction;
use tempfile::TempDir;

fn store_in(temp: &TempDir) -> FileSessionStore {
    FileSessionStore::new(StorageLayout::new(temp.path()))
}

fn sample_state(id: &str) -> WorkflowState {
    let mut state = WorkflowState::new(id);
    state.record_completion(AgentInteraction::new(Step::Intake, "legacy monolith", "summary"));
    state
}

#[test]
fn test_file_store_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);
    let state = sample_state("s1");

    persist(&store, &state).unwrap();
    let loaded = load_snapshot(&store, "s1").unwrap().expect("snapshot");

    assert_eq!(loaded.version, SNAPSHOT_VERSION);
    assert_eq!(loaded.session_id, "s1");
    assert_eq!(loaded.state, state);
    assert!(!temp.path().join("sessions/s1.json.tmp").exists());
}

#[test]
fn test_load_missing_session_returns_none() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);
    assert!(store.load("missing").unwrap().is_none());
    assert!(load_snapshot(&store, "missing").unwrap().is_none());
}

#[test]
fn test_newer_snapshot_version_is_rejected() {
    let mut snapshot = SessionSnapshot::new(&sample_state("s1"));
    snapshot.version = SNAPSHOT_VERSION + 1;
    let bytes = serde_json::to_vec(&snapshot).unwrap();

    let err = SessionSnapshot::decode(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedVersion { .. }), "got: {}", err);
}

#[test]
fn test_delete_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);
    persist(&store, &sample_state("gone")).unwrap();

    store.delete("gone").unwrap();
    store.delete("gone").unwrap();
    assert!(store.load("gone").unwrap().is_none());
}

#[test]
fn test_list_skips_corrupt_snapshots_and_summarizes() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);
    persist(&store, &sample_state("good")).unwrap();
    std::fs::write(temp.path().join("sessions/bad.json"), b"{not json").unwrap();
    std::fs::write(temp.path().join("sessions/good.lock"), b"").unwrap();

    let summaries = store.list().unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].session_id, "good");
    assert_eq!(summaries[0].current_step, Step::ArchitectureAnalysis);
    assert_eq!(summaries[0].completed_count, 1);
}

#[test]
fn test_memory_store_behaves_like_file_store() {
    let store = MemorySessionStore::new();
    persist(&store, &sample_state("a")).unwrap();
    persist(&store, &sample_state("b")).unwrap();

    assert_eq!(store.session_ids().unwrap(), vec!["a", "b"]);
    store.delete("a").unwrap();
    assert_eq!(store.session_ids().unwrap(), vec!["b"]);
}

#[test]
fn test_session_lock_is_exclusive_until_dropped() {
    let temp = TempDir::new().unwrap();
    let layout = StorageLayout::new(temp.path());

    let first = SessionLock::acquire(&layout, "s1").unwrap();
    let second = SessionLock::acquire(&layout, "s1");
    assert!(matches!(second, Err(StoreError::Locked(_))));

    drop(first);
    assert!(SessionLock::acquire(&layout, "s1").is_ok());
}
