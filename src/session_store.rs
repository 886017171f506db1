//! Durable session persistence for stop/resume.
//!
//! A session is persisted as a versioned [`SessionSnapshot`] JSON document keyed by
//! session id. Stores deal in opaque bytes; encoding lives here so every backend
//! round-trips the full [`WorkflowState`] the same way.

use crate::paths::StorageLayout;
use crate::state::{Step, WorkflowState};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current snapshot format version.
/// Increment this when making breaking changes to the snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode session snapshot: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("snapshot version {found} is newer than supported version {supported}; upgrade archflow")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("session {0} is being driven by another process")]
    Locked(String),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A persisted session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    /// Snapshot format version for migration compatibility
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub session_id: String,
    pub state: WorkflowState,
}

/// Information about a persisted session for listing purposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub current_step: Step,
    pub completed_count: usize,
    pub failed_steps: Vec<Step>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(state: &WorkflowState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            session_id: state.session_id.clone(),
            state: state.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes persisted bytes, rejecting snapshots written by a newer format.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        #[derive(Deserialize)]
        struct VersionHeader {
            version: u32,
        }
        let header: VersionHeader = serde_json::from_slice(bytes)?;
        if header.version > SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: header.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            current_step: self.state.current_step,
            completed_count: self.state.completed_steps.len(),
            failed_steps: self.state.errors.keys().copied().collect(),
            saved_at: self.saved_at,
        }
    }
}

/// Durable storage keyed by session id.
pub trait SessionStore: Send + Sync {
    fn save(&self, session_id: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn delete(&self, session_id: &str) -> Result<(), StoreError>;
    fn session_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Summaries of every decodable session, newest first.
    fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for id in self.session_ids()? {
            let Some(bytes) = self.load(&id)? else {
                continue;
            };
            match SessionSnapshot::decode(&bytes) {
                Ok(snapshot) => summaries.push(snapshot.summary()),
                Err(err) => tracing::warn!(session_id = %id, error = %err, "Skipping unreadable snapshot"),
            }
        }
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }
}

/// Persists `state` as a fresh snapshot.
pub fn persist(store: &dyn SessionStore, state: &WorkflowState) -> Result<(), StoreError> {
    let bytes = SessionSnapshot::new(state).encode()?;
    store.save(&state.session_id, &bytes)
}

/// Loads and decodes the snapshot of `session_id`, if one exists.
pub fn load_snapshot(
    store: &dyn SessionStore,
    session_id: &str,
) -> Result<Option<SessionSnapshot>, StoreError> {
    store
        .load(session_id)?
        .map(|bytes| SessionSnapshot::decode(&bytes))
        .transpose()
}

/// Snapshot files under `<home>/sessions/`, written atomically.
pub struct FileSessionStore {
    layout: StorageLayout,
}

impl FileSessionStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.layout.sessions_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let snapshot_path = self.layout.snapshot_path(session_id);
        let temp_path = snapshot_path.with_extension("json.tmp");
        fs::write(&temp_path, bytes).map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &snapshot_path).map_err(|e| StoreError::io(&snapshot_path, e))
    }

    fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.layout.snapshot_path(session_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.layout.snapshot_path(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut ids: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-process store, used by tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries()?.insert(session_id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries()?.get(session_id).cloned())
    }

    fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.entries()?.remove(session_id);
        Ok(())
    }

    fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.entries()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Exclusive advisory lock on a session, released on drop.
///
/// Held by whichever process is driving the session so two processes never advance the
/// same session concurrently.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(layout: &StorageLayout, session_id: &str) -> Result<Self, StoreError> {
        let dir = layout.sessions_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = layout.lock_path(session_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(StoreError::Locked(session_id.to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
#[path = "session_store_tests.rs"]
mod tests;
