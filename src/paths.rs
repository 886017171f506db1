//! Home-based storage layout for all archflow persistence.
//!
//! Everything lives under `~/.archflow/` (or `$ARCHFLOW_HOME`):
//! - `sessions/<id>.json` - Session snapshots
//! - `sessions/<id>.lock` - Advisory lock held while a process drives the session
//! - `diagrams/<id>/<run-id>/` - Diagram output directories, one per generation run
//! - `logs/<id>/events.jsonl` - Structured event log
//! - `exports/` - Default export destination
//! - `config.yaml` - Optional configuration file

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the storage root.
pub const HOME_ENV_VAR: &str = "ARCHFLOW_HOME";

const ARCHFLOW_DIR: &str = ".archflow";

/// Returns the storage root, creating it if needed.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined or the directory cannot
/// be created.
pub fn archflow_home() -> Result<PathBuf> {
    let root = match std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .context("Could not determine home directory for archflow storage")?
            .join(ARCHFLOW_DIR),
    };
    fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create archflow directory: {}", root.display()))?;
    Ok(root)
}

/// Directory layout rooted at one storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at [`archflow_home`].
    pub fn from_home() -> Result<Self> {
        Ok(Self::new(archflow_home()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", session_id))
    }

    pub fn lock_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.lock", session_id))
    }

    /// Parent of every diagram run directory of a session.
    pub fn diagrams_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("diagrams").join(session_id)
    }

    pub fn logs_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("logs").join(session_id)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Creates `dir` if absent and returns it.
    pub fn ensure(dir: PathBuf) -> Result<PathBuf> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        Ok(dir)
    }
}

/// Rejects session ids that could escape the storage root.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!(
            "Invalid session id '{}': use letters, digits, '-' or '_'",
            session_id
        );
    }
    Ok(())
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
