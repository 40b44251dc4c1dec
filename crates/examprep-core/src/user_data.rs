//! Optional on-disk history of generated study material.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Fingerprint;
use crate::prompt::StudyTask;

#[derive(Error, Debug)]
pub enum UserDataError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("history file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Hex SHA-256 of the source document.
    pub fingerprint: String,
    pub source_name: String,
    /// `"notes"` or `"mcqs"`.
    pub kind: String,
    pub text: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl HistoryEntry {
    pub fn new(fingerprint: &Fingerprint, source_name: &str, task: StudyTask, text: &str) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            fingerprint: fingerprint.to_string(),
            source_name: source_name.to_string(),
            kind: task.label().to_string(),
            text: text.to_string(),
            created_at,
        }
    }
}

/// A JSON array of [`HistoryEntry`] in a single file.
#[derive(Debug, Clone)]
pub struct UserDataStore {
    path: PathBuf,
}

impl UserDataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/examprep/history.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("examprep").join("history.json"))
    }

    pub fn open_default() -> Result<Self, UserDataError> {
        Self::default_path()
            .map(Self::new)
            .ok_or(UserDataError::NoDataDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<HistoryEntry>, UserDataError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn append(&self, entry: HistoryEntry) -> Result<(), UserDataError> {
        let mut entries = self.load()?;
        entries.push(entry);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "history saved");
        Ok(())
    }

    /// Remove the history file. Returns `false` if there was nothing to delete.
    pub fn delete(&self) -> Result<bool, UserDataError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "history deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
