//! Archive persistence backends.
//!
//! The archive is append-only; each save hands the backend the full archive
//! so a backend can replace its stored copy in one step.

use crate::store::MemoryEntry;
use anima_core::PersistenceError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub trait ArchiveStore: Send {
    /// Entries persisted by an earlier run. Empty when nothing was saved yet.
    fn load(&self) -> Result<Vec<MemoryEntry>, PersistenceError>;

    /// Replace the stored archive with `archive`.
    fn save(&mut self, archive: &[MemoryEntry]) -> Result<(), PersistenceError>;
}

// ============================================================================
// JSON file
// ============================================================================

/// Archive kept as one JSON array on disk. Writes go to a sibling temp file
/// first and are renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonArchiveStore {
    path: PathBuf,
}

impl JsonArchiveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ArchiveStore for JsonArchiveStore {
    fn load(&self) -> Result<Vec<MemoryEntry>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&mut self, archive: &[MemoryEntry]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        let json = serde_json::to_string(archive)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), entries = archive.len(), "Archive saved");
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Archive held in memory. Clones share storage, so a test can keep one
/// clone to inspect what was saved and to simulate an unavailable backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArchiveStore {
    saved: Arc<Mutex<Vec<MemoryEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<MemoryEntry> {
        self.saved.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn load(&self) -> Result<Vec<MemoryEntry>, PersistenceError> {
        self.saved
            .lock()
            .map(|v| v.clone())
            .map_err(|_| PersistenceError::Unavailable("archive lock poisoned".to_string()))
    }

    fn save(&mut self, archive: &[MemoryEntry]) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "in-memory archive marked unavailable".to_string(),
            ));
        }
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| PersistenceError::Unavailable("archive lock poisoned".to_string()))?;
        *saved = archive.to_vec();
        Ok(())
    }
}
