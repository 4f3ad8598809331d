//! Durable storage backends for the project collection.
//!
//! The whole collection lives under a single fixed key and is read once on
//! startup and rewritten after every mutation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StorageReadError;

/// Fixed key the project collection is stored under.
pub const STORAGE_KEY: &str = "visionscript_projects_v2";

/// Whole-collection persistence for the project store.
pub trait ProjectStorage: Send {
    /// Reads the stored collection. `Ok(None)` means nothing was saved yet.
    fn load(&self) -> Result<Option<Vec<u8>>, StorageReadError>;

    /// Replaces the stored collection.
    fn save(&self, bytes: &[u8]) -> io::Result<()>;
}

// =============================================================================
// FILE STORAGE
// =============================================================================

/// Stores the collection as `{dir}/visionscript_projects_v2.automerge`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Creates a file storage rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{STORAGE_KEY}.automerge")),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProjectStorage for FileStorage {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageReadError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a half-written collection.
        let tmp = self.path.with_extension("automerge.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)
    }
}

// =============================================================================
// MEMORY STORAGE
// =============================================================================

/// In-memory storage, shared between clones. Used by tests and wasm hosts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage that already holds `bytes`.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(bytes))),
        }
    }

    /// Returns a copy of the stored bytes.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl ProjectStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageReadError> {
        let slot = self
            .slot
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(slot.clone())
    }

    fn save(&self, bytes: &[u8]) -> io::Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        *slot = Some(bytes.to_vec());
        Ok(())
    }
}

/// Memory storage whose next saves fail. Used to test write failures.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    failures: Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl FlakyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` saves fail.
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> Option<Vec<u8>> {
        self.inner.snapshot()
    }
}

#[cfg(test)]
impl ProjectStorage for FlakyStorage {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageReadError> {
        self.inner.load()
    }

    fn save(&self, bytes: &[u8]) -> io::Result<()> {
        use std::sync::atomic::Ordering;
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.save(bytes)
    }
}
