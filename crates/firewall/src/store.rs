//! Attempt persistence trait and implementations (file, memory).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use auto_impl::auto_impl;
use parking_lot::Mutex;
use thiserror::Error;

use palisade_api::PeerIdentity;

/// File name used by [`FileAttemptStore::in_dir`].
pub const ATTEMPTS_FILE_NAME: &str = "conn-attempts.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Attempt persistence trait with auto-impl for &, Box, Arc.
///
/// Entries are `(peer, unix-millis)` pairs, newest first. Stores hold
/// whole snapshots; there is no incremental update.
#[auto_impl(&, Box, Arc)]
pub trait AttemptStore<Id: PeerIdentity>: Send + Sync {
    /// Load the persisted snapshot. No backing data is an empty list,
    /// not an error.
    fn load(&self) -> Result<Vec<(Id, u64)>, StoreError>;

    /// Replace the persisted snapshot with `entries`. Overlapping calls
    /// are the caller's to serialize; the ledger issues one at a time.
    fn save(&self, entries: &[(Id, u64)]) -> Result<(), StoreError>;
}

/// JSON file store. Serializes entries as an array of `[peer, millis]`
/// pairs and writes atomically via a temp file rename.
pub struct FileAttemptStore {
    path: PathBuf,
}

impl FileAttemptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the conventional file name inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(ATTEMPTS_FILE_NAME))
    }

    /// Create store, making parent directories if needed.
    pub fn new_with_create_dir(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl<Id: PeerIdentity> AttemptStore<Id> for FileAttemptStore {
    fn load(&self) -> Result<Vec<(Id, u64)>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn save(&self, entries: &[(Id, u64)]) -> Result<(), StoreError> {
        // Write to temp file first, then rename (atomic)
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, entries)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            writer.flush()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// In-memory store. Snapshots survive clones of the ledger but not the
/// process; the default when a host configures no storage path.
pub struct MemoryAttemptStore<Id: PeerIdentity> {
    entries: Mutex<Vec<(Id, u64)>>,
}

impl<Id: PeerIdentity> MemoryAttemptStore<Id> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }
}

impl<Id: PeerIdentity> Default for MemoryAttemptStore<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: PeerIdentity> AttemptStore<Id> for MemoryAttemptStore<Id> {
    fn load(&self) -> Result<Vec<(Id, u64)>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn save(&self, entries: &[(Id, u64)]) -> Result<(), StoreError> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }
}
