//! # Plan Cache Storage Module
//!
//! Persistence for the opaque FFT wisdom blob. The FFT module produces and
//! consumes the bytes; a [`PlanStore`] only keeps them under a key.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, TunerError};

/// Storage for FFT plan-cache blobs, keyed by file name.
pub trait PlanStore: Send + Sync {
    /// Returns the blob stored under `key`, or `None` if nothing was saved yet.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `blob` under `key`, replacing any previous value.
    fn save(&self, key: &str, blob: &[u8]) -> Result<()>;
}

/// Keeps each blob as a file inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryPlanStore {
    root: PathBuf,
}

impl DirectoryPlanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\']);
        if !valid {
            return Err(TunerError::InvalidConfig(format!(
                "plan cache key {key:?} is not a plain file name"
            )));
        }
        Ok(self.root.join(key))
    }
}

impl PlanStore for DirectoryPlanStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root)?;
        // `path` only ever holds a complete blob.
        let staging = path.with_extension("partial");
        fs::write(&staging, blob)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

/// Process-local store, useful when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().contains_key(key)
    }
}

impl PlanStore for MemoryPlanStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.blobs.lock().insert(key.to_owned(), blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_store_round_trips_and_reports_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryPlanStore::new(dir.path().join("cache"));

        assert!(store.load("wisdom.json").unwrap().is_none());
        store.save("wisdom.json", b"{}").unwrap();
        assert_eq!(store.load("wisdom.json").unwrap().as_deref(), Some(&b"{}"[..]));
        assert!(!dir.path().join("cache").join("wisdom.partial").exists());
    }

    #[test]
    fn directory_store_rejects_paths() {
        let store = DirectoryPlanStore::new("unused");
        assert!(matches!(
            store.load("../escape"),
            Err(TunerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryPlanStore::new();
        store.save("k", b"one").unwrap();
        store.save("k", b"two").unwrap();
        assert!(store.contains("k"));
        assert_eq!(store.load("k").unwrap().unwrap(), b"two");
    }
}
