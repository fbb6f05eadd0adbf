//! Key-value persistence for session state.
//!
//! This module provides:
//! - `KeyValueStore`: the storage seam every session component reads through
//! - `FileStore`: durable JSON-file backend that survives restarts
//! - `MemoryStore`: in-process backend for tests and ephemeral hosts
//!
//! Multi-key writes go through `set_many` / `remove_many` so a reader never
//! observes half of a credential pair.

pub mod file;
pub mod keys;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage format error: {0}")]
    Format(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// String key-value storage shared by every session code path.
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write every entry as one unit.
    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()>;

    /// Remove every listed key as one unit. Missing keys are ignored.
    fn remove_many(&self, keys: &[&str]) -> StorageResult<()>;

    /// Read a value and remove it in the same step.
    fn take(&self, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.remove_many(&[key])
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
