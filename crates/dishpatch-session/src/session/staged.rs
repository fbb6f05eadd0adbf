use std::sync::Arc;

use tracing::debug;

use crate::storage::keys::{REDIRECT_MESSAGE, RETURN_PATH};
use crate::storage::{KeyValueStore, StorageResult};

/// One-shot values handed from one screen to the next.
///
/// Backed by a store separate from the durable session store, so termination
/// wipes the session without losing the message it stages.
#[derive(Clone)]
pub struct StagedSlots {
    store: Arc<dyn KeyValueStore>,
}

impl StagedSlots {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn stage_message(&self, message: &str) -> StorageResult<()> {
        debug!("Staging redirect message");
        self.store.set(REDIRECT_MESSAGE, message)
    }

    /// Read the staged message once. Later calls return `None`.
    pub fn take_message(&self) -> StorageResult<Option<String>> {
        self.store.take(REDIRECT_MESSAGE)
    }

    pub fn stage_return_path(&self, path: &str) -> StorageResult<()> {
        debug!(path, "Staging return path");
        self.store.set(RETURN_PATH, path)
    }

    pub fn take_return_path(&self) -> StorageResult<Option<String>> {
        self.store.take(RETURN_PATH)
    }
}
