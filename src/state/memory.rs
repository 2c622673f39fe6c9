//! In-memory state store (for testing and ephemeral hosts).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::StateStore;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct MemoryStateStore {
    blobs: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes, bypassing any encoding.
    pub fn insert_raw(&self, item_id: Uuid, data: impl Into<Vec<u8>>) {
        self.blobs().insert(item_id, data.into());
    }

    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn size(&self, item_id: Uuid) -> Result<Option<u64>> {
        Ok(self.blobs().get(&item_id).map(|b| b.len() as u64))
    }

    fn read(&self, item_id: Uuid) -> Result<Vec<u8>> {
        self.blobs()
            .get(&item_id)
            .cloned()
            .ok_or_else(|| Error::Other(format!("no state stored for {item_id}")))
    }

    fn write(&self, item_id: Uuid, data: &[u8]) -> Result<()> {
        self.blobs().insert(item_id, data.to_vec());
        Ok(())
    }

    fn exists(&self, item_id: Uuid) -> bool {
        self.blobs().contains_key(&item_id)
    }

    fn remove(&self, item_id: Uuid) -> Result<()> {
        self.blobs().remove(&item_id);
        Ok(())
    }
}
