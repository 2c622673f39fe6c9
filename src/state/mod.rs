//! Persisted script state.
//!
//! One document per script item, addressed by item id. The document is
//! JSON; only round-trip fidelity within this crate matters.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{EventRecord, VarMap};

/// Durable byte storage keyed by script item id.
pub trait StateStore: Send + Sync {
    /// Stored size in bytes, or `None` if nothing is stored.
    fn size(&self, item_id: Uuid) -> Result<Option<u64>>;

    fn read(&self, item_id: Uuid) -> Result<Vec<u8>>;

    fn write(&self, item_id: Uuid, data: &[u8]) -> Result<()>;

    fn exists(&self, item_id: Uuid) -> bool;

    fn remove(&self, item_id: Uuid) -> Result<()>;
}

/// Everything needed to bring an instance back where it left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub state: String,
    pub running: bool,
    #[serde(default)]
    pub vars: VarMap,
    /// Opaque timer/sensor registrations from the plugin-data collaborator.
    #[serde(default)]
    pub plugin_data: Vec<u8>,
    /// Events still pending at save time, oldest first.
    #[serde(default)]
    pub queue: Vec<EventRecord>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
