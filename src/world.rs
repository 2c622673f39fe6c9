//! Contracts consumed from the world and plugin-data collaborators.
//!
//! The engine never mutates the scene itself; it looks entities up,
//! reports errors in-world, and asks for deletion when a script deletes
//! its own entity.

use uuid::Uuid;

use crate::error::Result;
use crate::script::EventMask;

/// Chat channel reserved for script diagnostics.
pub const DEBUG_CHANNEL: i32 = i32::MAX;

/// What the engine needs to know about the entity a script lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityHandle {
    pub local_id: u32,
    pub id: Uuid,
    pub name: String,
    pub position: [f64; 3],
}

/// A message shown in-world, attributed to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleMessage {
    pub text: String,
    pub channel: i32,
    pub position: [f64; 3],
    pub sender_name: String,
    pub sender_id: Uuid,
}

pub trait World: Send + Sync {
    fn lookup_entity(&self, local_id: u32) -> Option<EntityHandle>;

    fn deliver_visible_message(&self, message: VisibleMessage) -> Result<()>;

    /// Delete the entity and the group it belongs to.
    fn delete_entity(&self, entity: &EntityHandle) -> Result<()>;

    /// The set of events the script listens for in its current state changed.
    fn set_script_events(&self, local_id: u32, item_id: Uuid, mask: EventMask);

    /// Drop any permissions granted to the script item.
    fn clear_script_permissions(&self, local_id: u32, item_id: Uuid);
}

/// Timers, sensors, listeners and other plugin registrations that survive a
/// save/restore cycle as opaque bytes.
pub trait PluginData: Send + Sync {
    fn export_serialization_data(&self, item_id: Uuid) -> Vec<u8>;

    fn import_serialization_data(&self, local_id: u32, item_id: Uuid, entity_id: Uuid, data: &[u8]);

    fn remove_all_for_instance(&self, local_id: u32, item_id: Uuid);
}
