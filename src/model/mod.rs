//! Core data model.
//!
//! A script instance is one running program bound to one entity. It has
//! identity (object, item, asset, local id, execution domain), a load
//! request describing how it came to exist, and an execution state.

pub mod event;
pub mod value;

pub use event::{DetectParams, EventRecord};
pub use value::{Value, VarMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who a script instance is. Fixed for the lifetime of the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    /// The entity the script is attached to.
    pub object_id: Uuid,

    /// The script item inside the entity's inventory. Persisted state is
    /// addressed by this id.
    pub item_id: Uuid,

    /// The compiled script asset.
    pub asset_id: Uuid,

    /// Region-local numeric id of the entity. Stable across restarts.
    pub local_id: u32,

    /// Logical isolation boundary the instance executes in.
    pub domain_id: Uuid,

    pub entity_name: String,
    pub script_name: String,
}

impl InstanceIdentity {
    pub fn new(local_id: u32, object_id: Uuid, item_id: Uuid) -> Self {
        Self {
            object_id,
            item_id,
            asset_id: Uuid::nil(),
            local_id,
            domain_id: Uuid::nil(),
            entity_name: String::new(),
            script_name: String::new(),
        }
    }

    pub fn asset(mut self, asset_id: Uuid) -> Self {
        self.asset_id = asset_id;
        self
    }

    pub fn domain(mut self, domain_id: Uuid) -> Self {
        self.domain_id = domain_id;
        self
    }

    pub fn names(mut self, entity_name: impl Into<String>, script_name: impl Into<String>) -> Self {
        self.entity_name = entity_name.into();
        self.script_name = script_name.into();
        self
    }
}

impl std::fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity_name, self.script_name)
    }
}

// ---------------------------------------------------------------------------
// State source
// ---------------------------------------------------------------------------

/// Why an instance is being (re)created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    /// Fresh rez or world restart.
    NewRez,
    /// The entity crossed in from another region.
    PrimCrossing,
    /// An attachment crossed in with its wearer.
    AttachmentCrossing,
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

/// Scheduling state of an instance, as seen from the instance.
///
/// Not to be confused with the script's own named state (`"default"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Not running. No dispatch is requested even if events are queued.
    Stopped,
    /// Running with nothing outstanding.
    Idle,
    /// A work handle is outstanding (waiting to run, or running).
    Scheduled,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Stopped => "stopped",
            ExecutionState::Idle => "idle",
            ExecutionState::Scheduled => "scheduled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder describing an instance to load. The engine's public API for
/// bringing a script to life.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub(crate) identity: InstanceIdentity,
    pub(crate) start_param: i64,
    pub(crate) post_on_rez: bool,
    pub(crate) state_source: StateSource,
}

impl LoadRequest {
    pub fn new(identity: InstanceIdentity) -> Self {
        Self {
            identity,
            start_param: 0,
            post_on_rez: false,
            state_source: StateSource::NewRez,
        }
    }

    pub fn start_param(mut self, start_param: i64) -> Self {
        self.start_param = start_param;
        self
    }

    /// Deliver `on_rez` once the instance is running.
    pub fn post_on_rez(mut self, post: bool) -> Self {
        self.post_on_rez = post;
        self
    }

    pub fn state_source(mut self, source: StateSource) -> Self {
        self.state_source = source;
        self
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }
}
