//! Event records delivered to script instances.
//!
//! A record is immutable once built: name, ordered arguments, and the
//! detection context captured when the stimulus happened.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::Value;

/// Event names the engine itself posts or treats specially.
pub mod names {
    pub const STATE_ENTRY: &str = "state_entry";
    pub const STATE_EXIT: &str = "state_exit";
    pub const ON_REZ: &str = "on_rez";
    pub const CHANGED: &str = "changed";

    /// Coalesced: at most one pending per instance.
    pub const TIMER: &str = "timer";

    /// Reserved state-change record. Never reaches user code.
    pub const SET_STATE: &str = "state";
}

/// `changed` argument flag for a region restart.
pub const CHANGED_REGION_RESTART: i64 = 256;

/// One detected thing (avatar, object, ...) in a sensor/touch/collision
/// context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    pub key: Uuid,
    pub owner: Uuid,
    pub name: String,
    pub position: [f64; 3],
    #[serde(default)]
    pub link_number: i32,
}

impl DetectParams {
    pub fn new(key: Uuid, name: impl Into<String>) -> Self {
        Self {
            key,
            owner: Uuid::nil(),
            name: name.into(),
            position: [0.0; 3],
            link_number: 0,
        }
    }
}

/// One event occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    name: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    detected: Vec<DetectParams>,
}

impl EventRecord {
    /// An event with no arguments and no detection context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            detected: Vec::new(),
        }
    }

    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            detected: Vec::new(),
        }
    }

    pub fn detected(mut self, detected: Vec<DetectParams>) -> Self {
        self.detected = detected;
        self
    }

    pub fn state_entry() -> Self {
        Self::new(names::STATE_ENTRY)
    }

    pub fn on_rez(start_param: i64) -> Self {
        Self::with_args(names::ON_REZ, vec![Value::Integer(start_param)])
    }

    pub fn region_restart() -> Self {
        Self::with_args(names::CHANGED, vec![Value::Integer(CHANGED_REGION_RESTART)])
    }

    /// The reserved record that switches the script's named state.
    pub fn set_state(state: impl Into<String>) -> Self {
        Self::with_args(names::SET_STATE, vec![Value::String(state.into())])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn detect_params(&self) -> &[DetectParams] {
        &self.detected
    }

    pub fn is_timer(&self) -> bool {
        self.name == names::TIMER
    }

    pub fn is_set_state(&self) -> bool {
        self.name == names::SET_STATE
    }
}
