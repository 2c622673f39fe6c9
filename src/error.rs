//! Error types for script-engine.
//!
//! Faults raised by a running script are not errors in this sense; see
//! [`crate::script::ScriptFault`].

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("entity not found: local id {0}")]
    EntityNotFound(u32),

    #[error("completed persistence save for {item_id}, but no state was stored")]
    StateNotPersisted { item_id: Uuid },

    #[error("state encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Raised by [`crate::world::World`] implementations.
    #[error("world error: {0}")]
    World(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
