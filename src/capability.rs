//! Capability registry.
//!
//! A capability is an object giving a running script access to part of the
//! world (chat, timers, sensors, ...). Factories are registered once per
//! engine by kind; each instance gets its own table, built at load time.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::InstanceIdentity;
use crate::world::EntityHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    World,
    Chat,
    Timers,
    Sensors,
    Inventory,
}

pub trait Capability: Any + Send + Sync {
    fn kind(&self) -> CapabilityKind;

    fn as_any(&self) -> &dyn Any;
}

pub trait CapabilityFactory: Send + Sync {
    fn kind(&self) -> CapabilityKind;

    fn create(&self, identity: &InstanceIdentity, entity: &EntityHandle) -> Arc<dyn Capability>;
}

/// Factories, indexed by kind.
#[derive(Default)]
pub struct CapabilityRegistry {
    factories: HashMap<CapabilityKind, Arc<dyn CapabilityFactory>>,
}

impl CapabilityRegistry {
    /// Create an empty registry with no capabilities.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one of the same kind.
    pub fn register(&mut self, factory: Arc<dyn CapabilityFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn kinds(&self) -> Vec<CapabilityKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Build the capability table for one instance.
    pub fn instantiate(&self, identity: &InstanceIdentity, entity: &EntityHandle) -> CapabilityTable {
        let entries = self
            .factories
            .iter()
            .map(|(kind, factory)| (*kind, factory.create(identity, entity)))
            .collect();
        CapabilityTable { entries }
    }
}

/// One instance's capabilities.
#[derive(Default)]
pub struct CapabilityTable {
    entries: HashMap<CapabilityKind, Arc<dyn Capability>>,
}

impl CapabilityTable {
    pub fn get(&self, kind: CapabilityKind) -> Option<&Arc<dyn Capability>> {
        self.entries.get(&kind)
    }

    /// Look a capability up and downcast it to its concrete type.
    pub fn get_as<T: Capability>(&self, kind: CapabilityKind) -> Option<&T> {
        self.entries.get(&kind)?.as_any().downcast_ref::<T>()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
