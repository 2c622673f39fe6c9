//! Core engine. The public API for loading and driving script instances.
//!
//! The engine owns the collaborators and the capability registry, and
//! tracks every live instance by script item id. External stimuli reach
//! instances through here.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::capability::CapabilityRegistry;
use crate::config::EngineConfig;
use crate::dispatch::TokioWorkerPool;
use crate::error::{Error, Result};
use crate::instance::{InstanceLimits, ScriptInstance, Services};
use crate::model::{EventRecord, LoadRequest};
use crate::queue::Enqueue;
use crate::script::Script;
use crate::state::FileStateStore;
use crate::world::{PluginData, World};

/// The script engine. Owns all instances.
pub struct Engine {
    services: Services,
    limits: InstanceLimits,
    capabilities: CapabilityRegistry,
    instances: RwLock<HashMap<Uuid, Arc<ScriptInstance>>>,
    /// How long `stop` waits for a running event before aborting it.
    pub stop_timeout: Duration,
}

impl Engine {
    pub fn new(config: &EngineConfig, services: Services, capabilities: CapabilityRegistry) -> Self {
        Self {
            services,
            limits: InstanceLimits::from(config),
            capabilities,
            instances: RwLock::new(HashMap::new()),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Create an engine with a tokio worker pool and file-backed state.
    pub fn from_config(
        config: &EngineConfig,
        world: Arc<dyn World>,
        plugins: Arc<dyn PluginData>,
        capabilities: CapabilityRegistry,
    ) -> Result<Self> {
        let services = Services {
            pool: Arc::new(TokioWorkerPool::new(config.worker_threads)?),
            world,
            plugins,
            store: Arc::new(FileStateStore::open(config.state_dir.clone())?),
        };
        Ok(Self::new(config, services, capabilities))
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Load a script. An instance already registered under the same item
    /// id is unregistered and stopped first, so the two never run together.
    pub fn load_script(
        &self,
        request: LoadRequest,
        script: Box<dyn Script>,
    ) -> Result<Arc<ScriptInstance>> {
        let item_id = request.identity().item_id;
        let previous = self.write().remove(&item_id);
        if let Some(previous) = previous {
            warn!(%item_id, "replacing loaded script instance");
            previous.stop(self.stop_timeout);
        }

        let instance = ScriptInstance::load(
            request,
            script,
            self.services.clone(),
            self.limits,
            &self.capabilities,
        )?;
        self.write().insert(item_id, Arc::clone(&instance));

        info!(
            %item_id,
            local_id = instance.local_id(),
            script = %instance.identity(),
            "script loaded"
        );
        Ok(instance)
    }

    /// Get an instance by script item id.
    pub fn instance(&self, item_id: Uuid) -> Option<Arc<ScriptInstance>> {
        self.read().get(&item_id).cloned()
    }

    /// All instances attached to one entity.
    pub fn instances_on(&self, local_id: u32) -> Vec<Arc<ScriptInstance>> {
        self.read()
            .values()
            .filter(|i| i.local_id() == local_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Post to one script.
    pub fn post_script_event(&self, item_id: Uuid, record: EventRecord) -> Result<Enqueue> {
        let instance = self
            .instance(item_id)
            .ok_or_else(|| Error::Other(format!("no script instance for item {item_id}")))?;
        Ok(instance.post_event(record))
    }

    /// Post to every script on an entity. Returns how many accepted it.
    pub fn post_object_event(&self, local_id: u32, record: EventRecord) -> usize {
        self.instances_on(local_id)
            .iter()
            .filter(|i| i.post_event(record.clone()).is_accepted())
            .count()
    }

    /// Take a script out of the engine for good: stop it, drop its saved
    /// state and plugin registrations.
    pub fn remove_script(&self, item_id: Uuid) -> bool {
        let Some(instance) = self.write().remove(&item_id) else {
            return false;
        };
        instance.stop(self.stop_timeout);
        instance.remove_state();
        self.services
            .plugins
            .remove_all_for_instance(instance.local_id(), item_id);
        info!(%item_id, "script removed");
        true
    }

    pub fn stop_all(&self) {
        for instance in self.snapshot() {
            instance.stop(self.stop_timeout);
        }
    }

    /// Save every instance. Returns the first failure after trying all.
    pub fn save_all(&self) -> Result<()> {
        let mut first_error = None;
        for instance in self.snapshot() {
            if let Err(e) = instance.save_state() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop everything, then save everything. Instances that were running
    /// are saved as running so they resume on the next load.
    pub fn shutdown(&self) -> Result<()> {
        let instances = self.snapshot();
        info!(count = instances.len(), "shutting down script engine");

        let mut first_error = None;
        for instance in instances {
            let was_running = instance.is_running();
            instance.stop(self.stop_timeout);
            if let Err(e) = instance.save_state_as(was_running) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn snapshot(&self) -> Vec<Arc<ScriptInstance>> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<ScriptInstance>>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<ScriptInstance>>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }
}
