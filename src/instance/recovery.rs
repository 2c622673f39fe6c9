//! Construction, state persistence and the recovery ladder.
//!
//! On load, a stored state document is used if it exists, is under the
//! size cap and parses. Anything else falls back to a fresh start
//! (`state_entry`, plus `on_rez` when requested). A bad document is logged
//! and never fails the load.

use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, error};

use super::{DEFAULT_STATE, DispatchSlot, InstanceLimits, ScriptInstance, Services};
use crate::capability::CapabilityRegistry;
use crate::error::{Error, Result};
use crate::model::{EventRecord, LoadRequest, StateSource};
use crate::queue::EventQueue;
use crate::script::Script;
use crate::state::PersistedState;
use crate::telemetry::metrics;

/// What was found in the state store at load time.
enum Recovery {
    Fresh,
    Restored(PersistedState),
    Oversized(u64),
    Malformed { raw: Vec<u8>, error: String },
}

impl Recovery {
    fn path(&self) -> &'static str {
        match self {
            Recovery::Fresh => "fresh",
            Recovery::Restored(_) => "restored",
            Recovery::Oversized(_) => "oversized",
            Recovery::Malformed { .. } => "malformed",
        }
    }
}

impl ScriptInstance {
    /// Bring a script to life: build its capability table, then restore
    /// saved state or start fresh.
    ///
    /// Fails only if the owning entity cannot be found.
    pub fn load(
        request: LoadRequest,
        script: Box<dyn Script>,
        services: Services,
        limits: InstanceLimits,
        registry: &CapabilityRegistry,
    ) -> Result<Arc<Self>> {
        let LoadRequest {
            identity,
            start_param,
            post_on_rez,
            state_source,
        } = request;

        let Some(entity) = services.world.lookup_entity(identity.local_id) else {
            error!(local_id = identity.local_id, script = %identity, "entity unavailable, script not started");
            return Err(Error::EntityNotFound(identity.local_id));
        };
        let capabilities = registry.instantiate(&identity, &entity);
        let initial_vars = script.vars();

        let instance = Arc::new_cyclic(|this| Self {
            identity,
            services,
            limits,
            capabilities,
            script: Mutex::new(script),
            vars: Mutex::new(initial_vars.clone()),
            initial_vars,
            pending_edit: Mutex::new(None),
            mask_stale: AtomicBool::new(false),
            slot: Mutex::new(DispatchSlot {
                queue: EventQueue::new(limits.queue_capacity),
                running: false,
                current: None,
                next_ticket: 0,
            }),
            state: RwLock::new(DEFAULT_STATE.to_string()),
            start_param: AtomicI64::new(start_param),
            detected: Mutex::new(Arc::from(Vec::new())),
            current_event: Mutex::new(None),
            in_self_delete: AtomicBool::new(false),
            this: this.clone(),
        });

        instance.recover(post_on_rez, state_source);
        instance.publish_event_mask();
        Ok(instance)
    }

    fn recover(&self, post_on_rez: bool, source: StateSource) {
        let recovery = self.read_persisted();
        metrics::state_recoveries().add(1, &[KeyValue::new("path", recovery.path())]);

        match recovery {
            Recovery::Fresh => self.fresh_start(post_on_rez),
            Recovery::Restored(saved) => self.restore(saved, post_on_rez, source),
            Recovery::Oversized(size) => {
                error!(
                    item_id = %self.identity.item_id,
                    size,
                    limit = self.limits.max_state_bytes,
                    "unable to load script state: memory limit exceeded"
                );
                self.fresh_start(post_on_rez);
            }
            Recovery::Malformed { raw, error } => {
                error!(
                    item_id = %self.identity.item_id,
                    %error,
                    raw = %String::from_utf8_lossy(&raw),
                    "unable to load script state"
                );
                self.fresh_start(post_on_rez);
            }
        }
    }

    fn read_persisted(&self) -> Recovery {
        let store = &self.services.store;
        let item_id = self.identity.item_id;

        let size = match store.size(item_id) {
            Ok(Some(size)) => size,
            Ok(None) => return Recovery::Fresh,
            Err(e) => {
                return Recovery::Malformed {
                    raw: Vec::new(),
                    error: e.to_string(),
                };
            }
        };
        if size >= self.limits.max_state_bytes {
            return Recovery::Oversized(size);
        }

        let raw = match store.read(item_id) {
            Ok(raw) => raw,
            Err(e) => {
                return Recovery::Malformed {
                    raw: Vec::new(),
                    error: e.to_string(),
                };
            }
        };
        match PersistedState::decode(&raw) {
            Ok(saved) => Recovery::Restored(saved),
            Err(e) => Recovery::Malformed {
                raw,
                error: e.to_string(),
            },
        }
    }

    fn fresh_start(&self, post_on_rez: bool) {
        self.start();
        self.post_event(EventRecord::state_entry());
        if post_on_rez {
            self.post_event(EventRecord::on_rez(self.start_param()));
        }
    }

    fn restore(&self, saved: PersistedState, post_on_rez: bool, source: StateSource) {
        let PersistedState {
            state,
            running,
            vars,
            plugin_data,
            queue,
            saved_at,
        } = saved;

        self.replace_state(state);
        self.set_vars(vars);
        if !plugin_data.is_empty() {
            self.services.plugins.import_serialization_data(
                self.identity.local_id,
                self.identity.item_id,
                self.identity.object_id,
                &plugin_data,
            );
        }
        {
            let mut slot = self.slot();
            for record in queue {
                slot.queue.push(record);
            }
        }

        debug!(
            item_id = %self.identity.item_id,
            script = %self.identity,
            %saved_at,
            "retrieved script state"
        );

        if running {
            self.start();
            if post_on_rez {
                self.post_event(EventRecord::on_rez(self.start_param()));
            }
        }

        // A restart rezzes everything again; scripts with state hear about
        // it through `changed` instead of a fresh `state_entry`.
        if source == StateSource::NewRez {
            self.post_event(EventRecord::region_restart());
        }
    }

    /// Persist state, variables, pending events and plugin data.
    ///
    /// Fails if the document cannot be found in the store afterwards.
    /// Variables come from the snapshot taken after the last turn, so this
    /// never waits on a running handler.
    pub fn save_state(&self) -> Result<()> {
        let running = self.is_running();
        self.save_state_as(running)
    }

    /// Save, recording `running` in place of the live flag. Used at
    /// shutdown, where instances are stopped before they are saved.
    pub(crate) fn save_state_as(&self, running: bool) -> Result<()> {
        let item_id = self.identity.item_id;
        let result = self.write_snapshot(running);
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::state_saves().add(1, &[KeyValue::new("result", outcome)]);
        if let Err(e) = &result {
            error!(%item_id, error = %e, "script state save failed");
        }
        result
    }

    fn write_snapshot(&self, running: bool) -> Result<()> {
        let item_id = self.identity.item_id;
        let snapshot = PersistedState {
            state: self.state(),
            running,
            vars: self.vars(),
            plugin_data: self.services.plugins.export_serialization_data(item_id),
            queue: self.queued_events(),
            saved_at: Utc::now(),
        };
        let bytes = snapshot.encode()?;

        if let Err(e) = self.services.store.write(item_id, &bytes) {
            error!(%item_id, error = %e, "unable to write script state");
        }
        if !self.services.store.exists(item_id) {
            return Err(Error::StateNotPersisted { item_id });
        }
        Ok(())
    }

    /// Delete the stored document. Failures are ignored.
    pub fn remove_state(&self) {
        if let Err(e) = self.services.store.remove(self.identity.item_id) {
            debug!(item_id = %self.identity.item_id, error = %e, "state removal failed, ignoring");
        }
    }
}
