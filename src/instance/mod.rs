//! Script instance: one program bound to one entity.
//!
//! An instance owns an event queue and at most one outstanding work handle.
//! Posting an event to an idle instance asks the worker pool for a turn; each
//! turn runs exactly one event and then asks for the next turn if more are
//! queued. That keeps per-instance order strictly FIFO while the pool
//! interleaves turns from many instances.
//!
//! The per-instance lock guards the queue, the running flag and the
//! outstanding handle. Cancellation, waiting and aborting happen outside it.
//!
//! The script itself sits behind its own lock, held by a handler for as
//! long as it runs. A handler that ignores its interrupt keeps that lock
//! after a forced abort, so nothing outside a worker turn blocks on it:
//! variables are read from a snapshot refreshed after every turn, and edits
//! that find the script busy are applied at the start of its next turn.

mod fault;
mod recovery;
mod reset;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError, Weak};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capability::CapabilityTable;
use crate::config::EngineConfig;
use crate::dispatch::{Interrupt, WorkHandle, WorkerPool};
use crate::model::event::names;
use crate::model::{DetectParams, EventRecord, ExecutionState, InstanceIdentity, VarMap};
use crate::queue::{Enqueue, EventQueue};
use crate::script::{EventMask, Script};
use crate::state::StateStore;
use crate::telemetry::metrics;
use crate::world::{PluginData, World};

pub use fault::runtime_error_text;

/// Named state every script starts in.
pub const DEFAULT_STATE: &str = "default";

/// External collaborators an instance talks to.
#[derive(Clone)]
pub struct Services {
    pub pool: Arc<dyn WorkerPool>,
    pub world: Arc<dyn World>,
    pub plugins: Arc<dyn PluginData>,
    pub store: Arc<dyn StateStore>,
}

/// Per-instance bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLimits {
    pub queue_capacity: usize,
    pub max_state_bytes: u64,
    pub error_message_limit: usize,
}

impl Default for InstanceLimits {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for InstanceLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            queue_capacity: config.max_event_queue,
            max_state_bytes: config.max_state_bytes,
            error_message_limit: config.error_message_limit,
        }
    }
}

/// Everything under the per-instance lock.
struct DispatchSlot {
    queue: EventQueue,
    running: bool,
    current: Option<Outstanding>,
    next_ticket: u64,
}

impl DispatchSlot {
    /// Whether the turn holding `ticket` is still the outstanding one.
    fn owns(&self, ticket: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.ticket == ticket)
    }
}

struct Outstanding {
    ticket: u64,
    handle: Arc<dyn WorkHandle>,
}

struct RunningEvent {
    name: String,
    started: Instant,
}

/// A change to script globals made from outside a handler.
enum ScriptEdit {
    SetVars(VarMap),
    ResetVars,
}

impl ScriptEdit {
    fn apply(self, script: &mut dyn Script) {
        match self {
            ScriptEdit::SetVars(vars) => script.set_vars(vars),
            ScriptEdit::ResetVars => script.reset_vars(),
        }
    }
}

pub struct ScriptInstance {
    identity: InstanceIdentity,
    services: Services,
    limits: InstanceLimits,
    capabilities: CapabilityTable,
    script: Mutex<Box<dyn Script>>,
    /// Globals as of the last finished turn or edit.
    vars: Mutex<VarMap>,
    initial_vars: VarMap,
    /// Latest edit that found the script busy.
    pending_edit: Mutex<Option<ScriptEdit>>,
    mask_stale: AtomicBool,
    slot: Mutex<DispatchSlot>,
    state: RwLock<String>,
    start_param: AtomicI64,
    /// Detection snapshot of the executing event. Empty between events.
    detected: Mutex<Arc<[DetectParams]>>,
    current_event: Mutex<Option<RunningEvent>>,
    in_self_delete: AtomicBool,
    this: Weak<ScriptInstance>,
}

impl ScriptInstance {
    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn item_id(&self) -> Uuid {
        self.identity.item_id
    }

    pub fn local_id(&self) -> u32 {
        self.identity.local_id
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn limits(&self) -> InstanceLimits {
        self.limits
    }

    /// The script's current named state.
    pub fn state(&self) -> String {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace_state(&self, state: String) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_running(&self) -> bool {
        self.slot().running
    }

    /// `Scheduled` whenever a work handle is outstanding, including while a
    /// stop is waiting for the current event to finish.
    pub fn execution_state(&self) -> ExecutionState {
        let slot = self.slot();
        if slot.current.is_some() {
            ExecutionState::Scheduled
        } else if slot.running {
            ExecutionState::Idle
        } else {
            ExecutionState::Stopped
        }
    }

    pub fn start_param(&self) -> i64 {
        self.start_param.load(Ordering::SeqCst)
    }

    pub fn set_start_param(&self, value: i64) {
        self.start_param.store(value, Ordering::SeqCst);
    }

    pub fn is_self_deleting(&self) -> bool {
        self.in_self_delete.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.slot().queue.len()
    }

    /// Pending events, oldest first.
    pub fn queued_events(&self) -> Vec<EventRecord> {
        self.slot().queue.snapshot()
    }

    pub fn clear_queue(&self) {
        self.slot().queue.clear();
    }

    /// Name of the event being executed, if any.
    pub fn current_event(&self) -> Option<String> {
        lock(&self.current_event).as_ref().map(|e| e.name.clone())
    }

    /// How long the current event has been running. Zero between events.
    pub fn event_time(&self) -> Duration {
        lock(&self.current_event)
            .as_ref()
            .map(|e| e.started.elapsed())
            .unwrap_or_default()
    }

    pub fn detect_params(&self, idx: usize) -> Option<DetectParams> {
        lock(&self.detected).get(idx).cloned()
    }

    /// Key of the `idx`-th detected thing, or the nil id when out of range.
    pub fn detect_id(&self, idx: usize) -> Uuid {
        lock(&self.detected)
            .get(idx)
            .map(|d| d.key)
            .unwrap_or_else(Uuid::nil)
    }

    /// Script globals as of the end of the last turn. Never waits on a
    /// running handler.
    pub fn vars(&self) -> VarMap {
        lock(&self.vars).clone()
    }

    /// Replace the script globals. If a handler is running the change is
    /// visible through [`vars`](Self::vars) at once and reaches the script
    /// before its next event.
    pub fn set_vars(&self, vars: VarMap) {
        self.edit_script(ScriptEdit::SetVars(vars));
    }

    fn reset_vars(&self) {
        self.edit_script(ScriptEdit::ResetVars);
    }

    fn edit_script(&self, edit: ScriptEdit) {
        let mut pending = lock(&self.pending_edit);
        match self.try_script() {
            Some(mut script) => {
                *pending = None;
                edit.apply(&mut **script);
                *lock(&self.vars) = script.vars();
            }
            None => {
                debug!(item_id = %self.identity.item_id, "script busy, variable change deferred");
                *lock(&self.vars) = match &edit {
                    ScriptEdit::SetVars(vars) => vars.clone(),
                    ScriptEdit::ResetVars => self.initial_vars.clone(),
                };
                *pending = Some(edit);
            }
        }
    }

    /// Apply whatever was deferred while the script was busy and refresh the
    /// variable snapshot. Caller holds the script lock.
    fn settle_script(&self, script: &mut dyn Script) {
        let mut pending = lock(&self.pending_edit);
        if let Some(edit) = pending.take() {
            edit.apply(script);
        }
        if self.mask_stale.swap(false, Ordering::SeqCst) {
            self.send_event_mask(script.event_mask(&self.state()));
        }
        *lock(&self.vars) = script.vars();
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// Begin running. Requests a turn if events are already queued.
    pub fn start(&self) {
        let mut slot = self.slot();
        if slot.running {
            return;
        }
        slot.running = true;

        if !slot.queue.is_empty() {
            if slot.current.is_none() {
                self.request_dispatch(&mut slot);
            } else {
                warn!(item_id = %self.identity.item_id, "tried to start a script that was already queued");
            }
        }
    }

    /// Stop running. Always returns true, within roughly `timeout`.
    ///
    /// A queued turn is cancelled outright. A running one is given
    /// `timeout` to finish and is then aborted, unless the script is
    /// deleting its own entity.
    pub fn stop(&self, timeout: Duration) -> bool {
        let (ticket, handle) = {
            let mut slot = self.slot();
            if !slot.running {
                return true;
            }
            let Some(current) = slot.current.as_ref() else {
                slot.running = false;
                return true;
            };
            if current.handle.cancel() {
                slot.current = None;
                slot.running = false;
                return true;
            }
            let outstanding = (current.ticket, Arc::clone(&current.handle));
            slot.running = false;
            outstanding
        };

        if handle.wait(timeout) {
            return true;
        }

        if !self.slot().owns(ticket) {
            return true;
        }

        if self.is_self_deleting() {
            debug!(item_id = %self.identity.item_id, "forced abort suppressed during self-delete");
            metrics::forced_aborts().add(1, &[KeyValue::new("suppressed", "true")]);
        } else {
            warn!(
                item_id = %self.identity.item_id,
                timeout_ms = timeout.as_millis() as u64,
                "event did not finish in time, aborting"
            );
            handle.abort();
            metrics::forced_aborts().add(1, &[KeyValue::new("suppressed", "false")]);
        }

        let mut slot = self.slot();
        if slot.owns(ticket) {
            slot.current = None;
            self.clear_event_snapshot();
            // Restarted while we waited.
            if slot.running && !slot.queue.is_empty() {
                self.request_dispatch(&mut slot);
            }
        }
        true
    }

    /// Queue an event. Dropped if not running, if the queue is full, or if
    /// it is a timer and one is already pending.
    pub fn post_event(&self, record: EventRecord) -> Enqueue {
        let outcome = {
            let mut slot = self.slot();
            if !slot.running {
                Enqueue::NotRunning
            } else {
                let outcome = slot.queue.push(record);
                if outcome.is_accepted() && slot.current.is_none() {
                    self.request_dispatch(&mut slot);
                }
                outcome
            }
        };
        metrics::events_posted().add(1, &[KeyValue::new("result", outcome.as_str())]);
        outcome
    }

    /// Switch the script to `state` through the queue: `state_exit`, the
    /// switch itself, then `state_entry`.
    pub fn set_state(&self, state: impl Into<String>) {
        self.post_event(EventRecord::new(names::STATE_EXIT));
        self.post_event(EventRecord::set_state(state));
        self.post_event(EventRecord::state_entry());
    }

    /// Ask the pool for a turn. Caller holds the slot lock and has checked
    /// that nothing is outstanding.
    fn request_dispatch(&self, slot: &mut DispatchSlot) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        slot.next_ticket += 1;
        let ticket = slot.next_ticket;
        let handle = self
            .services
            .pool
            .dispatch(Box::new(move |interrupt| this.run_turn(ticket, interrupt)));
        slot.current = Some(Outstanding { ticket, handle });
        metrics::dispatch_requests().add(1, &[]);
    }

    /// Worker entry point: run one event, then hand the slot on.
    fn run_turn(&self, ticket: u64, interrupt: Interrupt) {
        let record = {
            let mut slot = self.slot();
            if !slot.owns(ticket) {
                debug!(item_id = %self.identity.item_id, ticket, "stale turn skipped");
                return;
            }
            let Some(record) = slot.queue.pop() else {
                slot.current = None;
                return;
            };
            *lock(&self.detected) = Arc::from(record.detect_params());
            if !record.is_set_state() {
                *lock(&self.current_event) = Some(RunningEvent {
                    name: record.name().to_string(),
                    started: Instant::now(),
                });
            }
            record
        };

        if record.is_set_state() {
            self.apply_state_change(&record);
        } else {
            self.execute(ticket, &record, &interrupt);
        }

        self.finish_turn(ticket);
    }

    /// Whether the turn holding `ticket` is still the outstanding one. A
    /// turn that outlived a forced abort is not.
    fn owns_turn(&self, ticket: u64) -> bool {
        self.slot().owns(ticket)
    }

    fn finish_turn(&self, ticket: u64) {
        let mut slot = self.slot();
        if !slot.owns(ticket) {
            debug!(item_id = %self.identity.item_id, ticket, "abandoned turn finished");
            return;
        }
        self.clear_event_snapshot();
        if slot.running && !slot.queue.is_empty() {
            self.request_dispatch(&mut slot);
        } else {
            slot.current = None;
        }
    }

    fn apply_state_change(&self, record: &EventRecord) {
        let Some(state) = record.args().first().map(|v| v.to_string()) else {
            warn!(item_id = %self.identity.item_id, "state change without a target state ignored");
            return;
        };
        debug!(item_id = %self.identity.item_id, %state, "script state changed");
        self.replace_state(state);
        self.services
            .plugins
            .remove_all_for_instance(self.identity.local_id, self.identity.item_id);
        self.publish_event_mask();
        metrics::events_executed().add(1, &[KeyValue::new("status", "set_state")]);
    }

    /// Detection data and name of the executing event. Caller holds the
    /// slot lock.
    fn clear_event_snapshot(&self) {
        *lock(&self.detected) = Arc::from(Vec::new());
        *lock(&self.current_event) = None;
    }

    /// Tell the world which events the current state handles. Deferred to
    /// the next turn while a handler holds the script.
    fn publish_event_mask(&self) {
        match self.try_script() {
            Some(script) => self.send_event_mask(script.event_mask(&self.state())),
            None => {
                debug!(item_id = %self.identity.item_id, "script busy, event mask update deferred");
                self.mask_stale.store(true, Ordering::SeqCst);
            }
        }
    }

    fn send_event_mask(&self, mask: EventMask) {
        self.services
            .world
            .set_script_events(self.identity.local_id, self.identity.item_id, mask);
    }

    fn try_script(&self) -> Option<MutexGuard<'_, Box<dyn Script>>> {
        match self.script.try_lock() {
            Ok(script) => Some(script),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn slot(&self) -> MutexGuard<'_, DispatchSlot> {
        lock(&self.slot)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
