//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use script_engine::capability::CapabilityRegistry;
use script_engine::dispatch::{Interrupt, Job, WorkHandle, WorkerPool};
use script_engine::error::Result;
use script_engine::instance::{InstanceLimits, ScriptInstance, Services};
use script_engine::model::{EventRecord, InstanceIdentity, LoadRequest, Value, VarMap};
use script_engine::script::{EventMask, ExecContext, ExecStatus, Script, ScriptFault};
use script_engine::state::{MemoryStateStore, StateStore};
use script_engine::world::{EntityHandle, PluginData, VisibleMessage, World};
use uuid::Uuid;

pub const LOCAL_ID: u32 = 42;

// ---------------------------------------------------------------------------
// Manual worker pool: jobs run only when the test says so
// ---------------------------------------------------------------------------

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;
const DONE: u8 = 3;

#[derive(Default)]
pub struct ManualHandle {
    phase: AtomicU8,
    interrupt: Interrupt,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    pub aborted: AtomicBool,
}

impl ManualHandle {
    fn finish(&self, phase: u8) {
        self.phase.store(phase, Ordering::SeqCst);
        *self.finished.lock().unwrap() = true;
        self.finished_cv.notify_all();
    }
}

impl WorkHandle for ManualHandle {
    fn cancel(&self) -> bool {
        let ok = self
            .phase
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if ok {
            self.finish(CANCELLED);
        }
        ok
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.interrupt.trigger();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.finished.lock().unwrap();
        let (guard, _) = self
            .finished_cv
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap();
        *guard
    }
}

#[derive(Default)]
pub struct ManualPool {
    jobs: Mutex<VecDeque<(Job, Arc<ManualHandle>)>>,
    handles: Mutex<Vec<Arc<ManualHandle>>>,
    dispatched: AtomicUsize,
}

impl ManualPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total dispatch requests seen.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Handle of the most recent dispatch.
    pub fn last_handle(&self) -> Arc<ManualHandle> {
        Arc::clone(self.handles.lock().unwrap().last().expect("nothing dispatched"))
    }

    /// Jobs waiting to run, cancelled ones excluded.
    pub fn pending(&self) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, h)| h.phase.load(Ordering::SeqCst) == QUEUED)
            .count()
    }

    /// Run the oldest live job. False if none was left.
    pub fn run_next(&self) -> bool {
        loop {
            let Some((job, handle)) = self.jobs.lock().unwrap().pop_front() else {
                return false;
            };
            if handle
                .phase
                .compare_exchange(QUEUED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            job(handle.interrupt.clone());
            handle.finish(DONE);
            return true;
        }
    }

    /// Drain until idle. Returns how many jobs ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl WorkerPool for ManualPool {
    fn dispatch(&self, job: Job) -> Arc<dyn WorkHandle> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(ManualHandle::default());
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        self.jobs.lock().unwrap().push_back((job, Arc::clone(&handle)));
        handle
    }
}

// ---------------------------------------------------------------------------
// World and plugin data
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingWorld {
    pub entities: Mutex<HashMap<u32, EntityHandle>>,
    pub messages: Mutex<Vec<VisibleMessage>>,
    pub deleted: Mutex<Vec<Uuid>>,
    pub masks: Mutex<Vec<(Uuid, EventMask)>>,
    pub permission_resets: Mutex<Vec<Uuid>>,
    /// While set, `delete_entity` blocks.
    pub hold_delete: Arc<AtomicBool>,
    pub delete_started: AtomicBool,
    /// While set, in-world messages fail to deliver.
    pub refuse_messages: AtomicBool,
}

impl RecordingWorld {
    pub fn with_entity(local_id: u32) -> Arc<Self> {
        let world = Self::default();
        world.entities.lock().unwrap().insert(
            local_id,
            EntityHandle {
                local_id,
                id: Uuid::new_v4(),
                name: "Test Object".to_string(),
                position: [128.0, 128.0, 25.0],
            },
        );
        Arc::new(world)
    }

    pub fn entity(&self, local_id: u32) -> EntityHandle {
        self.entities.lock().unwrap()[&local_id].clone()
    }
}

impl World for RecordingWorld {
    fn lookup_entity(&self, local_id: u32) -> Option<EntityHandle> {
        self.entities.lock().unwrap().get(&local_id).cloned()
    }

    fn deliver_visible_message(&self, message: VisibleMessage) -> Result<()> {
        if self.refuse_messages.load(Ordering::SeqCst) {
            return Err(script_engine::error::Error::World(format!(
                "channel {} unavailable",
                message.channel
            )));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    fn delete_entity(&self, entity: &EntityHandle) -> Result<()> {
        self.delete_started.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.hold_delete.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        self.deleted.lock().unwrap().push(entity.id);
        Ok(())
    }

    fn set_script_events(&self, _local_id: u32, item_id: Uuid, mask: EventMask) {
        self.masks.lock().unwrap().push((item_id, mask));
    }

    fn clear_script_permissions(&self, _local_id: u32, item_id: Uuid) {
        self.permission_resets.lock().unwrap().push(item_id);
    }
}

#[derive(Default)]
pub struct RecordingPlugins {
    pub exported: Mutex<HashMap<Uuid, Vec<u8>>>,
    pub imported: Mutex<Vec<(Uuid, Vec<u8>)>>,
    pub removals: AtomicUsize,
}

impl PluginData for RecordingPlugins {
    fn export_serialization_data(&self, item_id: Uuid) -> Vec<u8> {
        self.exported
            .lock()
            .unwrap()
            .get(&item_id)
            .cloned()
            .unwrap_or_default()
    }

    fn import_serialization_data(&self, _local_id: u32, item_id: Uuid, _entity_id: Uuid, data: &[u8]) {
        self.imported.lock().unwrap().push((item_id, data.to_vec()));
    }

    fn remove_all_for_instance(&self, _local_id: u32, _item_id: Uuid) {
        self.removals.fetch_add(1, Ordering::SeqCst);
    }
}

/// A store whose writes vanish.
#[derive(Default)]
pub struct BlackholeStore;

impl StateStore for BlackholeStore {
    fn size(&self, _item_id: Uuid) -> Result<Option<u64>> {
        Ok(None)
    }

    fn read(&self, item_id: Uuid) -> Result<Vec<u8>> {
        Err(script_engine::error::Error::Other(format!("nothing for {item_id}")))
    }

    fn write(&self, _item_id: Uuid, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn exists(&self, _item_id: Uuid) -> bool {
        false
    }

    fn remove(&self, _item_id: Uuid) -> Result<()> {
        Err(script_engine::error::Error::Other("read-only".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Test script
// ---------------------------------------------------------------------------

/// What the test script does when it receives an event.
#[derive(Clone)]
pub enum Behavior {
    Complete,
    Fault(String),
    Panic(String),
    SelfDelete,
    Abort,
    /// Return `Cancelled` straight away.
    Cancel,
    /// Set a variable, then complete.
    SetVar(String, Value),
    /// Ask for a state change and abort the event.
    ChangeState(String),
    /// Ask for a script reset.
    Reset,
    /// Loop until `release` is set or the interrupt trips. Records whether
    /// the interrupt was seen.
    Spin {
        release: Arc<AtomicBool>,
        entered: Arc<AtomicBool>,
        interrupted: Arc<AtomicBool>,
    },
    /// Loop until `release` is set, ignoring the interrupt.
    Stubborn {
        release: Arc<AtomicBool>,
        entered: Arc<AtomicBool>,
    },
    /// Count handler bodies running at once and keep the highest count.
    Track {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    },
}

#[derive(Clone, Default)]
pub struct ScriptLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ScriptLog {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

pub struct TestScript {
    log: ScriptLog,
    behaviors: HashMap<String, Behavior>,
    vars: VarMap,
    initial: VarMap,
}

impl TestScript {
    pub fn new(log: &ScriptLog) -> Self {
        let mut initial = VarMap::new();
        initial.insert("counter".to_string(), Value::Integer(0));
        Self {
            log: log.clone(),
            behaviors: HashMap::new(),
            vars: initial.clone(),
            initial,
        }
    }

    pub fn on(mut self, event: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(event.to_string(), behavior);
        self
    }

    pub fn boxed(self) -> Box<dyn Script> {
        Box::new(self)
    }
}

impl Script for TestScript {
    fn execute(
        &mut self,
        state: &str,
        event: &EventRecord,
        ctx: &mut ExecContext<'_>,
    ) -> std::result::Result<ExecStatus, ScriptFault> {
        let args: Vec<String> = event.args().iter().map(|a| a.to_string()).collect();
        if args.is_empty() {
            self.log.push(format!("{state}:{}", event.name()));
        } else {
            self.log.push(format!("{state}:{}({})", event.name(), args.join(",")));
        }
        if let Some(first) = ctx.detected().first() {
            self.log.push(format!("detected:{}", first.name));
        }

        match self.behaviors.get(event.name()).cloned().unwrap_or(Behavior::Complete) {
            Behavior::Complete => Ok(ExecStatus::Completed),
            Behavior::Fault(msg) => Err(ScriptFault::new(msg)),
            Behavior::Panic(msg) => panic!("{msg}"),
            Behavior::SelfDelete => Ok(ExecStatus::SelfDelete),
            Behavior::Abort => Ok(ExecStatus::EventAborted),
            Behavior::Cancel => Ok(ExecStatus::Cancelled),
            Behavior::SetVar(name, value) => {
                self.vars.insert(name, value);
                Ok(ExecStatus::Completed)
            }
            Behavior::ChangeState(next) => {
                ctx.set_state(next);
                Ok(ExecStatus::EventAborted)
            }
            Behavior::Reset => {
                ctx.reset();
                Ok(ExecStatus::Completed)
            }
            Behavior::Spin {
                release,
                entered,
                interrupted,
            } => {
                entered.store(true, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while !release.load(Ordering::SeqCst) && Instant::now() < deadline {
                    if ctx.is_interrupted() {
                        interrupted.store(true, Ordering::SeqCst);
                        return Ok(ExecStatus::Cancelled);
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Ok(ExecStatus::Completed)
            }
            Behavior::Stubborn { release, entered } => {
                entered.store(true, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while !release.load(Ordering::SeqCst) && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Ok(ExecStatus::Completed)
            }
            Behavior::Track { in_flight, peak } => {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_micros(500));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(ExecStatus::Completed)
            }
        }
    }

    fn event_mask(&self, state: &str) -> EventMask {
        EventMask(state.len() as u64)
    }

    fn vars(&self) -> VarMap {
        self.vars.clone()
    }

    fn set_vars(&mut self, vars: VarMap) {
        self.vars = vars;
    }

    fn reset_vars(&mut self) {
        self.vars = self.initial.clone();
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub pool: Arc<ManualPool>,
    pub world: Arc<RecordingWorld>,
    pub plugins: Arc<RecordingPlugins>,
    pub store: Arc<MemoryStateStore>,
    pub log: ScriptLog,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            pool: ManualPool::new(),
            world: RecordingWorld::with_entity(LOCAL_ID),
            plugins: Arc::new(RecordingPlugins::default()),
            store: Arc::new(MemoryStateStore::new()),
            log: ScriptLog::default(),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            pool: self.pool.clone(),
            world: self.world.clone(),
            plugins: self.plugins.clone(),
            store: self.store.clone(),
        }
    }

    pub fn script(&self) -> TestScript {
        TestScript::new(&self.log)
    }

    pub fn load(&self, request: LoadRequest, script: TestScript) -> Arc<ScriptInstance> {
        self.load_with(request, script, InstanceLimits::default())
    }

    pub fn load_with(
        &self,
        request: LoadRequest,
        script: TestScript,
        limits: InstanceLimits,
    ) -> Arc<ScriptInstance> {
        load_with_services(self.services(), request, script, limits)
    }
}

pub fn load_with_services(
    services: Services,
    request: LoadRequest,
    script: TestScript,
    limits: InstanceLimits,
) -> Arc<ScriptInstance> {
    ScriptInstance::load(
        request,
        script.boxed(),
        services,
        limits,
        &CapabilityRegistry::empty(),
    )
    .expect("load script instance")
}

pub fn identity() -> InstanceIdentity {
    InstanceIdentity::new(LOCAL_ID, Uuid::new_v4(), Uuid::new_v4()).names("Test Object", "test script")
}

pub fn request() -> LoadRequest {
    LoadRequest::new(identity())
}

pub fn limits(queue_capacity: usize) -> InstanceLimits {
    InstanceLimits {
        queue_capacity,
        ..InstanceLimits::default()
    }
}

pub fn spin() -> (Behavior, Arc<AtomicBool>, Arc<AtomicBool>, Arc<AtomicBool>) {
    let release = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));
    let interrupted = Arc::new(AtomicBool::new(false));
    (
        Behavior::Spin {
            release: Arc::clone(&release),
            entered: Arc::clone(&entered),
            interrupted: Arc::clone(&interrupted),
        },
        release,
        entered,
        interrupted,
    )
}

pub fn stubborn() -> (Behavior, Arc<AtomicBool>, Arc<AtomicBool>) {
    let release = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));
    (
        Behavior::Stubborn {
            release: Arc::clone(&release),
            entered: Arc::clone(&entered),
        },
        release,
        entered,
    )
}

/// Poll until `cond` holds or two seconds pass.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    wait_for(Duration::from_secs(2), cond)
}

pub fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
