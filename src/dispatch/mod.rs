//! Worker-pool dispatch contract.
//!
//! An instance asks the pool to run one of its turns and gets back a
//! [`WorkHandle`]. The pool decides when and on which worker the turn runs;
//! there is no ordering between different instances' turns.

pub mod pool;

pub use pool::TokioWorkerPool;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One unit of work handed to the pool. Receives the interrupt flag that
/// [`WorkHandle::abort`] trips.
pub type Job = Box<dyn FnOnce(Interrupt) + Send + 'static>;

/// Shared pool of execution workers.
///
/// `dispatch` must not block and must never run the job on the calling
/// thread: instances call it while holding their own lock.
pub trait WorkerPool: Send + Sync {
    fn dispatch(&self, job: Job) -> Arc<dyn WorkHandle>;
}

/// Token for one dispatched turn.
pub trait WorkHandle: Send + Sync {
    /// Pull the job back before it starts. False once execution has begun.
    fn cancel(&self) -> bool;

    /// Forcibly stop an in-progress execution. Partial side effects are not
    /// rolled back.
    fn abort(&self);

    /// Block up to `timeout` for the job to finish. True if it did.
    fn wait(&self, timeout: Duration) -> bool;
}

/// Abort flag shared between a work handle and the job it runs.
///
/// Rust cannot kill a thread, so forced abort is delivered here and the
/// running script polls it.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
