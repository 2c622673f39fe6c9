//! Worker pool backed by the tokio blocking thread pool.
//!
//! Script turns are synchronous code, so they run on blocking threads.
//! `max_blocking_threads` bounds how many run at once; the rest wait in
//! tokio's queue, where they can still be cancelled.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

use super::{Interrupt, Job, WorkHandle, WorkerPool};
use crate::error::Result;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

pub struct TokioWorkerPool {
    /// Present when the pool owns its runtime.
    runtime: Option<Runtime>,
    handle: Handle,
}

impl TokioWorkerPool {
    /// Build a dedicated runtime with at most `workers` concurrent turns.
    pub fn new(workers: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers.max(1))
            .thread_name("script-worker")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        debug!(workers, "script worker pool started");
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Run turns on an existing runtime's blocking pool.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
        }
    }
}

impl WorkerPool for TokioWorkerPool {
    fn dispatch(&self, job: Job) -> Arc<dyn WorkHandle> {
        let ticket = Arc::new(PoolTicket::default());
        let worker_ticket = Arc::clone(&ticket);
        self.handle.spawn_blocking(move || worker_ticket.run(job));
        ticket
    }
}

impl Drop for TokioWorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Shared between the worker running the job and whoever holds the handle.
#[derive(Default)]
struct PoolTicket {
    phase: AtomicU8,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    interrupt: Interrupt,
}

impl PoolTicket {
    fn run(&self, job: Job) {
        if self
            .phase
            .compare_exchange(QUEUED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _done = FinishGuard(self);
        job(self.interrupt.clone());
    }

    fn finish(&self, phase: u8) {
        self.phase.store(phase, Ordering::SeqCst);
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        *finished = true;
        self.finished_cv.notify_all();
    }
}

/// Marks the ticket done even if the job unwinds.
struct FinishGuard<'a>(&'a PoolTicket);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish(DONE);
    }
}

impl WorkHandle for PoolTicket {
    fn cancel(&self) -> bool {
        let cancelled = self
            .phase
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cancelled {
            self.finish(CANCELLED);
        }
        cancelled
    }

    fn abort(&self) {
        if self.cancel() {
            return;
        }
        if self.phase.load(Ordering::SeqCst) == RUNNING {
            warn!("aborting running script turn");
            self.interrupt.trigger();
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        let (finished, _) = self
            .finished_cv
            .wait_timeout_while(finished, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *finished
    }
}
