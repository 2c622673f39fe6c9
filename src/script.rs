//! The contract a compiled script program fulfils.
//!
//! Event handlers report how they ended through [`ExecStatus`]. Only genuine
//! runtime faults travel as errors ([`ScriptFault`]).

use thiserror::Error;

use crate::capability::CapabilityTable;
use crate::dispatch::Interrupt;
use crate::model::{DetectParams, EventRecord, InstanceIdentity, VarMap};

/// How an event handler ended, when it did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Completed,
    /// The handler bailed out early, e.g. after a state change.
    EventAborted,
    /// The handler asked for its own entity to be deleted.
    SelfDelete,
    /// The handler noticed the interrupt flag and stopped.
    Cancelled,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Completed => "completed",
            ExecStatus::EventAborted => "event_aborted",
            ExecStatus::SelfDelete => "self_delete",
            ExecStatus::Cancelled => "cancelled",
        }
    }
}

/// A runtime fault inside an event handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptFault {
    pub message: String,
    /// Extra diagnostic text, e.g. a script-level backtrace.
    pub detail: Option<String>,
}

impl ScriptFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Bit set of events a state has handlers for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventMask(pub u64);

/// Requests a handler makes of its own instance. Applied once the handler
/// returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptRequest {
    SetState(String),
    Reset,
}

/// Everything a handler may touch while it runs.
pub struct ExecContext<'a> {
    identity: &'a InstanceIdentity,
    capabilities: &'a CapabilityTable,
    detected: &'a [DetectParams],
    interrupt: &'a Interrupt,
    requests: Vec<ScriptRequest>,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        identity: &'a InstanceIdentity,
        capabilities: &'a CapabilityTable,
        detected: &'a [DetectParams],
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            identity,
            capabilities,
            detected,
            interrupt,
            requests: Vec::new(),
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        self.identity
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        self.capabilities
    }

    pub fn detected(&self) -> &[DetectParams] {
        self.detected
    }

    /// Long-running handlers should poll this and return
    /// [`ExecStatus::Cancelled`] once it is set.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_triggered()
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.requests.push(ScriptRequest::SetState(state.into()));
    }

    pub fn reset(&mut self) {
        self.requests.push(ScriptRequest::Reset);
    }

    pub fn into_requests(self) -> Vec<ScriptRequest> {
        self.requests
    }
}

/// A loaded script program.
pub trait Script: Send {
    fn execute(
        &mut self,
        state: &str,
        event: &EventRecord,
        ctx: &mut ExecContext<'_>,
    ) -> Result<ExecStatus, ScriptFault>;

    fn event_mask(&self, state: &str) -> EventMask;

    fn vars(&self) -> VarMap;

    fn set_vars(&mut self, vars: VarMap);

    /// Restore every global to its initial value.
    fn reset_vars(&mut self);
}
