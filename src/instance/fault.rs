//! Running one event handler and classifying how it ended.
//!
//! Nothing raised by a handler propagates out of a turn. Scheduling
//! outcomes (event abort, cancellation, self-delete) are silent; genuine
//! faults are logged and shown in-world, and the instance keeps going.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use super::{ScriptInstance, lock};
use crate::dispatch::Interrupt;
use crate::model::EventRecord;
use crate::script::{ExecContext, ExecStatus, ScriptFault, ScriptRequest};
use crate::telemetry::metrics;
use crate::telemetry::script::{record_exec_status, start_event_span};
use crate::world::{DEBUG_CHANNEL, VisibleMessage};

impl ScriptInstance {
    pub(super) fn execute(&self, ticket: u64, record: &EventRecord, interrupt: &Interrupt) {
        let started = Instant::now();
        let detected = lock(&self.detected).clone();

        let mut script = lock(&self.script);
        self.settle_script(&mut **script);
        let state = self.state();
        let span = start_event_span(&self.identity.item_id, record.name(), &state);
        let _entered = span.enter();

        let mut ctx = ExecContext::new(&self.identity, &self.capabilities, &detected, interrupt);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            script.execute(&state, record, &mut ctx)
        }))
        .unwrap_or_else(|payload| Err(fault_from_panic(payload)));
        let requests = ctx.into_requests();
        self.settle_script(&mut **script);
        drop(script);

        if self.owns_turn(ticket) {
            for request in requests {
                match request {
                    ScriptRequest::SetState(next) => self.set_state(next),
                    ScriptRequest::Reset => self.api_reset_script(),
                }
            }
        } else if !requests.is_empty() {
            debug!(
                item_id = %self.identity.item_id,
                event = record.name(),
                "requests from an aborted event dropped"
            );
        }

        let status = match outcome {
            Ok(ExecStatus::Completed) => ExecStatus::Completed.as_str(),
            Ok(ExecStatus::EventAborted) => {
                debug!(event = record.name(), "event aborted");
                ExecStatus::EventAborted.as_str()
            }
            Ok(ExecStatus::Cancelled) => {
                debug!(event = record.name(), "event cancelled");
                ExecStatus::Cancelled.as_str()
            }
            Ok(ExecStatus::SelfDelete) => {
                self.begin_self_delete();
                ExecStatus::SelfDelete.as_str()
            }
            Err(fault) => {
                self.report_fault(record, &fault);
                "fault"
            }
        };

        record_exec_status(&span, status);
        metrics::events_executed().add(1, &[KeyValue::new("status", status)]);
        metrics::event_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("event", record.name().to_string())],
        );
    }

    fn begin_self_delete(&self) {
        self.in_self_delete.store(true, Ordering::SeqCst);
        let Some(entity) = self.services.world.lookup_entity(self.identity.local_id) else {
            warn!(local_id = self.identity.local_id, "self-delete requested but entity is gone");
            return;
        };
        info!(
            item_id = %self.identity.item_id,
            entity_id = %entity.id,
            "script deleting its own entity"
        );
        if let Err(e) = self.services.world.delete_entity(&entity) {
            error!(entity_id = %entity.id, error = %e, "self-delete failed");
        }
    }

    fn report_fault(&self, record: &EventRecord, fault: &ScriptFault) {
        metrics::script_faults().add(1, &[]);
        error!(
            item_id = %self.identity.item_id,
            script = %self.identity,
            event = record.name(),
            error = %fault,
            detail = fault.detail.as_deref().unwrap_or(""),
            "script runtime error"
        );

        let Some(entity) = self.services.world.lookup_entity(self.identity.local_id) else {
            warn!(local_id = self.identity.local_id, "entity gone, runtime error not shown in-world");
            return;
        };
        let message = VisibleMessage {
            text: runtime_error_text(fault, self.limits.error_message_limit),
            channel: DEBUG_CHANNEL,
            position: entity.position,
            sender_name: entity.name.clone(),
            sender_id: entity.id,
        };
        if let Err(e) = self.services.world.deliver_visible_message(message) {
            error!(error = %e, fault = %fault, "error displaying runtime error in-world");
        }
    }
}

/// In-world text for a fault, cut to `limit` characters.
pub fn runtime_error_text(fault: &ScriptFault, limit: usize) -> String {
    let mut text = format!("Runtime error:\n{fault}");
    if let Some(detail) = &fault.detail {
        text.push('\n');
        text.push_str(detail);
    }
    if let Some((cut, _)) = text.char_indices().nth(limit) {
        text.truncate(cut);
    }
    text
}

fn fault_from_panic(payload: Box<dyn Any + Send>) -> ScriptFault {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "event handler panicked".to_string()
    };
    ScriptFault::new(message)
}
