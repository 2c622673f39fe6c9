//! Event execution span helpers.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one event delivered to one script instance.
///
/// The `script.status` field is declared empty and filled by
/// [`record_exec_status`].
pub fn start_event_span(item_id: &Uuid, event: &str, state: &str) -> Span {
    tracing::info_span!(
        "script.event",
        "script.item_id" = %item_id,
        "script.event" = event,
        "script.state" = state,
        "script.status" = tracing::field::Empty,
    )
}

/// Record how the handler ended.
pub fn record_exec_status(span: &Span, status: &str) {
    span.record("script.status", status);
}
