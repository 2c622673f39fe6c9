//! Metric instrument factories for script-engine.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"script-engine"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for script-engine instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("script-engine")
}

/// Counter: events posted to instances.
/// Labels: `result` ("accepted" | "full" | "coalesced" | "not_running").
pub fn events_posted() -> Counter<u64> {
    meter()
        .u64_counter("script.events.posted")
        .with_description("Number of events posted to script instances")
        .build()
}

/// Counter: dispatch requests made to the worker pool.
pub fn dispatch_requests() -> Counter<u64> {
    meter()
        .u64_counter("script.dispatch.requests")
        .with_description("Number of worker pool dispatch requests")
        .build()
}

/// Counter: events taken off a queue and run.
/// Labels: `status` ("completed" | "event_aborted" | "self_delete" | "cancelled" | "fault" | "set_state").
pub fn events_executed() -> Counter<u64> {
    meter()
        .u64_counter("script.events.executed")
        .with_description("Number of events executed")
        .build()
}

/// Histogram: event handler duration in milliseconds.
/// Labels: `event`.
pub fn event_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("script.event.duration_ms")
        .with_description("Event handler duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: runtime faults raised by event handlers.
pub fn script_faults() -> Counter<u64> {
    meter()
        .u64_counter("script.faults")
        .with_description("Number of script runtime faults")
        .build()
}

/// Counter: forced aborts issued by `stop` after a timed-out wait.
/// Labels: `suppressed` ("true" when skipped during self-delete).
pub fn forced_aborts() -> Counter<u64> {
    meter()
        .u64_counter("script.stop.forced_aborts")
        .with_description("Number of forced aborts after stop timeouts")
        .build()
}

/// Counter: state saves.
/// Labels: `result` ("ok" | "error").
pub fn state_saves() -> Counter<u64> {
    meter()
        .u64_counter("script.state.saves")
        .with_description("Number of script state saves")
        .build()
}

/// Counter: how instances came back at load time.
/// Labels: `path` ("fresh" | "restored" | "oversized" | "malformed").
pub fn state_recoveries() -> Counter<u64> {
    meter()
        .u64_counter("script.state.recoveries")
        .with_description("Script state recovery outcomes")
        .build()
}
