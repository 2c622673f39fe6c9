//! # script-engine
//!
//! Execution engine for event-driven script instances attached to
//! simulated objects.
//!
//! Provides per-instance event queues with at-most-one-in-flight dispatch
//! onto a shared worker pool, two-tier cancellation, state persistence with
//! recovery fallbacks, and OpenTelemetry observability.

pub mod capability;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod instance;
pub mod model;
pub mod queue;
pub mod script;
pub mod state;
pub mod telemetry;
pub mod world;
