//! Typed engine configuration.
//!
//! Loads once at startup from environment variables or a TOML file and
//! fails fast on missing or malformed values.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_EVENT_QUEUE: usize = 300;
pub const DEFAULT_MAX_STATE_BYTES: u64 = 512_000;
pub const DEFAULT_ERROR_MESSAGE_LIMIT: usize = 1400;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_WORKER_THREADS: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where persisted script state lives.
    pub state_dir: PathBuf,
    /// Per-instance event queue capacity.
    pub max_event_queue: usize,
    /// State documents at or above this size are not loaded.
    pub max_state_bytes: u64,
    /// In-world runtime error messages are cut to this many characters.
    pub error_message_limit: usize,
    pub stop_timeout_ms: u64,
    pub worker_threads: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("script-state"),
            max_event_queue: DEFAULT_MAX_EVENT_QUEUE,
            max_state_bytes: DEFAULT_MAX_STATE_BYTES,
            error_message_limit: DEFAULT_ERROR_MESSAGE_LIMIT,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            state_dir: PathBuf::from(required_var("SCRIPT_STATE_DIR")?),
            max_event_queue: parsed_var("SCRIPT_MAX_EVENT_QUEUE", DEFAULT_MAX_EVENT_QUEUE)?,
            max_state_bytes: parsed_var("SCRIPT_MAX_STATE_BYTES", DEFAULT_MAX_STATE_BYTES)?,
            error_message_limit: parsed_var(
                "SCRIPT_ERROR_MESSAGE_LIMIT",
                DEFAULT_ERROR_MESSAGE_LIMIT,
            )?,
            stop_timeout_ms: parsed_var("SCRIPT_STOP_TIMEOUT_MS", DEFAULT_STOP_TIMEOUT_MS)?,
            worker_threads: parsed_var("SCRIPT_WORKER_THREADS", DEFAULT_WORKER_THREADS)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad engine config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read engine config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
