//! Tracer and logging configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Configuration for a [`Tracer`](crate::Tracer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Service name stamped on every span this tracer creates.
    pub service_name: String,

    /// Age after which an active span is reported as stale.
    pub stale_span_threshold: Duration,

    /// Forward completed traces to the `tracing` pipeline.
    pub log_completed_traces: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service_name: "strand".to_string(),
            stale_span_threshold: Duration::from_secs(300),
            log_completed_traces: false,
        }
    }
}

impl TracerConfig {
    /// Create config for a specific service
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the stale span threshold
    pub fn with_stale_span_threshold(mut self, threshold: Duration) -> Self {
        self.stale_span_threshold = threshold;
        self
    }

    /// Log every completed trace
    pub fn with_completed_trace_logging(mut self) -> Self {
        self.log_completed_traces = true;
        self
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,

    /// Include the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Set log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Enable JSON format
    pub fn with_json_format(mut self) -> Self {
        self.json_format = true;
        self
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    pub tracer: TracerConfig,
    pub logging: LoggingConfig,
}

impl StrandConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
