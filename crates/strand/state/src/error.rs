//! Error types for strand-state.
//!
//! Replay of an unknown trace is an error. A missing snapshot is not: the
//! snapshotter reports it as `Ok(None)` so callers fall back to empty state.

use strand_trace::{TraceError, TraceId};
use thiserror::Error;

use crate::ids::SnapshotId;

/// Errors raised by snapshot storage, the snapshotter and replay.
#[derive(Debug, Error)]
pub enum StateError {
    /// The collector has no record of the trace, active or completed.
    #[error("trace not found: {0}")]
    TraceNotFound(TraceId),

    /// Snapshot not found.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// Stored snapshot content does not match its hash.
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
