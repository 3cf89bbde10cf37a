//! Error types for strand-trace.
//!
//! Usage errors (mutating or re-finishing a finished span) are reported as
//! errors rather than ignored.

use thiserror::Error;

use crate::ids::{SpanId, TraceId};
use crate::span::SpanStatus;

/// Errors raised by spans, the collector and the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// A tag or log event was added to a span that already finished.
    #[error("span {0} is finished and can no longer be modified")]
    SpanFinished(SpanId),

    /// `finish` was called on a span that already finished.
    #[error("span {span_id} already finished with status {status}")]
    AlreadyFinished { span_id: SpanId, status: SpanStatus },

    /// A span can only be finished with a terminal status.
    #[error("invalid terminal status for span {0}: active")]
    InvalidStatus(SpanId),

    /// The collector has no record of the span.
    #[error("span not found: {0}")]
    SpanNotFound(SpanId),

    /// The trace was already archived; it cannot accept new spans.
    #[error("trace {0} is already completed")]
    TraceCompleted(TraceId),

    /// The context carries no span to operate on.
    #[error("context for trace {0} has no active span")]
    NoActiveSpan(TraceId),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The logging subscriber could not be installed.
    #[error("subscriber error: {0}")]
    Subscriber(String),
}

impl From<serde_json::Error> for TraceError {
    fn from(err: serde_json::Error) -> Self {
        TraceError::Config(err.to_string())
    }
}

/// Result type for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;
