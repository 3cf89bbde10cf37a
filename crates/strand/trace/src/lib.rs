//! Strand Trace
//!
//! Distributed tracing for multi-agent systems.
//!
//! ## Features
//!
//! - **Spans**: timed, tagged units of work with structured log events
//! - **Context**: immutable trace contexts with baggage and header propagation
//! - **Collection**: thread-safe grouping of spans into traces with automatic completion
//! - **Tracer**: scoped span execution for sync and async code, with a per-thread/per-task current context
//! - **Agents**: convenience scopes for agent operations, collaboration, memory and tasks

pub mod agent;
pub mod collector;
pub mod config;
pub mod context;
pub mod conventions;
pub mod error;
pub mod export;
pub mod ids;
pub mod span;
pub mod telemetry;
pub mod tracer;

pub use agent::AgentTracer;
pub use collector::{
    SpanAdmission, TraceCollector, TraceProgress, TraceRecord, TraceStatistics, TraceStatus,
};
pub use config::{LoggingConfig, StrandConfig, TracerConfig};
pub use context::{
    TraceContext, BAGGAGE_HEADER_PREFIX, CORRELATION_ID_HEADER, PARENT_SPAN_ID_HEADER,
    SPAN_ID_HEADER, TRACE_ID_HEADER,
};
pub use error::{Result, TraceError};
pub use export::{InMemoryExporter, LogExporter, TraceExporter};
pub use ids::{CorrelationId, SpanId, TraceId};
pub use span::{Fields, Span, SpanBuilder, SpanLog, SpanStatus, TagValue};
pub use telemetry::init_logging;
pub use tracer::{ContextGuard, SpanOptions, SpanScope, Tracer};
