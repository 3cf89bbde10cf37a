//! Export hooks for completed traces.
//!
//! Storage backends live behind [`TraceExporter`]; the collector calls every
//! registered exporter once per trace, after the trace has been archived.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::collector::TraceRecord;

/// Sink for completed traces.
pub trait TraceExporter: Send + Sync {
    /// Receive a trace that just completed.
    fn export(&self, trace: &Arc<TraceRecord>);
}

/// Keeps exported traces in memory.
#[derive(Default)]
pub struct InMemoryExporter {
    traces: RwLock<Vec<Arc<TraceRecord>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All traces exported so far, in completion order.
    pub fn traces(&self) -> Vec<Arc<TraceRecord>> {
        self.traces.read().clone()
    }

    pub fn len(&self) -> usize {
        self.traces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.read().is_empty()
    }

    pub fn clear(&self) {
        self.traces.write().clear();
    }
}

impl TraceExporter for InMemoryExporter {
    fn export(&self, trace: &Arc<TraceRecord>) {
        self.traces.write().push(Arc::clone(trace));
    }
}

/// Emits one `tracing` event per completed trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl TraceExporter for LogExporter {
    fn export(&self, trace: &Arc<TraceRecord>) {
        let errors = trace
            .spans
            .iter()
            .filter(|s| s.status() == crate::span::SpanStatus::Error)
            .count();
        let root = trace
            .root_span()
            .map(|s| s.operation_name())
            .unwrap_or("<detached>");

        info!(
            trace_id = %trace.trace_id,
            root_operation = root,
            spans = trace.spans.len(),
            errors,
            "trace completed"
        );
    }
}
