//! Trace context propagation.
//!
//! A [`TraceContext`] is an immutable value: deriving a child span or setting
//! a baggage item always produces a new context and never touches the
//! original. Baggage is shared copy-on-write between a context and its
//! descendants until one of them writes to it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::ids::{CorrelationId, SpanId, TraceId};

/// Header carrying the trace id.
pub const TRACE_ID_HEADER: &str = "trace-id";
/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";
/// Header carrying the current span id.
pub const SPAN_ID_HEADER: &str = "span-id";
/// Header carrying the parent span id, when there is one.
pub const PARENT_SPAN_ID_HEADER: &str = "parent-span-id";
/// Prefix for one header per baggage item.
pub const BAGGAGE_HEADER_PREFIX: &str = "baggage-";

/// Identity of a trace and the active span lineage within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    trace_id: TraceId,
    correlation_id: CorrelationId,
    /// Span ids, outermost first.
    span_stack: Vec<SpanId>,
    baggage: Arc<BTreeMap<String, String>>,
}

impl TraceContext {
    /// Create a context with an empty span stack.
    pub fn new(trace_id: TraceId, correlation_id: CorrelationId) -> Self {
        Self {
            trace_id,
            correlation_id,
            span_stack: Vec::new(),
            baggage: Arc::new(BTreeMap::new()),
        }
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn span_stack(&self) -> &[SpanId] {
        &self.span_stack
    }

    /// The current span: last element of the stack.
    pub fn span_id(&self) -> Option<&SpanId> {
        self.span_stack.last()
    }

    /// The direct parent of the current span: second-to-last element.
    pub fn parent_span_id(&self) -> Option<&SpanId> {
        self.span_stack.len().checked_sub(2).map(|i| &self.span_stack[i])
    }

    pub fn baggage(&self) -> &BTreeMap<String, String> {
        &self.baggage
    }

    pub fn get_baggage_item(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// Derive a child context whose stack ends with `span_id`.
    #[must_use]
    pub fn with_span(&self, span_id: SpanId) -> Self {
        let mut span_stack = Vec::with_capacity(self.span_stack.len() + 1);
        span_stack.extend_from_slice(&self.span_stack);
        span_stack.push(span_id);

        Self {
            trace_id: self.trace_id.clone(),
            correlation_id: self.correlation_id.clone(),
            span_stack,
            baggage: Arc::clone(&self.baggage),
        }
    }

    /// Return a copy of this context with one baggage item set.
    #[must_use]
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.baggage).insert(key.into(), value.into());
        next
    }

    /// Return a copy of this context with several baggage items set.
    #[must_use]
    pub fn with_baggage<I, K, V>(&self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        let baggage = Arc::make_mut(&mut next.baggage);
        for (key, value) in items {
            baggage.insert(key.into(), value.into());
        }
        next
    }

    /// Serialize to the flat propagation header map.
    ///
    /// A context without a current span produces no `span-id` header and will
    /// not deserialize on the receiving side.
    pub fn to_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::with_capacity(4 + self.baggage.len());
        headers.insert(TRACE_ID_HEADER.to_string(), self.trace_id.to_string());
        headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            self.correlation_id.to_string(),
        );
        if let Some(span_id) = self.span_id() {
            headers.insert(SPAN_ID_HEADER.to_string(), span_id.to_string());
        }
        if let Some(parent) = self.parent_span_id() {
            headers.insert(PARENT_SPAN_ID_HEADER.to_string(), parent.to_string());
        }
        for (key, value) in self.baggage.iter() {
            headers.insert(format!("{BAGGAGE_HEADER_PREFIX}{key}"), value.clone());
        }
        headers
    }

    /// Rebuild a context from propagation headers.
    ///
    /// Returns `None` when the trace id, correlation id or span id is missing
    /// or empty. Only direct lineage survives transport: the stack is
    /// `[parent, current]` or `[current]`.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        let required = |key: &str| headers.get(key).filter(|v| !v.is_empty());

        let trace_id = required(TRACE_ID_HEADER)?;
        let correlation_id = required(CORRELATION_ID_HEADER)?;
        let span_id = required(SPAN_ID_HEADER)?;

        let mut span_stack = Vec::with_capacity(2);
        if let Some(parent) = required(PARENT_SPAN_ID_HEADER) {
            span_stack.push(SpanId::from(parent.as_str()));
        }
        span_stack.push(SpanId::from(span_id.as_str()));

        let baggage: BTreeMap<String, String> = headers
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(BAGGAGE_HEADER_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        Some(Self {
            trace_id: TraceId::from(trace_id.as_str()),
            correlation_id: CorrelationId::from(correlation_id.as_str()),
            span_stack,
            baggage: Arc::new(baggage),
        })
    }
}
