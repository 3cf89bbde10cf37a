//! Span records.
//!
//! A span is mutable (tags, log events) while it is active and becomes
//! immutable once `finish` has set its end time and terminal status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, TraceError};
use crate::ids::{SpanId, TraceId};

/// Structured fields attached to a log event.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A single timed operation within a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    span_id: SpanId,
    trace_id: TraceId,
    parent_span_id: Option<SpanId>,
    operation_name: String,
    service_name: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    tags: HashMap<String, TagValue>,
    logs: Vec<SpanLog>,
    status: SpanStatus,
}

impl Span {
    /// Create a new active span. `parent_span_id` is `None` only for the root
    /// span of a trace.
    pub fn new(
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
        operation_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        SpanBuilder::new(trace_id, operation_name, service_name)
            .parent(parent_span_id)
            .start()
    }

    /// Builder for a span that starts with tags already set.
    pub fn builder(
        trace_id: TraceId,
        operation_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> SpanBuilder {
        SpanBuilder::new(trace_id, operation_name, service_name)
    }

    pub fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn parent_span_id(&self) -> Option<&SpanId> {
        self.parent_span_id.as_ref()
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    pub fn tags(&self) -> &HashMap<String, TagValue> {
        &self.tags
    }

    /// Look up a single tag.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Log events in append order.
    pub fn logs(&self) -> &[SpanLog] {
        &self.logs
    }

    /// Elapsed time between start and finish, `None` while active.
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn is_active(&self) -> bool {
        self.status == SpanStatus::Active
    }

    /// Attach a tag. Fails once the span has finished.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Result<()> {
        self.ensure_active()?;
        self.tags.insert(key.into(), value.into());
        Ok(())
    }

    /// Append a log event. Fails once the span has finished.
    pub fn add_log(&mut self, event_name: impl Into<String>, fields: Fields) -> Result<()> {
        self.ensure_active()?;
        self.logs.push(SpanLog {
            timestamp: Utc::now(),
            event_name: event_name.into(),
            fields,
        });
        Ok(())
    }

    /// Finish the span, setting its end time and terminal status.
    ///
    /// A span finishes exactly once: a second call returns
    /// [`TraceError::AlreadyFinished`] and leaves the span untouched.
    pub fn finish(&mut self, status: SpanStatus) -> Result<()> {
        if !self.is_active() {
            return Err(TraceError::AlreadyFinished {
                span_id: self.span_id.clone(),
                status: self.status,
            });
        }
        if status == SpanStatus::Active {
            return Err(TraceError::InvalidStatus(self.span_id.clone()));
        }

        self.end_time = Some(Utc::now().max(self.start_time));
        self.status = status;
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TraceError::SpanFinished(self.span_id.clone()))
        }
    }
}

/// Fluent construction of an active span.
#[derive(Debug)]
pub struct SpanBuilder {
    trace_id: TraceId,
    parent_span_id: Option<SpanId>,
    operation_name: String,
    service_name: String,
    tags: HashMap<String, TagValue>,
}

impl SpanBuilder {
    pub fn new(
        trace_id: TraceId,
        operation_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id,
            parent_span_id: None,
            operation_name: operation_name.into(),
            service_name: service_name.into(),
            tags: HashMap::new(),
        }
    }

    /// Set the parent span; `None` makes a root span.
    pub fn parent(mut self, parent_span_id: Option<SpanId>) -> Self {
        self.parent_span_id = parent_span_id;
        self
    }

    /// Add a tag. A later value for the same key replaces an earlier one.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<TagValue>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Start the span now.
    pub fn start(self) -> Span {
        Span {
            span_id: SpanId::generate(),
            trace_id: self.trace_id,
            parent_span_id: self.parent_span_id,
            operation_name: self.operation_name,
            service_name: self.service_name,
            start_time: Utc::now(),
            end_time: None,
            tags: self.tags,
            logs: Vec::new(),
            status: SpanStatus::Active,
        }
    }
}

/// Span status. `Active` transitions to `Ok` or `Error` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Span is still running.
    Active,
    /// Operation succeeded.
    Ok,
    /// Operation failed.
    Error,
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanStatus::Active => write!(f, "active"),
            SpanStatus::Ok => write!(f, "ok"),
            SpanStatus::Error => write!(f, "error"),
        }
    }
}

/// A timestamped event recorded on a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    pub event_name: String,
    pub fields: Fields,
}

/// Span tag value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringArray(Vec<String>),
    IntArray(Vec<i64>),
}

impl TagValue {
    /// The value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert a JSON value into a tag. Objects and mixed arrays are stored
    /// as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Bool(b) => TagValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => TagValue::Int(i),
                None => TagValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => TagValue::String(s.clone()),
            Value::Array(items) => {
                if let Some(strings) = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                {
                    TagValue::StringArray(strings)
                } else if let Some(ints) = items.iter().map(|v| v.as_i64()).collect::<Option<Vec<_>>>() {
                    TagValue::IntArray(ints)
                } else {
                    TagValue::String(value.to_string())
                }
            }
            Value::Null => TagValue::String("null".to_string()),
            Value::Object(_) => TagValue::String(value.to_string()),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Int(v) => write!(f, "{v}"),
            TagValue::Float(v) => write!(f, "{v}"),
            TagValue::String(v) => f.write_str(v),
            TagValue::StringArray(v) => write!(f, "[{}]", v.join(",")),
            TagValue::IntArray(v) => {
                let items: Vec<String> = v.iter().map(i64::to_string).collect();
                write!(f, "[{}]", items.join(","))
            }
        }
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<&String> for TagValue {
    fn from(v: &String) -> Self {
        TagValue::String(v.clone())
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v as i64)
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::Int(v as i64)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(v: Vec<String>) -> Self {
        TagValue::StringArray(v)
    }
}

impl From<Vec<i64>> for TagValue {
    fn from(v: Vec<i64>) -> Self {
        TagValue::IntArray(v)
    }
}
