//! Trace collection and completion detection.
//!
//! The collector owns every span it is given. Active traces are kept in a
//! sharded map keyed by trace id; all mutation of one trace (adding a span,
//! finishing a span, archiving the trace) happens under that trace's entry
//! lock, so unrelated traces never contend on a single global lock.
//!
//! A trace is archived the moment its last active span finishes. Archiving
//! moves the trace out of the active map and into the completed list in one
//! step under the entry lock, so a trace id is never observed in both.
//! Archived traces are closed: they are never reopened.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, TraceError};
use crate::export::TraceExporter;
use crate::ids::{SpanId, TraceId};
use crate::span::{Fields, Span, SpanStatus, TagValue};

/// Lifecycle of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// At least one span is still active.
    Active,
    /// Every span finished; the trace is archived.
    Completed,
}

/// Read-only projection of a trace: all spans sharing a trace id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: TraceId,
    /// Spans in the order they were added.
    pub spans: Vec<Span>,
    pub status: TraceStatus,
    /// Set when the trace is archived.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TraceRecord {
    /// Find a span by id.
    pub fn span(&self, span_id: &SpanId) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id() == span_id)
    }

    /// The span without a parent, if present.
    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.parent_span_id().is_none())
    }

    pub fn contains_operation(&self, operation_name: &str) -> bool {
        self.spans.iter().any(|s| s.operation_name() == operation_name)
    }

    pub fn is_completed(&self) -> bool {
        self.status == TraceStatus::Completed
    }

    fn earliest_start(&self) -> Option<DateTime<Utc>> {
        self.spans.iter().map(Span::start_time).min()
    }
}

/// Outcome of [`TraceCollector::add_span`].
///
/// Registration is idempotent by span id: submitting a span id the collector
/// already holds never stores a second copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanAdmission {
    /// First time this span id was seen.
    Registered,
    /// The stored copy was active and the submitted copy is finished; the
    /// stored copy was replaced.
    Refreshed,
    /// The span id was already known; nothing changed.
    Duplicate,
    /// The trace was already archived; the span was not stored.
    TraceAlreadyCompleted,
}

/// Outcome of finishing a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceProgress {
    /// Other spans of the trace are still active.
    StillActive,
    /// This was the last active span; the trace was archived.
    Completed,
}

/// Summary statistics across active and completed traces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStatistics {
    pub active_traces: usize,
    pub completed_traces: usize,
    pub active_spans: usize,
    /// Number of spans per operation name, across all known spans.
    pub operations: BTreeMap<String, usize>,
    /// Distinct service names across all known spans.
    pub services: BTreeSet<String>,
}

/// Shared store of spans, grouped into traces.
pub struct TraceCollector {
    /// Owning trace of every span ever stored.
    span_index: DashMap<SpanId, TraceId>,
    /// Active traces, spans in insertion order.
    active: DashMap<TraceId, Vec<Span>>,
    /// Archived traces in completion order.
    completed: RwLock<Vec<Arc<TraceRecord>>>,
    completed_index: DashMap<TraceId, Arc<TraceRecord>>,
    exporters: Vec<Arc<dyn TraceExporter>>,
}

impl TraceCollector {
    /// Create an empty collector with no exporters.
    pub fn new() -> Self {
        Self {
            span_index: DashMap::new(),
            active: DashMap::new(),
            completed: RwLock::new(Vec::new()),
            completed_index: DashMap::new(),
            exporters: Vec::new(),
        }
    }

    /// Register an exporter to be called on every trace completion.
    pub fn with_exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Store a span and run completion detection for its trace.
    pub fn add_span(&self, span: Span) -> SpanAdmission {
        let trace_id = span.trace_id().clone();
        let span_id = span.span_id().clone();

        let (admission, archived) = match self.active.entry(trace_id.clone()) {
            Entry::Occupied(mut entry) => {
                let admission = merge_span(entry.get_mut(), span);
                if admission == SpanAdmission::Registered {
                    self.span_index.insert(span_id.clone(), trace_id.clone());
                }

                let archived = if is_complete(entry.get()) {
                    Some(self.archive(trace_id.clone(), entry.remove()))
                } else {
                    None
                };
                (admission, archived)
            }
            Entry::Vacant(entry) => {
                if self.completed_index.contains_key(&trace_id) {
                    warn!(
                        trace_id = %trace_id,
                        span_id = %span_id,
                        "span submitted for an already completed trace, ignoring"
                    );
                    return SpanAdmission::TraceAlreadyCompleted;
                }

                self.span_index.insert(span_id.clone(), trace_id.clone());
                if span.is_active() {
                    entry.insert(vec![span]);
                    (SpanAdmission::Registered, None)
                } else {
                    let record = self.archive(trace_id.clone(), vec![span]);
                    (SpanAdmission::Registered, Some(record))
                }
            }
        };

        debug!(trace_id = %trace_id, span_id = %span_id, ?admission, "span added");

        if let Some(record) = archived {
            self.export(&record);
        }
        admission
    }

    /// Finish a stored span and run completion detection for its trace.
    pub fn finish_span(&self, span_id: &SpanId, status: SpanStatus) -> Result<TraceProgress> {
        let trace_id = self.trace_of(span_id)?;

        let archived = match self.active.entry(trace_id.clone()) {
            Entry::Occupied(mut entry) => {
                let span = entry
                    .get_mut()
                    .iter_mut()
                    .find(|s| s.span_id() == span_id)
                    .ok_or_else(|| TraceError::SpanNotFound(span_id.clone()))?;
                span.finish(status)?;

                debug!(trace_id = %trace_id, span_id = %span_id, %status, "span finished");

                if is_complete(entry.get()) {
                    Some(self.archive(trace_id.clone(), entry.remove()))
                } else {
                    None
                }
            }
            Entry::Vacant(_) => {
                // Spans of an archived trace are all finished.
                let finished = self
                    .completed_index
                    .get(&trace_id)
                    .and_then(|record| record.span(span_id).map(Span::status));
                return Err(match finished {
                    Some(status) => TraceError::AlreadyFinished {
                        span_id: span_id.clone(),
                        status,
                    },
                    None => TraceError::SpanNotFound(span_id.clone()),
                });
            }
        };

        match archived {
            Some(record) => {
                self.export(&record);
                Ok(TraceProgress::Completed)
            }
            None => Ok(TraceProgress::StillActive),
        }
    }

    /// Tag an active span.
    pub fn tag_span(
        &self,
        span_id: &SpanId,
        key: impl Into<String>,
        value: impl Into<TagValue>,
    ) -> Result<()> {
        self.with_active_span(span_id, |span| span.add_tag(key, value))
    }

    /// Append a log event to an active span.
    pub fn log_span(
        &self,
        span_id: &SpanId,
        event_name: impl Into<String>,
        fields: Fields,
    ) -> Result<()> {
        self.with_active_span(span_id, |span| span.add_log(event_name, fields))
    }

    /// Copy of a stored span.
    pub fn get_span(&self, span_id: &SpanId) -> Option<Span> {
        let trace_id = self.trace_of(span_id).ok()?;
        if let Some(spans) = self.active.get(&trace_id) {
            if let Some(span) = spans.iter().find(|s| s.span_id() == span_id) {
                return Some(span.clone());
            }
        }
        self.completed_index
            .get(&trace_id)
            .and_then(|record| record.span(span_id).cloned())
    }

    /// The trace with this id, active or completed.
    pub fn get_trace(&self, trace_id: &TraceId) -> Option<Arc<TraceRecord>> {
        if let Some(spans) = self.active.get(trace_id) {
            return Some(Arc::new(active_record(trace_id, &spans)));
        }
        self.completed_index
            .get(trace_id)
            .map(|record| Arc::clone(record.value()))
    }

    /// Every trace, active or completed, containing a span with this
    /// operation name. Active traces come first (oldest first), then
    /// completed traces in completion order.
    pub fn get_traces_by_operation(&self, operation_name: &str) -> Vec<Arc<TraceRecord>> {
        let (mut active, completed) =
            self.view(|spans| spans.iter().any(|s| s.operation_name() == operation_name));
        active.sort_by_key(TraceRecord::earliest_start);

        let mut traces: Vec<Arc<TraceRecord>> = active.into_iter().map(Arc::new).collect();
        traces.extend(completed);
        traces
    }

    /// Counts, operation frequencies and service names.
    ///
    /// Not an atomic snapshot: traces archived during the call may be
    /// reported as active or completed, but each trace is counted once.
    pub fn get_trace_statistics(&self) -> TraceStatistics {
        let mut stats = TraceStatistics::default();
        let (active, completed) = self.view(|_| true);

        let mut tally = |span: &Span| {
            *stats
                .operations
                .entry(span.operation_name().to_string())
                .or_insert(0) += 1;
            if !stats.services.contains(span.service_name()) {
                stats.services.insert(span.service_name().to_string());
            }
        };

        let mut active_spans = 0;
        for record in &active {
            for span in &record.spans {
                if span.is_active() {
                    active_spans += 1;
                }
                tally(span);
            }
        }
        for record in &completed {
            record.spans.iter().for_each(&mut tally);
        }

        stats.active_traces = active.len();
        stats.active_spans = active_spans;
        stats.completed_traces = completed.len();
        stats
    }

    /// Active spans older than `threshold`. A span that stays active this
    /// long usually means a scope that never finished it.
    pub fn stale_spans(&self, threshold: Duration) -> Vec<Span> {
        let now = Utc::now();
        let mut stale: Vec<Span> = self
            .active
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|span| {
                        span.is_active()
                            && (now - span.start_time())
                                .to_std()
                                .map(|age| age > threshold)
                                .unwrap_or(false)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        stale.sort_by_key(Span::start_time);
        stale
    }

    pub fn active_trace_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_trace_count(&self) -> usize {
        self.completed.read().len()
    }

    /// Archived traces in completion order.
    pub fn completed_traces(&self) -> Vec<Arc<TraceRecord>> {
        self.completed.read().clone()
    }

    /// Number of spans ever stored.
    pub fn span_count(&self) -> usize {
        self.span_index.len()
    }

    /// Whether the trace id is currently active.
    pub fn is_active(&self, trace_id: &TraceId) -> bool {
        self.active.contains_key(trace_id)
    }

    /// Whether the trace id has been archived.
    pub fn is_completed(&self, trace_id: &TraceId) -> bool {
        self.completed_index.contains_key(trace_id)
    }

    fn with_active_span<R>(
        &self,
        span_id: &SpanId,
        f: impl FnOnce(&mut Span) -> Result<R>,
    ) -> Result<R> {
        let trace_id = self.trace_of(span_id)?;

        if let Some(mut spans) = self.active.get_mut(&trace_id) {
            if let Some(span) = spans.iter_mut().find(|s| s.span_id() == span_id) {
                return f(span);
            }
        }

        if self.completed_index.contains_key(&trace_id) {
            Err(TraceError::SpanFinished(span_id.clone()))
        } else {
            Err(TraceError::SpanNotFound(span_id.clone()))
        }
    }

    /// Traces whose spans satisfy `keep`, split into active copies and
    /// completed records.
    ///
    /// Active traces are copied first, then the completed list is read. A
    /// trace archived in between shows up in both reads; only its completed
    /// record is kept.
    fn view(&self, keep: impl Fn(&[Span]) -> bool) -> (Vec<TraceRecord>, Vec<Arc<TraceRecord>>) {
        let active: Vec<TraceRecord> = self
            .active
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| active_record(entry.key(), entry.value()))
            .collect();

        let completed: Vec<Arc<TraceRecord>> = self
            .completed
            .read()
            .iter()
            .filter(|record| keep(&record.spans))
            .cloned()
            .collect();

        let archived: HashSet<&TraceId> = completed.iter().map(|r| &r.trace_id).collect();
        let active = active
            .into_iter()
            .filter(|record| !archived.contains(&record.trace_id))
            .collect();
        (active, completed)
    }

    fn trace_of(&self, span_id: &SpanId) -> Result<TraceId> {
        self.span_index
            .get(span_id)
            .map(|trace_id| trace_id.clone())
            .ok_or_else(|| TraceError::SpanNotFound(span_id.clone()))
    }

    /// Must be called while holding the trace's entry in `active` (or its
    /// vacant slot), so archiving is atomic with respect to other writers.
    fn archive(&self, trace_id: TraceId, spans: Vec<Span>) -> Arc<TraceRecord> {
        let record = Arc::new(TraceRecord {
            trace_id: trace_id.clone(),
            spans,
            status: TraceStatus::Completed,
            completed_at: Some(Utc::now()),
        });

        self.completed_index.insert(trace_id.clone(), Arc::clone(&record));
        self.completed.write().push(Arc::clone(&record));

        info!(trace_id = %trace_id, spans = record.spans.len(), "trace completed");
        record
    }

    fn export(&self, record: &Arc<TraceRecord>) {
        for exporter in &self.exporters {
            exporter.export(record);
        }
    }
}

impl Default for TraceCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TraceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceCollector")
            .field("active_traces", &self.active.len())
            .field("completed_traces", &self.completed.read().len())
            .field("spans", &self.span_index.len())
            .field("exporters", &self.exporters.len())
            .finish()
    }
}

fn merge_span(spans: &mut Vec<Span>, incoming: Span) -> SpanAdmission {
    match spans.iter_mut().find(|s| s.span_id() == incoming.span_id()) {
        Some(existing) if existing.is_active() && !incoming.is_active() => {
            *existing = incoming;
            SpanAdmission::Refreshed
        }
        Some(_) => SpanAdmission::Duplicate,
        None => {
            spans.push(incoming);
            SpanAdmission::Registered
        }
    }
}

fn is_complete(spans: &[Span]) -> bool {
    !spans.is_empty() && spans.iter().all(|s| !s.is_active())
}

fn active_record(trace_id: &TraceId, spans: &[Span]) -> TraceRecord {
    TraceRecord {
        trace_id: trace_id.clone(),
        spans: spans.to_vec(),
        status: TraceStatus::Active,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemoryExporter;
    use serde_json::json;

    fn span(trace_id: &TraceId, parent: Option<&Span>, operation: &str) -> Span {
        Span::new(
            trace_id.clone(),
            parent.map(|p| p.span_id().clone()),
            operation,
            "test-service",
        )
    }

    fn finished(mut span: Span) -> Span {
        span.finish(SpanStatus::Ok).unwrap();
        span
    }

    #[test]
    fn test_trace_completes_when_last_span_finishes() {
        let collector = TraceCollector::new();
        let trace_id = TraceId::generate();
        let root = span(&trace_id, None, "root");
        let child = span(&trace_id, Some(&root), "child");
        let (root_id, child_id) = (root.span_id().clone(), child.span_id().clone());

        collector.add_span(root);
        collector.add_span(child);
        assert!(collector.is_active(&trace_id));

        assert_eq!(
            collector.finish_span(&child_id, SpanStatus::Ok).unwrap(),
            TraceProgress::StillActive
        );
        assert!(collector.is_active(&trace_id));

        assert_eq!(
            collector.finish_span(&root_id, SpanStatus::Ok).unwrap(),
            TraceProgress::Completed
        );
        assert!(!collector.is_active(&trace_id));
        assert!(collector.is_completed(&trace_id));

        let record = collector.get_trace(&trace_id).unwrap();
        assert_eq!(record.status, TraceStatus::Completed);
        assert!(record.completed_at.is_some());
        assert_eq!(record.spans.len(), 2);
    }

    #[test]
    fn test_adding_finished_span_alone_completes_trace() {
        let collector = TraceCollector::new();
        let trace_id = TraceId::generate();

        collector.add_span(finished(span(&trace_id, None, "instant")));

        assert!(collector.is_completed(&trace_id));
        assert_eq!(collector.active_trace_count(), 0);
    }

    #[test]
    fn test_resubmitting_finished_span_is_idempotent() {
        let collector = TraceCollector::new();
        let trace_id = TraceId::generate();
        let root = span(&trace_id, None, "root");
        let child = span(&trace_id, Some(&root), "child");

        collector.add_span(root.clone());
        assert_eq!(collector.add_span(child.clone()), SpanAdmission::Registered);
        assert_eq!(collector.add_span(child.clone()), SpanAdmission::Duplicate);

        // A finished copy replaces the stored active one without duplicating it.
        assert_eq!(
            collector.add_span(finished(child.clone())),
            SpanAdmission::Refreshed
        );
        assert_eq!(collector.get_trace(&trace_id).unwrap().spans.len(), 2);
        assert!(collector.is_active(&trace_id));

        // Finishing the root via resubmission archives the trace exactly once.
        assert_eq!(collector.add_span(finished(root.clone())), SpanAdmission::Refreshed);
        assert!(collector.is_completed(&trace_id));
        assert_eq!(collector.completed_trace_count(), 1);

        // The archived trace is closed.
        assert_eq!(
            collector.add_span(finished(root)),
            SpanAdmission::TraceAlreadyCompleted
        );
        assert_eq!(collector.completed_trace_count(), 1);
        assert_eq!(collector.get_trace(&trace_id).unwrap().spans.len(), 2);
        assert!(!collector.is_active(&trace_id));
    }

    #[test]
    fn test_finish_errors() {
        let collector = TraceCollector::new();
        let trace_id = TraceId::generate();
        let root = span(&trace_id, None, "root");
        let root_id = root.span_id().clone();
        collector.add_span(root);

        assert!(matches!(
            collector.finish_span(&SpanId::from("missing"), SpanStatus::Ok),
            Err(TraceError::SpanNotFound(_))
        ));

        collector.finish_span(&root_id, SpanStatus::Error).unwrap();
        assert!(matches!(
            collector.finish_span(&root_id, SpanStatus::Ok),
            Err(TraceError::AlreadyFinished { status: SpanStatus::Error, .. })
        ));
        assert!(matches!(
            collector.tag_span(&root_id, "late", true),
            Err(TraceError::SpanFinished(_))
        ));
    }

    #[test]
    fn test_tag_and_log_active_span() {
        let collector = TraceCollector::new();
        let trace_id = TraceId::generate();
        let root = span(&trace_id, None, "root");
        let root_id = root.span_id().clone();
        collector.add_span(root);

        collector.tag_span(&root_id, "entity.id", "e1").unwrap();
        let mut fields = Fields::new();
        fields.insert("status".to_string(), json!("processing"));
        collector.log_span(&root_id, "state_update", fields).unwrap();

        let stored = collector.get_span(&root_id).unwrap();
        assert_eq!(stored.tag("entity.id").and_then(TagValue::as_str), Some("e1"));
        assert_eq!(stored.logs().len(), 1);
    }

    #[test]
    fn test_get_traces_by_operation_spans_both_sets() {
        let collector = TraceCollector::new();

        let active_trace = TraceId::generate();
        collector.add_span(span(&active_trace, None, "search"));

        let done_trace = TraceId::generate();
        collector.add_span(finished(span(&done_trace, None, "search")));

        let other = TraceId::generate();
        collector.add_span(span(&other, None, "index"));

        let found = collector.get_traces_by_operation("search");
        let ids: Vec<&TraceId> = found.iter().map(|t| &t.trace_id).collect();
        assert_eq!(ids, vec![&active_trace, &done_trace]);
        assert!(collector.get_traces_by_operation("missing").is_empty());
    }

    #[test]
    fn test_statistics() {
        let collector = TraceCollector::new();
        let t1 = TraceId::generate();
        let root = span(&t1, None, "root");
        collector.add_span(span(&t1, Some(&root), "child"));
        collector.add_span(root);

        let t2 = TraceId::generate();
        collector.add_span(finished(Span::new(t2, None, "root", "other-service")));

        let stats = collector.get_trace_statistics();
        assert_eq!(stats.active_traces, 1);
        assert_eq!(stats.completed_traces, 1);
        assert_eq!(stats.active_spans, 2);
        assert_eq!(stats.operations["root"], 2);
        assert_eq!(stats.operations["child"], 1);
        assert_eq!(
            stats.services.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["other-service", "test-service"]
        );
    }

    #[test]
    fn test_statistics_count_each_trace_once_while_archiving() {
        let collector = Arc::new(TraceCollector::new());
        let roots: Vec<SpanId> = (0..200)
            .map(|_| {
                let trace_id = TraceId::generate();
                let root = span(&trace_id, None, "root");
                let root_id = root.span_id().clone();
                let child = finished(span(&trace_id, Some(&root), "child"));
                collector.add_span(root);
                collector.add_span(child);
                root_id
            })
            .collect();

        let finisher = {
            let collector = Arc::clone(&collector);
            std::thread::spawn(move || {
                for root_id in roots {
                    collector.finish_span(&root_id, SpanStatus::Ok).unwrap();
                }
            })
        };

        loop {
            let done = finisher.is_finished();
            let stats = collector.get_trace_statistics();
            assert_eq!(stats.active_traces + stats.completed_traces, 200);
            assert_eq!(stats.operations["root"], 200);
            assert_eq!(stats.operations["child"], 200);
            assert_eq!(stats.active_spans, stats.active_traces);

            let by_operation = collector.get_traces_by_operation("child");
            assert_eq!(by_operation.len(), 200);

            if done {
                break;
            }
        }
        finisher.join().unwrap();
        assert_eq!(collector.get_trace_statistics().completed_traces, 200);
    }

    #[test]
    fn test_stale_spans() {
        let collector = TraceCollector::new();
        let trace_id = TraceId::generate();
        collector.add_span(span(&trace_id, None, "leaky"));

        assert!(collector.stale_spans(Duration::from_secs(3600)).is_empty());
        std::thread::sleep(Duration::from_millis(5));
        let stale = collector.stale_spans(Duration::from_millis(1));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].operation_name(), "leaky");
    }

    #[test]
    fn test_exporter_called_once_per_completion() {
        let exporter = Arc::new(InMemoryExporter::new());
        let collector = TraceCollector::new().with_exporter(exporter.clone());
        let trace_id = TraceId::generate();
        let root = span(&trace_id, None, "root");
        let root_id = root.span_id().clone();

        collector.add_span(root.clone());
        assert!(exporter.is_empty());

        collector.finish_span(&root_id, SpanStatus::Ok).unwrap();
        collector.add_span(finished(root));

        assert_eq!(exporter.len(), 1);
        assert_eq!(exporter.traces()[0].trace_id, trace_id);
    }

    #[test]
    fn test_concurrent_add_and_finish() {
        let collector = Arc::new(TraceCollector::new());
        let trace_id = TraceId::generate();
        let root = span(&trace_id, None, "root");
        let root_id = root.span_id().clone();
        collector.add_span(root);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let collector = Arc::clone(&collector);
                let trace_id = trace_id.clone();
                let root_id = root_id.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let child = Span::new(
                            trace_id.clone(),
                            Some(root_id.clone()),
                            format!("worker-{i}-{j}"),
                            "test-service",
                        );
                        let child_id = child.span_id().clone();
                        collector.add_span(child);
                        collector.finish_span(&child_id, SpanStatus::Ok).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(collector.is_active(&trace_id));
        assert_eq!(collector.span_count(), 201);

        collector.finish_span(&root_id, SpanStatus::Ok).unwrap();
        let record = collector.get_trace(&trace_id).unwrap();
        assert!(record.is_completed());
        assert_eq!(record.spans.len(), 201);
    }
}
