//! The tracer: starting traces and spans, and scoped span execution.
//!
//! Each tracer keeps one "current context" per execution unit. Synchronous
//! scopes store it in a thread-local slot; asynchronous scopes store it in a
//! tokio task-local, so it follows the task across worker threads and is
//! never visible to other tasks. Both slots are keyed by tracer, so two
//! tracers on one thread do not see each other's contexts.
//!
//! Every installation is stamped from one global counter, and lookup returns
//! whichever slot holds the most recent stamp. A synchronous scope that
//! blocks on an async scope therefore yields to it, and a synchronous scope
//! opened inside an async body wins over the task's context. Restoring a
//! previous context keeps its original stamp.

use lazy_static::lazy_static;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collector::{SpanAdmission, TraceCollector, TraceProgress};
use crate::config::TracerConfig;
use crate::context::TraceContext;
use crate::conventions::{events, tags};
use crate::error::{Result, TraceError};
use crate::export::LogExporter;
use crate::ids::{CorrelationId, SpanId, TraceId};
use crate::span::{Fields, Span, SpanStatus, TagValue};

static NEXT_TRACER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_INSTALL: AtomicU64 = AtomicU64::new(1);

/// A context together with the order in which it was made current.
#[derive(Debug, Clone)]
struct Installed {
    order: u64,
    context: TraceContext,
}

impl Installed {
    fn now(context: TraceContext) -> Self {
        Self {
            order: NEXT_INSTALL.fetch_add(1, Ordering::Relaxed),
            context,
        }
    }
}

type ContextSlots = HashMap<u64, Installed>;

thread_local! {
    static THREAD_CONTEXT: RefCell<ContextSlots> = RefCell::new(HashMap::new());
}

tokio::task_local! {
    static TASK_CONTEXT: ContextSlots;
}

lazy_static! {
    static ref SHARED_TRACER: Arc<Tracer> = Arc::new(Tracer::from_config(TracerConfig::default()));
}

/// Extra tags and baggage applied when a span is opened.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    pub tags: Vec<(String, TagValue)>,
    /// Baggage set on the new span's context, inherited by its descendants.
    pub baggage: Vec<(String, String)>,
}

impl SpanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Add a baggage item
    pub fn baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.push((key.into(), value.into()));
        self
    }
}

/// Starts traces and spans and tracks the current context.
pub struct Tracer {
    id: u64,
    config: TracerConfig,
    collector: Arc<TraceCollector>,
}

impl Tracer {
    /// Create a tracer for `service_name` reporting into `collector`.
    pub fn new(service_name: impl Into<String>, collector: Arc<TraceCollector>) -> Self {
        Self::with_config(TracerConfig::new(service_name), collector)
    }

    pub fn with_config(config: TracerConfig, collector: Arc<TraceCollector>) -> Self {
        Self {
            id: NEXT_TRACER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            collector,
        }
    }

    /// Create a tracer with its own collector.
    pub fn from_config(config: TracerConfig) -> Self {
        let mut collector = TraceCollector::new();
        if config.log_completed_traces {
            collector = collector.with_exporter(Arc::new(LogExporter));
        }
        Self::with_config(config, Arc::new(collector))
    }

    /// Process-wide tracer with default configuration, created on first use.
    ///
    /// Prefer constructing a tracer and passing it explicitly; this exists
    /// for call sites that have nowhere to receive one from.
    pub fn shared() -> Arc<Tracer> {
        Arc::clone(&SHARED_TRACER)
    }

    pub fn collector(&self) -> &Arc<TraceCollector> {
        &self.collector
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Start a new trace with a root span. The returned context is not
    /// installed as current.
    pub fn start_trace(&self, operation_name: &str) -> TraceContext {
        self.start_trace_with(operation_name, &SpanOptions::default())
    }

    pub fn start_trace_with(&self, operation_name: &str, options: &SpanOptions) -> TraceContext {
        let base = TraceContext::new(TraceId::generate(), CorrelationId::generate());
        self.start_root(operation_name, base, options)
    }

    /// Start a span as a child of `parent`'s current span. The returned
    /// context is not installed as current.
    ///
    /// Fails with [`TraceError::TraceCompleted`] if `parent`'s trace was
    /// already archived.
    pub fn start_span(&self, operation_name: &str, parent: &TraceContext) -> Result<TraceContext> {
        self.start_span_with(operation_name, parent, &SpanOptions::default())
    }

    pub fn start_span_with(
        &self,
        operation_name: &str,
        parent: &TraceContext,
        options: &SpanOptions,
    ) -> Result<TraceContext> {
        let span = self.new_span(
            parent.trace_id().clone(),
            parent.span_id().cloned(),
            operation_name,
            options,
        );
        let span_id = span.span_id().clone();

        match self.collector.add_span(span) {
            SpanAdmission::TraceAlreadyCompleted => {
                Err(TraceError::TraceCompleted(parent.trace_id().clone()))
            }
            _ => Ok(parent
                .with_span(span_id)
                .with_baggage(options.baggage.iter().cloned())),
        }
    }

    /// Finish the context's current span.
    pub fn finish_span(&self, context: &TraceContext, status: SpanStatus) -> Result<TraceProgress> {
        let span_id = current_span(context)?;
        self.collector.finish_span(span_id, status)
    }

    /// Tag the context's current span.
    pub fn add_tag(
        &self,
        context: &TraceContext,
        key: impl Into<String>,
        value: impl Into<TagValue>,
    ) -> Result<()> {
        let span_id = current_span(context)?;
        self.collector.tag_span(span_id, key, value)
    }

    /// Append a log event to the context's current span.
    pub fn add_log(
        &self,
        context: &TraceContext,
        event_name: impl Into<String>,
        fields: Fields,
    ) -> Result<()> {
        let span_id = current_span(context)?;
        self.collector.log_span(span_id, event_name, fields)
    }

    /// The current context of the calling thread or task, if any.
    pub fn get_current_context(&self) -> Option<TraceContext> {
        let thread = THREAD_CONTEXT.with(|slots| slots.borrow().get(&self.id).cloned());
        let task = TASK_CONTEXT
            .try_with(|slots| slots.get(&self.id).cloned())
            .ok()
            .flatten();

        let current = match (thread, task) {
            (Some(thread), Some(task)) if thread.order > task.order => thread,
            (_, Some(task)) => task,
            (thread, None) => thread?,
        };
        Some(current.context)
    }

    /// Install `context` as current on this thread until the guard drops.
    ///
    /// `None` clears the thread-level slot only; inside an async scope the
    /// task's context is visible again once the thread slot is empty.
    pub fn set_current_context(&self, context: Option<TraceContext>) -> ContextGuard {
        let previous = swap_thread_context(self.id, context.map(Installed::now));
        ContextGuard {
            tracer_id: self.id,
            previous,
            _not_send: PhantomData,
        }
    }

    /// Active spans of this tracer's collector older than the configured
    /// stale threshold.
    pub fn stale_spans(&self) -> Vec<Span> {
        self.collector.stale_spans(self.config.stale_span_threshold)
    }

    /// Open a span and install it as current until the returned scope ends.
    ///
    /// The parent is `parent`, else the current context; with neither, the
    /// span is the root of a new trace. Dropping the scope finishes the span
    /// with `ok`, or `error` when unwinding from a panic.
    pub fn enter(&self, operation_name: &str, parent: Option<&TraceContext>) -> SpanScope<'_> {
        self.enter_with(operation_name, parent, SpanOptions::default())
    }

    pub fn enter_with(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        options: SpanOptions,
    ) -> SpanScope<'_> {
        let context = self.open_span(operation_name, parent, &options);
        let previous = swap_thread_context(self.id, Some(Installed::now(context.clone())));
        SpanScope {
            tracer: self,
            context,
            previous,
            closed: false,
            _not_send: PhantomData,
        }
    }

    /// Run `f` inside a new span.
    ///
    /// `Ok` finishes the span with `ok`. `Err` finishes it with `error`, tags
    /// it `error=true` and logs the error message; the error is returned
    /// unchanged. The previous current context is restored on every path,
    /// including panics.
    pub fn trace_operation<T, E, F>(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        self.trace_operation_with(operation_name, parent, SpanOptions::default(), f)
    }

    pub fn trace_operation_with<T, E, F>(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        options: SpanOptions,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let scope = self.enter_with(operation_name, parent, options);
        let result = f(scope.context());

        let outcome = match &result {
            Ok(_) => scope.finish(),
            Err(err) => scope.fail(err),
        };
        log_unsettled(outcome);
        result
    }

    /// Async counterpart of [`trace_operation`](Self::trace_operation).
    ///
    /// The span's context is current for the whole of the future, on
    /// whichever worker thread polls it. If the future is dropped before
    /// completing, the span finishes with `error` and `cancelled=true`.
    pub async fn trace_operation_async<T, E, F, Fut>(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        self.trace_operation_async_with(operation_name, parent, SpanOptions::default(), f)
            .await
    }

    pub async fn trace_operation_async_with<T, E, F, Fut>(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        options: SpanOptions,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let context = self.open_span(operation_name, parent, &options);

        let mut slots = TASK_CONTEXT
            .try_with(|slots| slots.clone())
            .unwrap_or_default();
        slots.insert(self.id, Installed::now(context.clone()));

        let mut pending = PendingSpan {
            tracer: self,
            context: Some(context.clone()),
        };
        let result = TASK_CONTEXT.scope(slots, f(context)).await;

        if let Some(context) = pending.context.take() {
            let outcome = match &result {
                Ok(_) => self.close_ok(&context),
                Err(err) => self.close_err(&context, events::ERROR, &err.to_string()),
            };
            log_unsettled(outcome);
        }
        result
    }

    fn open_span(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        options: &SpanOptions,
    ) -> TraceContext {
        let parent = parent.cloned().or_else(|| self.get_current_context());

        match parent {
            Some(parent) => match self.start_span_with(operation_name, &parent, options) {
                Ok(context) => context,
                Err(err) => {
                    warn!(
                        trace_id = %parent.trace_id(),
                        operation = operation_name,
                        error = %err,
                        "parent trace is closed, starting a new trace"
                    );
                    let base =
                        TraceContext::new(TraceId::generate(), parent.correlation_id().clone())
                            .with_baggage(parent.baggage().iter());
                    self.start_root(operation_name, base, options)
                }
            },
            None => self.start_trace_with(operation_name, options),
        }
    }

    fn start_root(
        &self,
        operation_name: &str,
        base: TraceContext,
        options: &SpanOptions,
    ) -> TraceContext {
        let span = self.new_span(base.trace_id().clone(), None, operation_name, options);
        let context = base
            .with_span(span.span_id().clone())
            .with_baggage(options.baggage.iter().cloned());
        self.collector.add_span(span);
        context
    }

    fn new_span(
        &self,
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
        operation_name: &str,
        options: &SpanOptions,
    ) -> Span {
        Span::builder(trace_id, operation_name, self.config.service_name.clone())
            .parent(parent_span_id)
            .tags(options.tags.iter().cloned())
            .start()
    }

    fn close_ok(&self, context: &TraceContext) -> Result<TraceProgress> {
        self.finish_span(context, SpanStatus::Ok)
    }

    fn close_err(&self, context: &TraceContext, event: &str, message: &str) -> Result<TraceProgress> {
        let mut fields = Fields::new();
        fields.insert(events::MESSAGE_FIELD.to_string(), message.into());

        self.add_tag(context, tags::ERROR, true)?;
        self.add_log(context, event, fields)?;
        self.finish_span(context, SpanStatus::Error)
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("id", &self.id)
            .field("service_name", &self.config.service_name)
            .field("collector", &self.collector)
            .finish()
    }
}

/// Restores the previous current context when dropped.
///
/// Guards must be dropped in reverse order of creation, and must not be held
/// across an `.await`.
#[must_use = "the context is uninstalled when the guard is dropped"]
pub struct ContextGuard {
    tracer_id: u64,
    previous: Option<Installed>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        swap_thread_context(self.tracer_id, self.previous.take());
    }
}

/// A span that is current until this scope ends.
#[must_use = "the span finishes when the scope is dropped"]
pub struct SpanScope<'a> {
    tracer: &'a Tracer,
    context: TraceContext,
    previous: Option<Installed>,
    closed: bool,
    _not_send: PhantomData<*const ()>,
}

impl SpanScope<'_> {
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Finish the span with `ok`.
    pub fn finish(mut self) -> Result<TraceProgress> {
        self.closed = true;
        self.tracer.close_ok(&self.context)
    }

    /// Record `error` as the reason for failure and finish the span with
    /// `error`.
    pub fn fail(mut self, error: impl fmt::Display) -> Result<TraceProgress> {
        self.closed = true;
        self.tracer
            .close_err(&self.context, events::ERROR, &error.to_string())
    }
}

impl Drop for SpanScope<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let outcome = if std::thread::panicking() {
                self.tracer
                    .close_err(&self.context, events::PANIC, "scope panicked")
            } else {
                self.tracer.close_ok(&self.context)
            };
            log_unsettled(outcome);
        }
        swap_thread_context(self.tracer.id, self.previous.take());
    }
}

/// Finishes an async span whose future was dropped before completion.
struct PendingSpan<'a> {
    tracer: &'a Tracer,
    context: Option<TraceContext>,
}

impl Drop for PendingSpan<'_> {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };

        let outcome = if std::thread::panicking() {
            self.tracer
                .close_err(&context, events::PANIC, "future panicked")
        } else {
            self.tracer
                .add_tag(&context, tags::CANCELLED, true)
                .and_then(|_| {
                    self.tracer
                        .close_err(&context, events::ERROR, "future dropped before completion")
                })
        };
        log_unsettled(outcome);
    }
}

fn current_span(context: &TraceContext) -> Result<&SpanId> {
    context
        .span_id()
        .ok_or_else(|| TraceError::NoActiveSpan(context.trace_id().clone()))
}

fn swap_thread_context(tracer_id: u64, installed: Option<Installed>) -> Option<Installed> {
    THREAD_CONTEXT.with(|slots| {
        let mut slots = slots.borrow_mut();
        match installed {
            Some(installed) => slots.insert(tracer_id, installed),
            None => slots.remove(&tracer_id),
        }
    })
}

/// A scope's span may already have been finished explicitly by the body;
/// that is not an error for the scope itself.
fn log_unsettled(outcome: Result<TraceProgress>) {
    if let Err(err) = outcome {
        debug!(error = %err, "span was already settled when its scope ended");
    }
}
