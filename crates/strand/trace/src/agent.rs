//! Agent-oriented convenience layer over [`Tracer`].
//!
//! Every method here is a thin composition of `trace_operation*` with a
//! fixed tag vocabulary. The agent id doubles as the span's entity id so
//! that replay can find the spans that mutate an agent's state.

use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::TraceContext;
use crate::conventions::{baggage, events, tags};
use crate::error::Result;
use crate::span::{Fields, TagValue};
use crate::tracer::{SpanOptions, Tracer};

/// Tracer facade for agent work.
#[derive(Debug, Clone)]
pub struct AgentTracer {
    tracer: Arc<Tracer>,
}

impl AgentTracer {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self { tracer }
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Trace one agent operation, named `agent.<operation_kind>`.
    pub fn trace_agent_operation<T, E, F>(
        &self,
        agent_id: &str,
        operation_kind: &str,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let options = self.agent_options(agent_id, parent).tag(tags::OPERATION_KIND, operation_kind);
        self.tracer.trace_operation_with(
            &format!("agent.{operation_kind}"),
            parent,
            options,
            f,
        )
    }

    /// Async counterpart of [`trace_agent_operation`](Self::trace_agent_operation).
    pub async fn trace_agent_operation_async<T, E, F, Fut>(
        &self,
        agent_id: &str,
        operation_kind: &str,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let options = self.agent_options(agent_id, parent).tag(tags::OPERATION_KIND, operation_kind);
        self.tracer
            .trace_operation_async_with(&format!("agent.{operation_kind}"), parent, options, f)
            .await
    }

    /// Trace a task, merging its metadata into tags as `task.<key>`.
    /// Nested objects are flattened with dotted keys.
    pub fn trace_task<T, E, F>(
        &self,
        agent_id: &str,
        task: &Fields,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let mut options = self.agent_options(agent_id, parent);
        flatten_into(&mut options, tags::TASK_PREFIX, task);
        self.tracer.trace_operation_with("agent.task", parent, options, f)
    }

    /// Trace a collaboration between agents. The initiator is propagated
    /// as baggage to every descendant span.
    pub fn trace_collaboration<T, E, F>(
        &self,
        initiator: &str,
        participants: &[&str],
        collaboration_kind: &str,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let participants: Vec<String> = participants.iter().map(|p| p.to_string()).collect();
        let options = self
            .agent_options(initiator, parent)
            .tag(tags::COLLABORATION_INITIATOR, initiator)
            .tag(tags::COLLABORATION_PARTICIPANTS, participants)
            .tag(tags::COLLABORATION_KIND, collaboration_kind)
            .baggage(baggage::COLLABORATION_INITIATOR, initiator);
        self.tracer.trace_operation_with(
            &format!("collaboration.{collaboration_kind}"),
            parent,
            options,
            f,
        )
    }

    /// Trace a memory store/retrieve against one memory tier.
    pub fn trace_memory_operation<T, E, F>(
        &self,
        agent_id: &str,
        operation: &str,
        memory_type: &str,
        parent: Option<&TraceContext>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let options = self
            .agent_options(agent_id, parent)
            .tag(tags::MEMORY_OPERATION, operation)
            .tag(tags::MEMORY_TYPE, memory_type);
        self.tracer
            .trace_operation_with(&format!("memory.{operation}"), parent, options, f)
    }

    /// Record a shallow state patch on the context's span.
    pub fn record_state_update(&self, context: &TraceContext, update: Fields) -> Result<()> {
        self.tracer.add_log(context, events::STATE_UPDATE, update)
    }

    /// Tags every agent span carries, plus the originating agent as baggage
    /// when no ancestor set one.
    fn agent_options(&self, agent_id: &str, parent: Option<&TraceContext>) -> SpanOptions {
        let options = SpanOptions::new()
            .tag(tags::AGENT_ID, agent_id)
            .tag(tags::ENTITY_ID, agent_id);

        let inherited = parent
            .cloned()
            .or_else(|| self.tracer.get_current_context())
            .is_some_and(|ctx| ctx.get_baggage_item(baggage::ORIGIN_AGENT_ID).is_some());

        if inherited {
            options
        } else {
            options.baggage(baggage::ORIGIN_AGENT_ID, agent_id)
        }
    }
}

fn flatten_into(options: &mut SpanOptions, prefix: &str, fields: &Fields) {
    for (key, value) in fields {
        let name = format!("{prefix}{key}");
        match value {
            Value::Object(nested) => flatten_into(options, &format!("{name}."), nested),
            other => options.tags.push((name, TagValue::from_json(other))),
        }
    }
}
