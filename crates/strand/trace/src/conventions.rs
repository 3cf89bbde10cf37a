//! Tag, event and baggage names shared by the tracer, the agent facade and
//! replay.

/// Span tag keys.
pub mod tags {
    /// Set to `true` on spans whose scope ended in an error.
    pub const ERROR: &str = "error";

    /// Set to `true` on spans whose async scope was dropped before completion.
    pub const CANCELLED: &str = "cancelled";

    /// Entity whose state a span mutates; read by replay.
    pub const ENTITY_ID: &str = "entity.id";

    /// Agent performing the operation.
    pub const AGENT_ID: &str = "agent.id";

    /// Kind of agent operation (e.g. "plan", "respond").
    pub const OPERATION_KIND: &str = "operation.kind";

    /// Prefix for task metadata merged into tags.
    pub const TASK_PREFIX: &str = "task.";

    /// Agent that initiated a collaboration.
    pub const COLLABORATION_INITIATOR: &str = "collaboration.initiator";

    /// Agents taking part in a collaboration.
    pub const COLLABORATION_PARTICIPANTS: &str = "collaboration.participants";

    /// Kind of collaboration (e.g. "review", "handoff").
    pub const COLLABORATION_KIND: &str = "collaboration.kind";

    /// Memory operation performed ("store", "retrieve", ...).
    pub const MEMORY_OPERATION: &str = "memory.operation";

    /// Memory tier the operation touched.
    pub const MEMORY_TYPE: &str = "memory.type";
}

/// Log event names.
pub mod events {
    /// Error raised inside a traced scope.
    pub const ERROR: &str = "error";

    /// Panic inside a traced scope.
    pub const PANIC: &str = "panic";

    /// Shallow state patch for an entity; folded by replay.
    pub const STATE_UPDATE: &str = "state_update";

    /// Field carrying the error message on `error` and `panic` events.
    pub const MESSAGE_FIELD: &str = "message";
}

/// Baggage keys.
pub mod baggage {
    /// Agent that started the chain of work.
    pub const ORIGIN_AGENT_ID: &str = "origin.agent.id";

    /// Initiator of the enclosing collaboration.
    pub const COLLABORATION_INITIATOR: &str = "collaboration.initiator";
}
