//! Reconstructing entity state from a snapshot and a trace.
//!
//! Replay starts from an entity's latest snapshot (or empty state) and
//! shallow-merges the fields of every `state_update` log event recorded on
//! that entity's spans, in increasing timestamp order. Events with equal
//! timestamps apply in trace order: span order, then log order within a
//! span. The fold is a pure function of its inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strand_trace::conventions::{events, tags};
use strand_trace::{Fields, Span, TraceCollector, TraceId, TraceRecord};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::ids::EntityId;
use crate::snapshotter::Snapshotter;

/// Replays traces against snapshots.
#[derive(Debug, Clone)]
pub struct Replayer {
    collector: Arc<TraceCollector>,
    snapshotter: Arc<Snapshotter>,
}

impl Replayer {
    pub fn new(collector: Arc<TraceCollector>, snapshotter: Arc<Snapshotter>) -> Self {
        Self {
            collector,
            snapshotter,
        }
    }

    /// Reconstruct the state of every entity the trace refers to.
    ///
    /// Fails with [`StateError::TraceNotFound`] if the collector has no
    /// record of the trace.
    pub async fn replay_trace(&self, trace_id: &TraceId) -> Result<BTreeMap<EntityId, Fields>> {
        let record = self
            .collector
            .get_trace(trace_id)
            .ok_or_else(|| StateError::TraceNotFound(trace_id.clone()))?;

        let mut states = BTreeMap::new();
        for entity_id in entities_in_trace(&record) {
            let state = self.replay_agent_state(&entity_id, &record).await?;
            states.insert(entity_id, state);
        }

        debug!(trace_id = %trace_id, entities = states.len(), "trace replayed");
        Ok(states)
    }

    /// Reconstruct one entity's state from an already materialized trace.
    pub async fn replay_agent_state(
        &self,
        entity_id: &EntityId,
        trace: &TraceRecord,
    ) -> Result<Fields> {
        let base = self
            .snapshotter
            .restore_latest_snapshot(entity_id)
            .await?
            .map(|snapshot| snapshot.state_data)
            .unwrap_or_default();

        Ok(fold_state_updates(base, &trace.spans, entity_id))
    }
}

/// Entity a span refers to, if tagged.
fn span_entity(span: &Span) -> Option<EntityId> {
    span.tag(tags::ENTITY_ID)
        .map(|value| EntityId::from(value.to_string()))
}

/// Distinct entity ids referenced by the trace's spans.
pub fn entities_in_trace(record: &TraceRecord) -> BTreeSet<EntityId> {
    record.spans.iter().filter_map(span_entity).collect()
}

/// Shallow-merge every state update of `entity_id` in `spans` onto `base`.
pub fn fold_state_updates(mut base: Fields, spans: &[Span], entity_id: &EntityId) -> Fields {
    let mut updates: Vec<_> = spans
        .iter()
        .filter(|span| span_entity(span).as_ref() == Some(entity_id))
        .flat_map(|span| span.logs())
        .filter(|log| log.event_name == events::STATE_UPDATE)
        .collect();

    // Stable: equal timestamps keep trace order.
    updates.sort_by_key(|log| log.timestamp);

    for log in updates {
        for (key, value) in &log.fields {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}
