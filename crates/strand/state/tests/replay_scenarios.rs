//! Replay scenarios: traced agent work folded onto stored snapshots.

use serde_json::json;
use std::sync::Arc;
use strand_state::{
    EntityId, FileSnapshotStorage, Replayer, SnapshotConfig, Snapshotter, StateError,
};
use strand_trace::{AgentTracer, Fields, SpanStatus, TraceCollector, TraceId, Tracer};

fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

struct Harness {
    agents: AgentTracer,
    snapshotter: Arc<Snapshotter>,
    replayer: Replayer,
}

fn harness(snapshotter: Snapshotter) -> Harness {
    let collector = Arc::new(TraceCollector::new());
    let tracer = Arc::new(Tracer::new("replay", Arc::clone(&collector)));
    let snapshotter = Arc::new(snapshotter);

    Harness {
        agents: AgentTracer::new(tracer),
        replayer: Replayer::new(collector, Arc::clone(&snapshotter)),
        snapshotter,
    }
}

/// One trace with two operations on `entity`, each recording one update.
fn run_session(h: &Harness, entity: &str) -> TraceId {
    let root = h.agents.tracer().start_trace("session");

    for update in [json!({"status": "processing"}), json!({"progress": 50})] {
        h.agents
            .trace_agent_operation(entity, "step", Some(&root), |ctx| {
                h.agents
                    .record_state_update(ctx, fields(update))
                    .map_err(|e| e.to_string())
            })
            .unwrap();
    }

    h.agents.tracer().finish_span(&root, SpanStatus::Ok).unwrap();
    root.trace_id().clone()
}

#[tokio::test]
async fn replay_folds_updates_onto_snapshot() {
    let h = harness(Snapshotter::in_memory());
    let e1 = EntityId::from("e1");

    h.snapshotter
        .take_snapshot(&e1, fields(json!({"status": "idle"})))
        .await
        .unwrap();
    let trace_id = run_session(&h, "e1");

    assert!(h.agents.tracer().collector().is_completed(&trace_id));

    let states = h.replayer.replay_trace(&trace_id).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(
        states[&e1],
        fields(json!({"status": "processing", "progress": 50}))
    );
}

#[tokio::test]
async fn replay_without_snapshot_starts_empty() {
    let h = harness(Snapshotter::in_memory());
    let trace_id = run_session(&h, "fresh");

    let states = h.replayer.replay_trace(&trace_id).await.unwrap();
    assert_eq!(
        states[&EntityId::from("fresh")],
        fields(json!({"status": "processing", "progress": 50}))
    );
}

#[tokio::test]
async fn replay_of_unknown_trace_fails() {
    let h = harness(Snapshotter::in_memory());
    run_session(&h, "e1");

    let err = h.replayer.replay_trace(&TraceId::generate()).await.unwrap_err();
    assert!(matches!(err, StateError::TraceNotFound(_)));
}

#[tokio::test]
async fn replay_covers_every_entity_and_active_traces() {
    let h = harness(Snapshotter::in_memory());
    let root = h.agents.tracer().start_trace("collaboration");

    h.snapshotter
        .take_snapshot(&EntityId::from("writer"), fields(json!({"drafts": 0})))
        .await
        .unwrap();

    for (agent, update) in [
        ("writer", json!({"drafts": 1})),
        ("critic", json!({"reviews": 1})),
        ("writer", json!({"drafts": 2})),
    ] {
        h.agents
            .trace_agent_operation(agent, "act", Some(&root), |ctx| {
                h.agents
                    .record_state_update(ctx, fields(update))
                    .map_err(|e| e.to_string())
            })
            .unwrap();
    }

    // The root span is still open; replay works on active traces too.
    let states = h.replayer.replay_trace(root.trace_id()).await.unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[&EntityId::from("writer")], fields(json!({"drafts": 2})));
    assert_eq!(states[&EntityId::from("critic")], fields(json!({"reviews": 1})));

    let record = h.agents.tracer().collector().get_trace(root.trace_id()).unwrap();
    let writer = h
        .replayer
        .replay_agent_state(&EntityId::from("writer"), &record)
        .await
        .unwrap();
    assert_eq!(writer, states[&EntityId::from("writer")]);
}

#[tokio::test]
async fn replay_with_file_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
    let snapshotter =
        Snapshotter::with_config(Arc::new(storage), SnapshotConfig::default().with_retention(1));
    let h = harness(snapshotter);
    let e1 = EntityId::from("e1");

    h.snapshotter
        .take_snapshot(&e1, fields(json!({"status": "stale", "progress": 0})))
        .await
        .unwrap();
    h.snapshotter
        .take_snapshot(&e1, fields(json!({"status": "idle"})))
        .await
        .unwrap();
    assert_eq!(h.snapshotter.list_snapshots(&e1).await.unwrap().len(), 1);

    let trace_id = run_session(&h, "e1");
    let states = h.replayer.replay_trace(&trace_id).await.unwrap();
    assert_eq!(
        states[&e1],
        fields(json!({"status": "processing", "progress": 50}))
    );
}
