//! Strand State
//!
//! Entity snapshots and deterministic state replay from traces.
//!
//! ## Features
//!
//! - **Snapshots**: write-once, integrity-hashed full-state checkpoints per entity
//! - **Storage**: pluggable backends (in-memory, filesystem)
//! - **Replay**: fold a trace's `state_update` events onto the latest snapshot

pub mod config;
pub mod error;
pub mod ids;
pub mod replay;
pub mod snapshot;
pub mod snapshotter;
pub mod storage;

pub use config::SnapshotConfig;
pub use error::{Result, StateError};
pub use ids::{EntityId, SnapshotId};
pub use replay::{entities_in_trace, fold_state_updates, Replayer};
pub use snapshot::{Snapshot, SnapshotHandle, SnapshotMetadata};
pub use snapshotter::Snapshotter;
pub use storage::{FileSnapshotStorage, InMemorySnapshotStorage, SnapshotStorage};
