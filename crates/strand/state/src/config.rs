//! Snapshotter configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Snapshotter`](crate::Snapshotter).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Keep at most this many snapshots per entity, newest first.
    /// `None` keeps every snapshot.
    pub retain_per_entity: Option<usize>,
}

impl SnapshotConfig {
    /// Keep only the newest `count` snapshots per entity
    pub fn with_retention(mut self, count: usize) -> Self {
        self.retain_per_entity = Some(count);
        self
    }
}
