//! Taking and restoring entity snapshots.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use strand_trace::Fields;
use tracing::{debug, info};

use crate::config::SnapshotConfig;
use crate::error::{Result, StateError};
use crate::ids::{EntityId, SnapshotId};
use crate::snapshot::{Snapshot, SnapshotHandle, SnapshotMetadata};
use crate::storage::{InMemorySnapshotStorage, SnapshotStorage};

/// Writes snapshots to a storage backend and reads them back.
///
/// Timestamps are strictly increasing per entity: a snapshot taken within the
/// clock's resolution of the previous one is stamped one microsecond later,
/// so "latest" is never ambiguous.
pub struct Snapshotter {
    storage: Arc<dyn SnapshotStorage>,
    config: SnapshotConfig,
    /// Timestamp of the last snapshot taken per entity.
    last_taken: DashMap<EntityId, DateTime<Utc>>,
}

impl Snapshotter {
    pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
        Self::with_config(storage, SnapshotConfig::default())
    }

    pub fn with_config(storage: Arc<dyn SnapshotStorage>, config: SnapshotConfig) -> Self {
        Self {
            storage,
            config,
            last_taken: DashMap::new(),
        }
    }

    /// Snapshotter over a fresh [`InMemorySnapshotStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySnapshotStorage::new()))
    }

    pub fn storage(&self) -> &Arc<dyn SnapshotStorage> {
        &self.storage
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Persist `state_data` as a new snapshot of `entity_id`.
    pub async fn take_snapshot(
        &self,
        entity_id: &EntityId,
        state_data: Fields,
    ) -> Result<SnapshotHandle> {
        // Storage may hold snapshots from an earlier process.
        let floor = match self.last_taken.get(entity_id).map(|t| *t) {
            Some(last) => Some(last),
            None => self
                .storage
                .get_latest(entity_id)
                .await?
                .map(|s| s.timestamp),
        };
        let timestamp = self.next_timestamp(entity_id, floor);

        let snapshot = Snapshot::new(entity_id.clone(), timestamp, state_data);
        let location = self.storage.store(&snapshot).await?;

        info!(
            entity_id = %entity_id,
            snapshot_id = %snapshot.id,
            location = %location,
            "snapshot taken"
        );

        if let Some(keep) = self.config.retain_per_entity {
            let deleted = self.storage.cleanup_old_snapshots(entity_id, keep).await?;
            if deleted > 0 {
                debug!(entity_id = %entity_id, deleted, "old snapshots removed");
            }
        }

        Ok(SnapshotHandle {
            id: snapshot.id,
            entity_id: snapshot.entity_id,
            timestamp,
            location,
        })
    }

    /// The most recent snapshot of `entity_id`, or `None` if there is none.
    ///
    /// A missing snapshot is not an error. A snapshot that fails its
    /// integrity check is.
    pub async fn restore_latest_snapshot(&self, entity_id: &EntityId) -> Result<Option<Snapshot>> {
        let snapshot = self.storage.get_latest(entity_id).await?;
        match &snapshot {
            Some(s) => debug!(entity_id = %entity_id, snapshot_id = %s.id, "snapshot restored"),
            None => debug!(entity_id = %entity_id, "no snapshot to restore"),
        }
        Ok(snapshot)
    }

    /// Load one snapshot by id.
    pub async fn load_snapshot(&self, id: &SnapshotId) -> Result<Snapshot> {
        self.storage
            .load(id)
            .await?
            .ok_or(StateError::SnapshotNotFound(*id))
    }

    /// Metadata of every retained snapshot of `entity_id`, newest first.
    pub async fn list_snapshots(&self, entity_id: &EntityId) -> Result<Vec<SnapshotMetadata>> {
        self.storage.list(entity_id).await
    }

    fn next_timestamp(&self, entity_id: &EntityId, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let mut entry = self
            .last_taken
            .entry(entity_id.clone())
            .or_insert(DateTime::<Utc>::MIN_UTC);

        let mut timestamp = Utc::now();
        for previous in [Some(*entry), floor].into_iter().flatten() {
            if timestamp <= previous {
                timestamp = previous + Duration::microseconds(1);
            }
        }
        *entry = timestamp;
        timestamp
    }
}

impl std::fmt::Debug for Snapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshotter")
            .field("config", &self.config)
            .field("entities", &self.last_taken.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_take_and_restore() {
        let snapshotter = Snapshotter::in_memory();
        let e1 = EntityId::from("e1");

        let handle = snapshotter
            .take_snapshot(&e1, state(json!({"status": "idle"})))
            .await
            .unwrap();
        assert_eq!(handle.entity_id, e1);

        let restored = snapshotter.restore_latest_snapshot(&e1).await.unwrap().unwrap();
        assert_eq!(restored.id, handle.id);
        assert_eq!(restored.timestamp, handle.timestamp);
        assert_eq!(restored.state_data["status"], json!("idle"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let snapshotter = Snapshotter::in_memory();
        let restored = snapshotter
            .restore_latest_snapshot(&EntityId::from("ghost"))
            .await
            .unwrap();
        assert!(restored.is_none());

        assert!(matches!(
            snapshotter.load_snapshot(&SnapshotId::generate()).await,
            Err(StateError::SnapshotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rapid_snapshots_have_increasing_timestamps() {
        let snapshotter = Snapshotter::in_memory();
        let e1 = EntityId::from("e1");

        let mut last = None;
        for i in 0..50 {
            let handle = snapshotter
                .take_snapshot(&e1, state(json!({ "step": i })))
                .await
                .unwrap();
            if let Some(previous) = last {
                assert!(handle.timestamp > previous);
            }
            last = Some(handle.timestamp);
        }

        let latest = snapshotter.restore_latest_snapshot(&e1).await.unwrap().unwrap();
        assert_eq!(latest.state_data["step"], json!(49));
    }

    #[tokio::test]
    async fn test_retention_prunes_old_snapshots() {
        let snapshotter = Snapshotter::with_config(
            Arc::new(InMemorySnapshotStorage::new()),
            SnapshotConfig::default().with_retention(2),
        );
        let e1 = EntityId::from("e1");

        for i in 0..5 {
            snapshotter
                .take_snapshot(&e1, state(json!({ "step": i })))
                .await
                .unwrap();
        }

        let listed = snapshotter.list_snapshots(&e1).await.unwrap();
        assert_eq!(listed.len(), 2);
        let newest = snapshotter.load_snapshot(&listed[0].id).await.unwrap();
        assert_eq!(newest.state_data["step"], json!(4));
    }
}
