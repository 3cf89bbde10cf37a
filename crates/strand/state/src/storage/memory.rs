//! In-memory snapshot storage for development and testing.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::SnapshotStorage;
use crate::error::{Result, StateError};
use crate::ids::{EntityId, SnapshotId};
use crate::snapshot::{Snapshot, SnapshotMetadata};

/// In-memory snapshot storage.
pub struct InMemorySnapshotStorage {
    /// All snapshots indexed by ID.
    snapshots: DashMap<SnapshotId, Snapshot>,

    /// Snapshot IDs indexed by entity, in insertion order.
    by_entity: DashMap<EntityId, Vec<SnapshotId>>,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            by_entity: DashMap::new(),
        }
    }

    /// Get the total number of snapshots stored.
    pub fn total_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Clear all snapshots.
    pub fn clear(&self) {
        self.snapshots.clear();
        self.by_entity.clear();
    }

    fn entity_snapshots(&self, entity_id: &EntityId) -> Vec<Snapshot> {
        let Some(ids) = self.by_entity.get(entity_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.snapshots.get(id).map(|s| s.clone()))
            .collect()
    }
}

impl Default for InMemorySnapshotStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn store(&self, snapshot: &Snapshot) -> Result<String> {
        match self.snapshots.entry(snapshot.id) {
            Entry::Occupied(_) => {
                return Err(StateError::Storage(format!(
                    "{} already exists",
                    snapshot.id
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(snapshot.clone());
            }
        }

        self.by_entity
            .entry(snapshot.entity_id.clone())
            .or_default()
            .push(snapshot.id);

        Ok(format!("memory://{}/{}", snapshot.entity_id, snapshot.id.as_uuid()))
    }

    async fn load(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        let snapshot = self.snapshots.get(id).map(|s| s.clone());
        if let Some(snapshot) = &snapshot {
            snapshot.ensure_integrity()?;
        }
        Ok(snapshot)
    }

    async fn get_latest(&self, entity_id: &EntityId) -> Result<Option<Snapshot>> {
        let latest = self
            .entity_snapshots(entity_id)
            .into_iter()
            .max_by_key(|s| s.timestamp);

        if let Some(snapshot) = &latest {
            snapshot.ensure_integrity()?;
        }
        Ok(latest)
    }

    async fn list(&self, entity_id: &EntityId) -> Result<Vec<SnapshotMetadata>> {
        let mut metadata: Vec<SnapshotMetadata> = self
            .entity_snapshots(entity_id)
            .iter()
            .map(Snapshot::metadata)
            .collect();

        // Newest first
        metadata.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(metadata)
    }

    async fn delete(&self, id: &SnapshotId) -> Result<()> {
        if let Some((_, snapshot)) = self.snapshots.remove(id) {
            if let Some(mut ids) = self.by_entity.get_mut(&snapshot.entity_id) {
                ids.retain(|i| i != id);
            }
        }
        Ok(())
    }
}
