//! Storage trait definition.
//!
//! Defines the interface for snapshot storage backends.

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{EntityId, SnapshotId};
use crate::snapshot::{Snapshot, SnapshotMetadata};

/// Trait for snapshot storage backends.
///
/// Records are write-once: storing a snapshot id that already exists fails.
/// Loads verify the integrity hash and fail on mismatch.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Store a snapshot, returning its backend-specific location.
    async fn store(&self, snapshot: &Snapshot) -> Result<String>;

    /// Load a snapshot by ID.
    async fn load(&self, id: &SnapshotId) -> Result<Option<Snapshot>>;

    /// Get the latest snapshot for an entity.
    async fn get_latest(&self, entity_id: &EntityId) -> Result<Option<Snapshot>>;

    /// List snapshot metadata for an entity, newest first.
    async fn list(&self, entity_id: &EntityId) -> Result<Vec<SnapshotMetadata>>;

    /// Delete a snapshot. Deleting an unknown id is not an error.
    async fn delete(&self, id: &SnapshotId) -> Result<()>;

    /// Cleanup old snapshots, keeping only the most recent N.
    ///
    /// Returns the number of snapshots deleted.
    async fn cleanup_old_snapshots(
        &self,
        entity_id: &EntityId,
        keep_count: usize,
    ) -> Result<usize> {
        let mut deleted = 0;
        for metadata in self.list(entity_id).await?.iter().skip(keep_count) {
            self.delete(&metadata.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Check if a snapshot exists.
    async fn exists(&self, id: &SnapshotId) -> Result<bool> {
        Ok(self.load(id).await?.is_some())
    }

    /// Get the count of snapshots for an entity.
    async fn count(&self, entity_id: &EntityId) -> Result<usize> {
        Ok(self.list(entity_id).await?.len())
    }
}
