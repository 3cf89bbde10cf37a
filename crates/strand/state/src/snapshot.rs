//! Entity state snapshots.
//!
//! A snapshot is a write-once, full-state checkpoint of one entity at one
//! point in time. Several snapshots per entity are retained; the latest is
//! the one with the greatest timestamp.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strand_trace::Fields;

use crate::error::{Result, StateError};
use crate::ids::{EntityId, SnapshotId};

/// Full-state checkpoint of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier for this snapshot.
    pub id: SnapshotId,

    /// Entity this snapshot belongs to.
    pub entity_id: EntityId,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// The entity's state.
    pub state_data: Fields,

    /// Hex-encoded SHA-256 over the fields above.
    pub integrity_hash: String,
}

impl Snapshot {
    /// Create a snapshot with its integrity hash calculated.
    pub fn new(entity_id: EntityId, timestamp: DateTime<Utc>, state_data: Fields) -> Self {
        Self {
            id: SnapshotId::generate(),
            entity_id,
            timestamp,
            state_data,
            integrity_hash: String::new(),
        }
        .finalize()
    }

    /// Calculate integrity hash for the snapshot.
    pub fn calculate_hash(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.id.as_uuid().as_bytes());
        hasher.update(self.entity_id.as_str().as_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        // Map keys serialize in sorted order, so this is stable.
        hasher.update(serde_json::Value::Object(self.state_data.clone()).to_string().as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Verify snapshot integrity.
    pub fn verify_integrity(&self) -> bool {
        self.integrity_hash == self.calculate_hash()
    }

    /// Like [`verify_integrity`](Self::verify_integrity), but reports the
    /// mismatch.
    pub fn ensure_integrity(&self) -> Result<()> {
        let actual = self.calculate_hash();
        if self.integrity_hash == actual {
            Ok(())
        } else {
            Err(StateError::IntegrityCheckFailed {
                expected: self.integrity_hash.clone(),
                actual,
            })
        }
    }

    /// Recalculate the integrity hash.
    pub fn finalize(mut self) -> Self {
        self.integrity_hash = self.calculate_hash();
        self
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            id: self.id,
            entity_id: self.entity_id.clone(),
            timestamp: self.timestamp,
            key_count: self.state_data.len(),
            integrity_hash: self.integrity_hash.clone(),
        }
    }
}

/// Metadata about a snapshot, without its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: SnapshotId,
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    /// Number of top-level keys in the state.
    pub key_count: usize,
    pub integrity_hash: String,
}

/// Returned by [`Snapshotter::take_snapshot`](crate::Snapshotter::take_snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub id: SnapshotId,
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    /// Backend-specific location of the stored record.
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_snapshot_integrity() {
        let snapshot = Snapshot::new(EntityId::from("e1"), Utc::now(), state(json!({"status": "idle"})));
        assert_eq!(snapshot.integrity_hash.len(), 64);
        assert!(snapshot.verify_integrity());
        assert!(snapshot.ensure_integrity().is_ok());
    }

    #[test]
    fn test_snapshot_integrity_tampered() {
        let mut snapshot =
            Snapshot::new(EntityId::from("e1"), Utc::now(), state(json!({"status": "idle"})));
        snapshot
            .state_data
            .insert("status".to_string(), json!("hacked"));

        assert!(!snapshot.verify_integrity());
        assert!(matches!(
            snapshot.ensure_integrity(),
            Err(StateError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn test_hash_survives_serialization() {
        let snapshot = Snapshot::new(
            EntityId::from("e1"),
            Utc::now(),
            state(json!({"b": 1, "a": [1, 2], "nested": {"z": true, "y": null}})),
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, snapshot);
        assert!(restored.verify_integrity());
    }

    #[test]
    fn test_metadata() {
        let snapshot = Snapshot::new(
            EntityId::from("e1"),
            Utc::now(),
            state(json!({"status": "idle", "progress": 0})),
        );
        let meta = snapshot.metadata();
        assert_eq!(meta.id, snapshot.id);
        assert_eq!(meta.key_count, 2);
    }
}
