//! Filesystem snapshot storage.
//!
//! Layout: `<root>/<hex(entity_id)>/<snapshot uuid>.json`, one pretty-printed
//! JSON document per snapshot. Entity ids are hex-encoded so any id maps to a
//! single safe directory name.
//!
//! A snapshot is first written and synced to `.<uuid>.json.tmp` in the same
//! directory, then renamed into place. Readers only look at `.json` files, so
//! they never see a partial record, and a crash mid-write leaves only a stray
//! temporary file behind. An existing record is never overwritten.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::traits::SnapshotStorage;
use crate::error::{Result, StateError};
use crate::ids::{EntityId, SnapshotId};
use crate::snapshot::{Snapshot, SnapshotMetadata};

const EXTENSION: &str = "json";
const STAGING_EXTENSION: &str = "tmp";

/// Snapshot storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStorage {
    root: PathBuf,
}

impl FileSnapshotStorage {
    /// Open storage at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entity_dir(&self, entity_id: &EntityId) -> PathBuf {
        self.root.join(hex::encode(entity_id.as_str()))
    }

    fn file_name(id: &SnapshotId) -> String {
        format!("{}.{EXTENSION}", id.as_uuid())
    }

    fn staging_name(id: &SnapshotId) -> String {
        format!(".{}.{STAGING_EXTENSION}", Self::file_name(id))
    }

    fn already_exists(id: &SnapshotId, path: &Path) -> StateError {
        StateError::Storage(format!("{} already exists at {}", id, path.display()))
    }

    /// Move a fully written staging file to its final name.
    async fn publish(id: &SnapshotId, staging: &Path, path: &Path) -> Result<()> {
        if fs::try_exists(path).await? {
            return Err(Self::already_exists(id, path));
        }
        fs::rename(staging, path).await?;
        Ok(())
    }

    async fn read_snapshot(path: &Path) -> Result<Snapshot> {
        let contents = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Every snapshot stored for an entity, unverified.
    async fn read_entity(&self, entity_id: &EntityId) -> Result<Vec<Snapshot>> {
        let mut entries = match fs::read_dir(self.entity_dir(entity_id)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            snapshots.push(Self::read_snapshot(&path).await?);
        }
        Ok(snapshots)
    }

    async fn find(&self, id: &SnapshotId) -> Result<Option<PathBuf>> {
        let file_name = Self::file_name(id);
        let mut entities = fs::read_dir(&self.root).await?;

        while let Some(entry) = entities.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let candidate = entry.path().join(&file_name);
            if fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SnapshotStorage for FileSnapshotStorage {
    async fn store(&self, snapshot: &Snapshot) -> Result<String> {
        let dir = self.entity_dir(&snapshot.entity_id);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(Self::file_name(&snapshot.id));
        if fs::try_exists(&path).await? {
            return Err(Self::already_exists(&snapshot.id, &path));
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let staging = dir.join(Self::staging_name(&snapshot.id));

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StateError::Storage(format!(
                    "{} is already being written at {}",
                    snapshot.id,
                    staging.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };

        let written = async {
            file.write_all(&json).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        let published = match written {
            Ok(()) => Self::publish(&snapshot.id, &staging, &path).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = published {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                warn!(path = %staging.display(), error = %cleanup, "staging file not removed");
            }
            return Err(err);
        }

        debug!(snapshot_id = %snapshot.id, path = %path.display(), "snapshot written");
        Ok(path.display().to_string())
    }

    async fn load(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        let Some(path) = self.find(id).await? else {
            return Ok(None);
        };
        let snapshot = Self::read_snapshot(&path).await?;
        if let Err(err) = snapshot.ensure_integrity() {
            warn!(snapshot_id = %id, path = %path.display(), "snapshot failed integrity check");
            return Err(err);
        }
        Ok(Some(snapshot))
    }

    async fn get_latest(&self, entity_id: &EntityId) -> Result<Option<Snapshot>> {
        let latest = self
            .read_entity(entity_id)
            .await?
            .into_iter()
            .max_by_key(|s| s.timestamp);

        if let Some(snapshot) = &latest {
            if let Err(err) = snapshot.ensure_integrity() {
                warn!(snapshot_id = %snapshot.id, entity_id = %entity_id, "snapshot failed integrity check");
                return Err(err);
            }
        }
        Ok(latest)
    }

    async fn list(&self, entity_id: &EntityId) -> Result<Vec<SnapshotMetadata>> {
        let mut metadata: Vec<SnapshotMetadata> = self
            .read_entity(entity_id)
            .await?
            .iter()
            .map(Snapshot::metadata)
            .collect();

        // Newest first
        metadata.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(metadata)
    }

    async fn delete(&self, id: &SnapshotId) -> Result<()> {
        if let Some(path) = self.find(id).await? {
            fs::remove_file(&path).await?;
            debug!(snapshot_id = %id, path = %path.display(), "snapshot deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn snapshot(entity: &str, offset_ms: i64, progress: i64) -> Snapshot {
        let state = json!({ "progress": progress });
        Snapshot::new(
            EntityId::from(entity),
            Utc::now() + Duration::milliseconds(offset_ms),
            state.as_object().cloned().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_store_load_round_trip() {
        let dir = tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
        let snap = snapshot("agent/with:odd chars", 0, 10);

        let location = storage.store(&snap).await.unwrap();
        assert!(location.ends_with(&format!("{}.json", snap.id.as_uuid())));
        assert!(location.contains(&hex::encode("agent/with:odd chars")));

        let loaded = storage.load(&snap.id).await.unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[tokio::test]
    async fn test_records_are_write_once() {
        let dir = tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
        let snap = snapshot("e1", 0, 1);

        storage.store(&snap).await.unwrap();
        assert!(matches!(
            storage.store(&snap).await,
            Err(StateError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_list_and_cleanup() {
        let dir = tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
        let e1 = EntityId::from("e1");

        for i in 0..4 {
            storage.store(&snapshot("e1", i * 10, i)).await.unwrap();
        }
        storage.store(&snapshot("e2", 1000, 99)).await.unwrap();

        let latest = storage.get_latest(&e1).await.unwrap().unwrap();
        assert_eq!(latest.state_data["progress"], json!(3));
        assert_eq!(storage.count(&e1).await.unwrap(), 4);

        assert_eq!(storage.cleanup_old_snapshots(&e1, 1).await.unwrap(), 3);
        let remaining = storage.list(&e1).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, latest.id);
        assert_eq!(storage.count(&EntityId::from("e2")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tampered_file_fails_integrity() {
        let dir = tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
        let snap = snapshot("e1", 0, 5);
        let location = storage.store(&snap).await.unwrap();

        let mut tampered = snap.clone();
        tampered.state_data.insert("progress".into(), json!(6));
        fs::write(&location, serde_json::to_vec(&tampered).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            storage.load(&snap.id).await,
            Err(StateError::IntegrityCheckFailed { .. })
        ));
        assert!(matches!(
            storage.get_latest(&snap.entity_id).await,
            Err(StateError::IntegrityCheckFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempdir().unwrap();
        let snap = snapshot("e1", 0, 7);
        {
            let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
            storage.store(&snap).await.unwrap();
        }

        let reopened = FileSnapshotStorage::new(dir.path()).await.unwrap();
        let latest = reopened.get_latest(&snap.entity_id).await.unwrap().unwrap();
        assert_eq!(latest.id, snap.id);
        assert!(reopened.load(&SnapshotId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_float_state_survives_disk() {
        let dir = tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();

        let mut values = vec![
            0.0019242829120510786,
            0.1 + 0.2,
            -2.5e-8,
            1e-300,
            6.02214076e23,
            std::f64::consts::PI,
        ];
        // xorshift64 keeps the sample deterministic
        let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
        for _ in 0..400 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            values.push((x >> 11) as f64 / (1u64 << 53) as f64);
        }

        let mut stored = Vec::new();
        for (i, chunk) in values.chunks(4).enumerate() {
            let snap = Snapshot::new(
                EntityId::from("floats"),
                Utc::now() + Duration::microseconds(i as i64),
                json!({ "v": chunk[0], "rest": chunk }).as_object().cloned().unwrap(),
            );
            storage.store(&snap).await.unwrap();
            stored.push(snap);
        }

        for snap in &stored {
            let loaded = storage.load(&snap.id).await.unwrap().unwrap();
            assert_eq!(loaded.state_data, snap.state_data);
            assert!(loaded.verify_integrity());
        }
        let latest = storage
            .get_latest(&EntityId::from("floats"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, stored.last().unwrap().id);
    }

    #[tokio::test]
    async fn test_stray_staging_file_is_ignored() {
        let dir = tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path()).await.unwrap();
        let e1 = EntityId::from("e1");
        let snap = snapshot("e1", 0, 3);

        // Leftover from a write that never finished.
        let entity_dir = dir.path().join(hex::encode("e1"));
        fs::create_dir_all(&entity_dir).await.unwrap();
        let orphan = SnapshotId::generate();
        fs::write(
            entity_dir.join(FileSnapshotStorage::staging_name(&orphan)),
            b"{\"id\": \"trunc",
        )
        .await
        .unwrap();

        let location = storage.store(&snap).await.unwrap();
        assert!(!location.ends_with(".tmp"));
        assert!(!fs::try_exists(entity_dir.join(FileSnapshotStorage::staging_name(&snap.id)))
            .await
            .unwrap());

        let latest = storage.get_latest(&e1).await.unwrap().unwrap();
        assert_eq!(latest.id, snap.id);
        assert_eq!(storage.list(&e1).await.unwrap().len(), 1);
        assert!(storage.load(&orphan).await.unwrap().is_none());
    }
}
