//! JSON file storage implementation.
//!
//! Stores data as JSON files under a root directory. Every write goes to a
//! staging file first and is renamed into place, so readers see either the
//! old file or the new one, never a half-written one.
//!
//! Layout:
//! ```text
//! definitions/<hex key>.json
//! measurements/<patient id>/<measurement id>.json
//! snapshots/<snapshot id>.json        (header + all items in one file)
//! entities/<kind>/<id>.json           ({"version": n, "data": {...}})
//! entities/<kind>/<id>.lock           (advisory lock for conditional writes)
//! tmp/                                (staging area)
//! ```
//!
//! Conditional writes on versioned entities hold an exclusive `fs2` lock on
//! the entity's lock file, so separate handles and separate processes sharing
//! one root serialize against each other.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use clinitrack_core::{
    MeasureDefinition, MeasureKey, MeasurementId, MeasurementQuery, MeasurementRecord,
    PatientId, ReevaluationItem, ReevaluationSnapshot, SnapshotHeader, SnapshotId,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::{CasOutcome, Result, SnapshotTransaction, Storage, StorageError, VersionedRow};

/// File-based JSON storage backend.
#[derive(Clone)]
pub struct JsonStorage {
    root: PathBuf,
    /// Distinguishes this handle's staging files from other handles'.
    nonce: Ulid,
    staging_seq: Arc<AtomicU64>,
}

/// Staging files older than this are left over from a crashed writer.
const STALE_STAGING: Duration = Duration::from_secs(10 * 60);

#[derive(Serialize, Deserialize)]
struct EntityFile {
    version: u64,
    data: serde_json::Value,
}

impl JsonStorage {
    /// Create storage, creating the directory layout if needed and clearing
    /// stale staging files left behind by an interrupted process.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("definitions")).await?;
        fs::create_dir_all(root.join("measurements")).await?;
        fs::create_dir_all(root.join("snapshots")).await?;
        fs::create_dir_all(root.join("entities")).await?;

        let tmp = root.join("tmp");
        fs::create_dir_all(&tmp).await?;
        clear_stale_staging(&tmp).await?;

        Ok(Self {
            root,
            nonce: Ulid::new(),
            staging_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn definition_path(&self, key: &MeasureKey) -> PathBuf {
        let encoded: String = key.as_str().bytes().map(|b| format!("{:02x}", b)).collect();
        self.root.join("definitions").join(format!("{}.json", encoded))
    }

    fn patient_dir(&self, patient_id: PatientId) -> PathBuf {
        self.root.join("measurements").join(patient_id.to_string())
    }

    fn snapshot_path(&self, id: SnapshotId) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", id))
    }

    fn entity_path(&self, kind: &str, id: &str) -> Result<PathBuf> {
        check_segment(kind)?;
        check_segment(id)?;
        Ok(self.root.join("entities").join(kind).join(format!("{}.json", id)))
    }

    /// Take the exclusive lock guarding conditional writes to one entity.
    async fn lock_entity(&self, kind: &str, id: &str) -> Result<EntityLock> {
        check_segment(kind)?;
        check_segment(id)?;
        let dir = self.root.join("entities").join(kind);
        fs::create_dir_all(&dir).await?;
        EntityLock::acquire(dir.join(format!("{}.lock", id))).await
    }

    fn staging_path(&self) -> PathBuf {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        self.root
            .join("tmp")
            .join(format!("{}-{}-{}.tmp", std::process::id(), self.nonce, seq))
    }

    /// Write `value` to `path` through a staging file and a rename.
    async fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.staging_path();
        fs::write(&staging, json.as_bytes()).await?;
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save_definition(&self, definition: &MeasureDefinition) -> Result<()> {
        self.write_atomic(&self.definition_path(&definition.key), definition).await
    }

    async fn load_definition(&self, key: &MeasureKey) -> Result<Option<MeasureDefinition>> {
        read_json(&self.definition_path(key)).await
    }

    async fn list_definitions(&self) -> Result<Vec<MeasureDefinition>> {
        let mut definitions: Vec<MeasureDefinition> = list_dir(&self.root.join("definitions")).await?;
        definitions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(definitions)
    }

    async fn append_measurement(&self, record: &MeasurementRecord) -> Result<()> {
        let path = self
            .patient_dir(record.patient_id)
            .join(format!("{}.json", record.id));
        if fs::metadata(&path).await.is_ok() {
            return Err(StorageError::AlreadyExists(format!("measurement {}", record.id)));
        }
        self.write_atomic(&path, record).await?;
        debug!("Appended measurement {} ({})", record.id, record.measure_key);
        Ok(())
    }

    async fn load_measurement(&self, id: MeasurementId) -> Result<Option<MeasurementRecord>> {
        let file = format!("{}.json", id);
        let mut rd = fs::read_dir(self.root.join("measurements")).await?;
        while let Some(entry) = rd.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(record) = read_json(&entry.path().join(&file)).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<MeasurementRecord>> {
        let dir = self.patient_dir(query.patient_id);
        if fs::metadata(&dir).await.is_err() {
            return Ok(Vec::new());
        }
        let mut records: Vec<MeasurementRecord> = list_dir(&dir).await?;
        records.retain(|r| query.matches(r));
        records.sort_by(MeasurementRecord::chronological);
        Ok(records)
    }

    async fn begin_snapshot(&self, header: &SnapshotHeader) -> Result<Box<dyn SnapshotTransaction>> {
        let path = self.snapshot_path(header.id);
        if fs::metadata(&path).await.is_ok() {
            return Err(StorageError::AlreadyExists(format!("snapshot {}", header.id)));
        }
        Ok(Box::new(JsonSnapshotTransaction {
            storage: self.clone(),
            path,
            header: header.clone(),
            items: Vec::new(),
        }))
    }

    async fn load_snapshot(&self, id: SnapshotId) -> Result<Option<ReevaluationSnapshot>> {
        read_json(&self.snapshot_path(id)).await
    }

    async fn list_snapshots(&self, patient_id: PatientId) -> Result<Vec<SnapshotHeader>> {
        let snapshots: Vec<ReevaluationSnapshot> = list_dir(&self.root.join("snapshots")).await?;
        let mut headers: Vec<SnapshotHeader> = snapshots
            .into_iter()
            .map(|s| s.header)
            .filter(|h| h.patient_id == patient_id)
            .collect();
        headers.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then_with(|| b.id.cmp(&a.id)));
        Ok(headers)
    }

    async fn insert_versioned(&self, kind: &str, id: &str, version: u64, data: &serde_json::Value) -> Result<()> {
        let path = self.entity_path(kind, id)?;
        let _lock = self.lock_entity(kind, id).await?;
        if fs::metadata(&path).await.is_ok() {
            return Err(StorageError::AlreadyExists(format!("{} {}", kind, id)));
        }
        self.write_atomic(&path, &EntityFile { version, data: data.clone() }).await
    }

    async fn load_versioned(&self, kind: &str, id: &str) -> Result<Option<VersionedRow>> {
        let path = self.entity_path(kind, id)?;
        let file: Option<EntityFile> = read_json(&path).await?;
        Ok(file.map(|f| VersionedRow { version: f.version, data: f.data }))
    }

    async fn list_versioned(&self, kind: &str) -> Result<Vec<VersionedRow>> {
        check_segment(kind)?;
        let dir = self.root.join("entities").join(kind);
        if fs::metadata(&dir).await.is_err() {
            return Ok(Vec::new());
        }
        let files: Vec<EntityFile> = list_dir(&dir).await?;
        Ok(files
            .into_iter()
            .map(|f| VersionedRow { version: f.version, data: f.data })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        kind: &str,
        id: &str,
        expected_version: u64,
        data: &serde_json::Value,
    ) -> Result<CasOutcome> {
        let path = self.entity_path(kind, id)?;
        let _lock = self.lock_entity(kind, id).await?;

        let Some(current) = read_json::<EntityFile>(&path).await? else {
            return Ok(CasOutcome::Missing);
        };
        if current.version != expected_version {
            return Ok(CasOutcome::Conflict { current_version: current.version });
        }

        let new_version = expected_version + 1;
        self.write_atomic(&path, &EntityFile { version: new_version, data: data.clone() })
            .await?;
        Ok(CasOutcome::Applied { new_version })
    }
}

/// Buffers items in memory and publishes the whole snapshot with one rename.
struct JsonSnapshotTransaction {
    storage: JsonStorage,
    path: PathBuf,
    header: SnapshotHeader,
    items: Vec<ReevaluationItem>,
}

#[async_trait]
impl SnapshotTransaction for JsonSnapshotTransaction {
    async fn insert_item(&mut self, item: &ReevaluationItem) -> Result<()> {
        self.items.push(item.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let JsonSnapshotTransaction { storage, path, header, items } = *self;
        let id = header.id;
        let count = items.len();
        let snapshot = ReevaluationSnapshot { header, items };
        storage.write_atomic(&path, &snapshot).await?;
        info!("Committed snapshot {} with {} items", id, count);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        warn!("Rolled back snapshot {} ({} staged items discarded)", self.header.id, self.items.len());
        Ok(())
    }
}

/// Exclusive advisory lock on an entity's lock file, released on drop.
struct EntityLock(std::fs::File);

impl EntityLock {
    async fn acquire(path: PathBuf) -> Result<Self> {
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok::<_, StorageError>(EntityLock(file))
        })
        .await
        .map_err(|e| StorageError::Other(format!("lock task failed: {}", e)))?
    }
}

impl Drop for EntityLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// Remove staging files old enough that no live writer still owns them.
async fn clear_stale_staging(tmp: &Path) -> Result<()> {
    let mut rd = fs::read_dir(tmp).await?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("tmp") {
            continue;
        }
        // renamed away by its writer since the listing
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or_default();
        if age < STALE_STAGING {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => debug!("Removed stale staging file {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn check_segment(segment: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::Other(format!("invalid path segment: {:?}", segment)))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}
