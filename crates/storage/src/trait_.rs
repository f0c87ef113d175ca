//! Storage trait abstraction.

use async_trait::async_trait;
use clinitrack_core::{
    MeasureDefinition, MeasureKey, MeasurementId, MeasurementQuery, MeasurementRecord,
    PatientId, ReevaluationItem, ReevaluationSnapshot, SnapshotHeader, SnapshotId,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQL backend error
    #[cfg(feature = "sqlite")]
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Item already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Outcome of a conditional (compare-and-swap) update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored version matched; the new data is stored at `new_version`.
    Applied {
        /// Version now stored
        new_version: u64,
    },
    /// The stored version did not match; nothing was written.
    Conflict {
        /// Version currently stored
        current_version: u64,
    },
    /// No entity with that id exists.
    Missing,
}

/// A stored versioned entity: its version plus its serialized body.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedRow {
    /// Stored version
    pub version: u64,
    /// Serialized entity
    pub data: serde_json::Value,
}

/// Unit of work for writing one snapshot.
///
/// Nothing staged through a transaction is visible to readers until `commit`
/// returns `Ok`. Dropping a transaction without committing discards it.
#[async_trait]
pub trait SnapshotTransaction: Send {
    /// Stage one item.
    async fn insert_item(&mut self, item: &ReevaluationItem) -> Result<()>;

    /// Publish the header and every staged item at once.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything staged.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Storage abstraction for clinitrack data.
///
/// This trait allows different storage backends to be plugged in.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Measure definitions ===

    /// Save a measure definition (create or replace).
    async fn save_definition(&self, definition: &MeasureDefinition) -> Result<()>;

    /// Load a measure definition by key.
    async fn load_definition(&self, key: &MeasureKey) -> Result<Option<MeasureDefinition>>;

    /// List all measure definitions.
    async fn list_definitions(&self) -> Result<Vec<MeasureDefinition>>;

    // === Measurements ===

    /// Append a measurement. Appends never conflict with each other.
    async fn append_measurement(&self, record: &MeasurementRecord) -> Result<()>;

    /// Load a measurement by id.
    async fn load_measurement(&self, id: MeasurementId) -> Result<Option<MeasurementRecord>>;

    /// Records matching the query, ascending by recorded time then id.
    async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<MeasurementRecord>>;

    // === Re-evaluation snapshots ===

    /// Start writing a snapshot.
    async fn begin_snapshot(&self, header: &SnapshotHeader) -> Result<Box<dyn SnapshotTransaction>>;

    /// Load a snapshot with all of its items.
    async fn load_snapshot(&self, id: SnapshotId) -> Result<Option<ReevaluationSnapshot>>;

    /// Snapshot headers for a patient, most recent first.
    async fn list_snapshots(&self, patient_id: PatientId) -> Result<Vec<SnapshotHeader>>;

    // === Versioned entities ===

    /// Insert a new versioned entity. Fails with `AlreadyExists` on a duplicate id.
    async fn insert_versioned(&self, kind: &str, id: &str, version: u64, data: &serde_json::Value) -> Result<()>;

    /// Load a versioned entity.
    async fn load_versioned(&self, kind: &str, id: &str) -> Result<Option<VersionedRow>>;

    /// All entities of one kind.
    async fn list_versioned(&self, kind: &str) -> Result<Vec<VersionedRow>>;

    /// Store `data` at `expected_version + 1` if and only if the stored
    /// version is `expected_version`, as one atomic step.
    async fn compare_and_swap(
        &self,
        kind: &str,
        id: &str,
        expected_version: u64,
        data: &serde_json::Value,
    ) -> Result<CasOutcome>;
}
