//! SQLite storage backend for clinitrack.
//!
//! Measurements, snapshots and snapshot items live in their own tables so
//! that history queries and snapshot writes map onto an indexed range scan
//! and a single transaction. Versioned entities share one `entities` table
//! keyed by `(entity_type, id)`; the optimistic-concurrency check is the
//! `WHERE version = ?` clause of a single `UPDATE`.

use async_trait::async_trait;
use chrono::SecondsFormat;
use clinitrack_core::{
    MeasureDefinition, MeasureKey, MeasurementId, MeasurementQuery, MeasurementRecord,
    PatientId, ReevaluationItem, ReevaluationSnapshot, SnapshotHeader, SnapshotId, Time,
};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use tracing::{debug, info, warn};

use super::trait_::{CasOutcome, Result, SnapshotTransaction, Storage, StorageError, VersionedRow};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance.
    pub async fn new(db_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect(db_url).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create a new SQLite storage instance from a path, creating the file if needed.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let path = path
            .to_str()
            .ok_or_else(|| StorageError::Other(format!("non UTF-8 path: {}", path.display())))?;
        Self::new(&format!("sqlite://{}?mode=rwc", path)).await
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// A single connection is used; every connection to `:memory:` would
    /// otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS measure_definitions (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS measurements (
                id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                measure_key TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_measurements_history
                ON measurements(patient_id, measure_key, recorded_at, id)",
            "CREATE TABLE IF NOT EXISTS reevaluations (
                id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                taken_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_reevaluations_patient
                ON reevaluations(patient_id, taken_at)",
            "CREATE TABLE IF NOT EXISTS reevaluation_items (
                snapshot_id TEXT NOT NULL REFERENCES reevaluations(id),
                position INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (snapshot_id, position)
            )",
            "CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                id TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, id)
            )",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Helper to extract string from row.
    fn get_string(row: &SqliteRow, column: &str) -> String {
        row.try_get(column).unwrap_or_default()
    }

    fn decode<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> Result<T> {
        Ok(serde_json::from_str(&Self::get_string(row, "data"))?)
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

/// Fixed-width UTC timestamps sort lexicographically in time order.
fn sortable(at: &Time) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl Storage for SqliteStorage {
    // === Measure definitions ===

    async fn save_definition(&self, definition: &MeasureDefinition) -> Result<()> {
        let data = serde_json::to_string(definition)?;
        sqlx::query("INSERT OR REPLACE INTO measure_definitions (key, data) VALUES (?, ?)")
            .bind(definition.key.as_str())
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_definition(&self, key: &MeasureKey) -> Result<Option<MeasureDefinition>> {
        let row = sqlx::query("SELECT data FROM measure_definitions WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn list_definitions(&self) -> Result<Vec<MeasureDefinition>> {
        let rows = sqlx::query("SELECT data FROM measure_definitions ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    // === Measurements ===

    async fn append_measurement(&self, record: &MeasurementRecord) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO measurements (id, patient_id, measure_key, recorded_at, data)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.patient_id.to_string())
        .bind(record.measure_key.as_str())
        .bind(sortable(&record.recorded_at))
        .bind(data)
        .execute(&self.pool)
        .await?;

        debug!("Appended measurement {} ({})", record.id, record.measure_key);
        Ok(())
    }

    async fn load_measurement(&self, id: MeasurementId) -> Result<Option<MeasurementRecord>> {
        let row = sqlx::query("SELECT data FROM measurements WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<MeasurementRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM measurements
            WHERE patient_id = ? AND measure_key = ?
              AND (? IS NULL OR recorded_at >= ?)
              AND (? IS NULL OR recorded_at <= ?)
            ORDER BY recorded_at ASC, id ASC",
        )
        .bind(query.patient_id.to_string())
        .bind(query.measure_key.as_str())
        .bind(query.recorded_from.as_ref().map(sortable))
        .bind(query.recorded_from.as_ref().map(sortable))
        .bind(query.recorded_until.as_ref().map(sortable))
        .bind(query.recorded_until.as_ref().map(sortable))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode).collect()
    }

    // === Re-evaluation snapshots ===

    async fn begin_snapshot(&self, header: &SnapshotHeader) -> Result<Box<dyn SnapshotTransaction>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO reevaluations (id, patient_id, taken_at, data) VALUES (?, ?, ?, ?)")
            .bind(header.id.to_string())
            .bind(header.patient_id.to_string())
            .bind(sortable(&header.taken_at))
            .bind(serde_json::to_string(header)?)
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(SqliteSnapshotTransaction {
            snapshot_id: header.id,
            tx,
            items: 0,
        }))
    }

    async fn load_snapshot(&self, id: SnapshotId) -> Result<Option<ReevaluationSnapshot>> {
        let Some(row) = sqlx::query("SELECT data FROM reevaluations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let header: SnapshotHeader = Self::decode(&row)?;

        let rows = sqlx::query(
            "SELECT data FROM reevaluation_items WHERE snapshot_id = ? ORDER BY position ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let items = rows.iter().map(Self::decode).collect::<Result<Vec<ReevaluationItem>>>()?;

        Ok(Some(ReevaluationSnapshot { header, items }))
    }

    async fn list_snapshots(&self, patient_id: PatientId) -> Result<Vec<SnapshotHeader>> {
        let rows = sqlx::query(
            "SELECT data FROM reevaluations WHERE patient_id = ? ORDER BY taken_at DESC, id DESC",
        )
        .bind(patient_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    // === Versioned entities ===

    async fn insert_versioned(&self, kind: &str, id: &str, version: u64, data: &serde_json::Value) -> Result<()> {
        let now = sortable(&chrono::Utc::now());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO entities (entity_type, id, version, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(id)
        .bind(version as i64)
        .bind(serde_json::to_string(data)?)
        .bind(now.as_str())
        .bind(now.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlreadyExists(format!("{} {}", kind, id)));
        }
        Ok(())
    }

    async fn load_versioned(&self, kind: &str, id: &str) -> Result<Option<VersionedRow>> {
        let row = sqlx::query("SELECT version, data FROM entities WHERE entity_type = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(versioned_row).transpose()
    }

    async fn list_versioned(&self, kind: &str) -> Result<Vec<VersionedRow>> {
        let rows = sqlx::query(
            "SELECT version, data FROM entities WHERE entity_type = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(versioned_row).collect()
    }

    async fn compare_and_swap(
        &self,
        kind: &str,
        id: &str,
        expected_version: u64,
        data: &serde_json::Value,
    ) -> Result<CasOutcome> {
        let new_version = expected_version + 1;
        let result = sqlx::query(
            "UPDATE entities SET version = ?, data = ?, updated_at = ?
            WHERE entity_type = ? AND id = ? AND version = ?",
        )
        .bind(new_version as i64)
        .bind(serde_json::to_string(data)?)
        .bind(sortable(&chrono::Utc::now()))
        .bind(kind)
        .bind(id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CasOutcome::Applied { new_version });
        }

        // Nothing matched: tell a stale version apart from a missing row.
        match self.load_versioned(kind, id).await? {
            Some(row) => Ok(CasOutcome::Conflict { current_version: row.version }),
            None => Ok(CasOutcome::Missing),
        }
    }
}

fn versioned_row(row: &SqliteRow) -> Result<VersionedRow> {
    let version: i64 = row.try_get("version")?;
    let data = serde_json::from_str(&SqliteStorage::get_string(row, "data"))?;
    Ok(VersionedRow { version: version as u64, data })
}

/// One SQL transaction spanning the header insert and every item insert.
struct SqliteSnapshotTransaction {
    snapshot_id: SnapshotId,
    tx: Transaction<'static, Sqlite>,
    items: usize,
}

#[async_trait]
impl SnapshotTransaction for SqliteSnapshotTransaction {
    async fn insert_item(&mut self, item: &ReevaluationItem) -> Result<()> {
        sqlx::query("INSERT INTO reevaluation_items (snapshot_id, position, data) VALUES (?, ?, ?)")
            .bind(self.snapshot_id.to_string())
            .bind(item.position as i64)
            .bind(serde_json::to_string(item)?)
            .execute(&mut *self.tx)
            .await?;
        self.items += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteSnapshotTransaction { snapshot_id, tx, items } = *self;
        tx.commit().await?;
        info!("Committed snapshot {} with {} items", snapshot_id, items);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteSnapshotTransaction { snapshot_id, tx, items } = *self;
        tx.rollback().await?;
        warn!("Rolled back snapshot {} ({} staged items discarded)", snapshot_id, items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use clinitrack_core::{
        BaselineMode, BaselineSource, ClinicId, ClinicianId, ComparisonResult, MeasureFamily,
        NewMeasurement, ProgressSummary, Trend,
    };

    fn header(patient_id: PatientId) -> SnapshotHeader {
        SnapshotHeader {
            id: SnapshotId::new(),
            patient_id,
            clinic_id: ClinicId::new(),
            clinician_id: ClinicianId::new(),
            session_id: None,
            baseline_mode: BaselineMode::FirstRecorded,
            summary: ProgressSummary::default(),
            notes: Some("4 week re-eval".to_string()),
            taken_at: Utc::now(),
        }
    }

    fn item(position: usize) -> ReevaluationItem {
        ReevaluationItem {
            position,
            family: MeasureFamily::RangeOfMotion,
            label: "Shoulder flexion".to_string(),
            baseline_measurement_id: None,
            baseline_source: BaselineSource::None,
            comparison: ComparisonResult {
                measure_key: MeasureKey::new(format!("rom.k{}", position)),
                baseline_value: None,
                current_value: 120.0,
                change: None,
                percent_change: None,
                threshold: None,
                meets_significance: false,
                exceeds_mdc: false,
                trend: Trend::FirstRecord,
                baseline_recorded_at: None,
                current_recorded_at: None,
            },
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(storage.health_check().await);
    }

    #[tokio::test]
    async fn test_history_window() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let patient = PatientId::new();
        let start = Utc::now();

        for day in 0..4 {
            let record = NewMeasurement::new(patient, ClinicId::new(), ClinicianId::new(), "odi", 50.0 - day as f64 * 5.0)
                .recorded_at(start + Duration::days(day))
                .into_record();
            storage.append_measurement(&record).await.unwrap();
        }

        let query = MeasurementQuery::history(patient, MeasureKey::new("odi"));
        assert_eq!(storage.query_measurements(&query).await.unwrap().len(), 4);

        let window = query.since(start + Duration::days(1)).until(start + Duration::days(2));
        let values: Vec<f64> = storage
            .query_measurements(&window)
            .await
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![45.0, 40.0]);
    }

    #[tokio::test]
    async fn test_sub_microsecond_ordering_and_inclusive_cutoff() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let patient = PatientId::new();
        let start = Utc::now();
        let later = start + Duration::nanoseconds(400);

        for (value, at) in [(6.0, later), (7.0, start)] {
            let record = NewMeasurement::new(patient, ClinicId::new(), ClinicianId::new(), "nprs", value)
                .recorded_at(at)
                .into_record();
            storage.append_measurement(&record).await.unwrap();
        }

        let query = MeasurementQuery::history(patient, MeasureKey::new("nprs"));
        let values: Vec<f64> = storage
            .query_measurements(&query)
            .await
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![7.0, 6.0]);

        let until_start = storage.query_measurements(&query.clone().until(start)).await.unwrap();
        assert_eq!(until_start.len(), 1);
        assert_eq!(until_start[0].recorded_at, start);
    }

    #[tokio::test]
    async fn test_snapshot_commit_and_rollback() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let patient = PatientId::new();

        let committed = header(patient);
        let mut tx = storage.begin_snapshot(&committed).await.unwrap();
        tx.insert_item(&item(0)).await.unwrap();
        tx.insert_item(&item(1)).await.unwrap();
        tx.commit().await.unwrap();

        let discarded = header(patient);
        let mut tx = storage.begin_snapshot(&discarded).await.unwrap();
        tx.insert_item(&item(0)).await.unwrap();
        tx.rollback().await.unwrap();

        let loaded = storage.load_snapshot(committed.id).await.unwrap().unwrap();
        assert_eq!(loaded.items.len(), 2);
        assert!(storage.load_snapshot(discarded.id).await.unwrap().is_none());
        assert_eq!(storage.list_snapshots(patient).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let data = serde_json::json!({"phase": 1});

        storage.insert_versioned("protocol_assignment", "a", 1, &data).await.unwrap();
        assert!(matches!(
            storage.insert_versioned("protocol_assignment", "a", 1, &data).await,
            Err(StorageError::AlreadyExists(_))
        ));

        let next = serde_json::json!({"phase": 2});
        assert_eq!(
            storage.compare_and_swap("protocol_assignment", "a", 1, &next).await.unwrap(),
            CasOutcome::Applied { new_version: 2 }
        );
        assert_eq!(
            storage.compare_and_swap("protocol_assignment", "a", 1, &next).await.unwrap(),
            CasOutcome::Conflict { current_version: 2 }
        );
        assert_eq!(
            storage.compare_and_swap("protocol_assignment", "missing", 1, &next).await.unwrap(),
            CasOutcome::Missing
        );
    }
}
