//! Re-evaluation: batch comparison of one visit's values against baselines.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use clinitrack_core::{
    BaselineMode, BaselineSource, ClinicId, ClinicianId, ComparisonResult, MeasureDefinition,
    MeasureKey, MeasurementId, MeasurementRecord, PatientId, ProgressSummary, Reading,
    ReevaluationItem, ReevaluationSnapshot, SessionId, SnapshotHeader, SnapshotId, Time,
};
use clinitrack_storage::Storage;
use tracing::{info, warn};
use crate::compare::{compare, profile_for};
use crate::config::ProgressConfig;
use crate::error::{Result, TrackError};
use crate::ledger::MeasurementLedger;
use crate::library::MeasureLibrary;

/// One value collected at the visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReevaluationInput {
    /// Measure key
    pub measure_key: MeasureKey,
    /// Current value
    pub value: f64,
    /// Clinician-chosen threshold, replacing the library's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_override: Option<f64>,
}

impl ReevaluationInput {
    /// Input without an override.
    pub fn new(measure_key: impl Into<MeasureKey>, value: f64) -> Self {
        Self {
            measure_key: measure_key.into(),
            value,
            threshold_override: None,
        }
    }

    /// Override the significance threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold_override = Some(threshold);
        self
    }
}

/// A re-evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReevaluationRequest {
    /// Patient
    pub patient_id: PatientId,
    /// Clinic
    pub clinic_id: ClinicId,
    /// Clinician performing the re-evaluation
    pub clinician_id: ClinicianId,
    /// Visit
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Baseline selection for keys without an explicit baseline
    #[serde(default)]
    pub baseline_mode: BaselineMode,
    /// Explicit baseline record per key
    #[serde(default)]
    pub explicit_baselines: HashMap<MeasureKey, MeasurementId>,
    /// Values collected at the visit
    pub items: Vec<ReevaluationInput>,
    /// Clinical notes
    #[serde(default)]
    pub notes: Option<String>,
    /// Time of the visit (defaults to now)
    #[serde(default)]
    pub taken_at: Option<Time>,
}

impl ReevaluationRequest {
    /// Empty request using first-recorded baselines.
    pub fn new(patient_id: PatientId, clinic_id: ClinicId, clinician_id: ClinicianId) -> Self {
        Self {
            patient_id,
            clinic_id,
            clinician_id,
            session_id: None,
            baseline_mode: BaselineMode::default(),
            explicit_baselines: HashMap::new(),
            items: Vec::new(),
            notes: None,
            taken_at: None,
        }
    }

    /// Add a value.
    pub fn item(mut self, input: ReevaluationInput) -> Self {
        self.items.push(input);
        self
    }

    /// Select baselines with `mode`.
    pub fn baseline_mode(mut self, mode: BaselineMode) -> Self {
        self.baseline_mode = mode;
        self
    }

    /// Use a specific record as the baseline for `key`.
    pub fn explicit_baseline(mut self, key: impl Into<MeasureKey>, record: MeasurementId) -> Self {
        self.explicit_baselines.insert(key.into(), record);
        self
    }

    /// Attach a session.
    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Set the visit time.
    pub fn taken_at(mut self, at: Time) -> Self {
        self.taken_at = Some(at);
        self
    }
}

/// Counts over a set of comparisons.
pub fn summarize<'a>(results: impl IntoIterator<Item = &'a ComparisonResult>) -> ProgressSummary {
    ProgressSummary::from_results(results)
}

/// Produces and stores re-evaluation snapshots.
pub struct ProgressAggregator<S: Storage> {
    storage: Arc<S>,
    library: MeasureLibrary<S>,
    ledger: MeasurementLedger<S>,
    config: ProgressConfig,
}

impl<S: Storage> Clone for ProgressAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            library: self.library.clone(),
            ledger: self.ledger.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Storage> ProgressAggregator<S> {
    /// Create an aggregator with the default configuration.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            library: MeasureLibrary::new(Arc::clone(&storage)),
            ledger: MeasurementLedger::new(Arc::clone(&storage)),
            storage,
            config: ProgressConfig::default(),
        }
    }

    /// Use a custom configuration.
    pub fn with_config(mut self, config: ProgressConfig) -> Self {
        self.ledger = self.ledger.with_config(config.clone());
        self.config = config;
        self
    }

    /// Compute the snapshot a request would produce, without storing it.
    pub async fn preview(&self, request: &ReevaluationRequest) -> Result<ReevaluationSnapshot> {
        let inputs = self.normalized_inputs(request)?;
        let definitions = self.library.resolve_many(inputs.iter().map(|i| &i.measure_key)).await?;
        let explicit = self.explicit_baselines(request, &inputs).await?;
        let taken_at = request.taken_at.unwrap_or_else(Utc::now);

        let mut items = Vec::with_capacity(inputs.len());
        for (position, input) in inputs.iter().enumerate() {
            let definition = definitions
                .get(&input.measure_key)
                .ok_or_else(|| TrackError::not_found("measure definition", &input.measure_key))?;
            check_input(definition, input)?;

            let (baseline, source) = match explicit.get(&input.measure_key) {
                Some(record) => (Some(record.clone()), BaselineSource::Explicit),
                None => self.derived_baseline(request, &input.measure_key).await?,
            };

            let mut profile = profile_for(definition, self.config.significance);
            if let Some(threshold) = input.threshold_override {
                profile.threshold = Some(threshold);
            }

            let comparison = compare(
                &input.measure_key,
                baseline.as_ref().map(|b| Reading::at(b.value, b.recorded_at)),
                Reading::at(input.value, taken_at),
                &profile,
            );

            items.push(ReevaluationItem {
                position,
                family: definition.family,
                label: definition.label.clone(),
                baseline_measurement_id: baseline.map(|b| b.id),
                baseline_source: source,
                comparison,
            });
        }

        let header = SnapshotHeader {
            id: SnapshotId::new(),
            patient_id: request.patient_id,
            clinic_id: request.clinic_id,
            clinician_id: request.clinician_id,
            session_id: request.session_id,
            baseline_mode: request.baseline_mode,
            summary: summarize(items.iter().map(|i| &i.comparison)),
            notes: request.notes.clone(),
            taken_at,
        };

        Ok(ReevaluationSnapshot { header, items })
    }

    /// Compare, summarize and store a re-evaluation as one unit.
    ///
    /// Either the header and every item become readable together, or nothing
    /// does and the first error is returned.
    pub async fn reevaluate(&self, request: &ReevaluationRequest) -> Result<ReevaluationSnapshot> {
        let snapshot = self.preview(request).await?;

        let mut tx = self.storage.begin_snapshot(&snapshot.header).await?;
        for item in &snapshot.items {
            if let Err(e) = tx.insert_item(item).await {
                warn!(
                    "Snapshot {} failed at item {} of {}: {}",
                    snapshot.id(),
                    item.position + 1,
                    snapshot.items.len(),
                    e
                );
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of snapshot {} failed: {}", snapshot.id(), rollback_err);
                }
                return Err(e.into());
            }
        }
        tx.commit().await?;

        let summary = &snapshot.header.summary;
        info!(
            "Re-evaluated patient {}: {} items, {} improved, {} declined, {} stable, {} significant",
            snapshot.header.patient_id,
            summary.total,
            summary.improved,
            summary.declined,
            summary.stable,
            summary.significant
        );
        Ok(snapshot)
    }

    /// A stored snapshot with all of its items.
    pub async fn snapshot(&self, id: SnapshotId) -> Result<ReevaluationSnapshot> {
        self.storage
            .load_snapshot(id)
            .await?
            .ok_or_else(|| TrackError::not_found("snapshot", id))
    }

    /// Snapshot headers for a patient, most recent first.
    pub async fn snapshots(&self, patient_id: PatientId) -> Result<Vec<SnapshotHeader>> {
        Ok(self.storage.list_snapshots(patient_id).await?)
    }

    fn normalized_inputs(&self, request: &ReevaluationRequest) -> Result<Vec<ReevaluationInput>> {
        if request.items.is_empty() {
            return Err(TrackError::invalid("re-evaluation has no items"));
        }
        if request.items.len() > self.config.max_batch_items {
            return Err(TrackError::invalid(format!(
                "re-evaluation has {} items, at most {} allowed",
                request.items.len(),
                self.config.max_batch_items
            )));
        }

        let mut seen = HashSet::new();
        let mut inputs = Vec::with_capacity(request.items.len());
        for input in &request.items {
            let key = MeasureKey::new(input.measure_key.as_str());
            if !seen.insert(key.clone()) {
                return Err(TrackError::invalid(format!("{} appears more than once", key)));
            }
            inputs.push(ReevaluationInput { measure_key: key, ..input.clone() });
        }
        Ok(inputs)
    }

    async fn explicit_baselines(
        &self,
        request: &ReevaluationRequest,
        inputs: &[ReevaluationInput],
    ) -> Result<HashMap<MeasureKey, MeasurementRecord>> {
        let mut baselines = HashMap::new();
        for (key, id) in &request.explicit_baselines {
            let key = MeasureKey::new(key.as_str());
            if !inputs.iter().any(|i| i.measure_key == key) {
                return Err(TrackError::invalid(format!("baseline given for {} which is not in the batch", key)));
            }
            let record = self.ledger.get(*id).await?;
            if record.patient_id != request.patient_id {
                return Err(TrackError::invalid(format!("baseline {} belongs to another patient", id)));
            }
            if record.measure_key != key {
                return Err(TrackError::invalid(format!(
                    "baseline {} is a {} reading, not {}",
                    id, record.measure_key, key
                )));
            }
            baselines.insert(key, record);
        }
        Ok(baselines)
    }

    async fn derived_baseline(
        &self,
        request: &ReevaluationRequest,
        key: &MeasureKey,
    ) -> Result<(Option<MeasurementRecord>, BaselineSource)> {
        let (record, source) = match request.baseline_mode {
            BaselineMode::FirstRecorded => (
                self.ledger.baseline(request.patient_id, key).await?,
                BaselineSource::FirstRecorded,
            ),
            BaselineMode::LatestBefore { cutoff } => (
                self.ledger.latest_before(request.patient_id, key, cutoff).await?,
                BaselineSource::LatestBeforeCutoff,
            ),
        };
        match record {
            Some(record) => Ok((Some(record), source)),
            None => Ok((None, BaselineSource::None)),
        }
    }
}

fn check_input(definition: &MeasureDefinition, input: &ReevaluationInput) -> Result<()> {
    if !definition.accepts(input.value) {
        return Err(TrackError::invalid(format!(
            "{} = {} is outside [{}, {}]",
            definition.key, input.value, definition.min_value, definition.max_value
        )));
    }
    if let Some(threshold) = input.threshold_override {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(TrackError::invalid(format!(
                "{}: threshold override must be a positive number",
                definition.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use chrono::Duration;
    use clinitrack_core::{MeasureFamily, MeasurementQuery, NewMeasurement, Trend};
    use clinitrack_storage::{
        CasOutcome, JsonStorage, SnapshotTransaction, StorageError, VersionedRow,
    };
    use crate::error::ErrorKind;
    use crate::test_support::storage;

    /// Storage whose snapshot transactions fail after a set number of items.
    struct FailingStorage<S> {
        inner: S,
        fail_after: usize,
        began: std::sync::Mutex<Option<SnapshotId>>,
    }

    impl<S: Storage> FailingStorage<S> {
        fn new(inner: S, fail_after: usize) -> Self {
            Self { inner, fail_after, began: std::sync::Mutex::new(None) }
        }

        /// Id of the last snapshot a transaction was opened for.
        fn began(&self) -> Option<SnapshotId> {
            *self.began.lock().unwrap()
        }
    }

    struct FailingTransaction {
        inner: Box<dyn SnapshotTransaction>,
        remaining: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SnapshotTransaction for FailingTransaction {
        async fn insert_item(&mut self, item: &ReevaluationItem) -> clinitrack_storage::Result<()> {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return Err(StorageError::Other("disk full".to_string()));
            }
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            self.inner.insert_item(item).await
        }

        async fn commit(self: Box<Self>) -> clinitrack_storage::Result<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> clinitrack_storage::Result<()> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl<S: Storage> Storage for FailingStorage<S> {
        async fn save_definition(&self, definition: &MeasureDefinition) -> clinitrack_storage::Result<()> {
            self.inner.save_definition(definition).await
        }

        async fn load_definition(&self, key: &MeasureKey) -> clinitrack_storage::Result<Option<MeasureDefinition>> {
            self.inner.load_definition(key).await
        }

        async fn list_definitions(&self) -> clinitrack_storage::Result<Vec<MeasureDefinition>> {
            self.inner.list_definitions().await
        }

        async fn append_measurement(&self, record: &MeasurementRecord) -> clinitrack_storage::Result<()> {
            self.inner.append_measurement(record).await
        }

        async fn load_measurement(&self, id: MeasurementId) -> clinitrack_storage::Result<Option<MeasurementRecord>> {
            self.inner.load_measurement(id).await
        }

        async fn query_measurements(&self, query: &MeasurementQuery) -> clinitrack_storage::Result<Vec<MeasurementRecord>> {
            self.inner.query_measurements(query).await
        }

        async fn begin_snapshot(&self, header: &SnapshotHeader) -> clinitrack_storage::Result<Box<dyn SnapshotTransaction>> {
            *self.began.lock().unwrap() = Some(header.id);
            Ok(Box::new(FailingTransaction {
                inner: self.inner.begin_snapshot(header).await?,
                remaining: Arc::new(AtomicUsize::new(self.fail_after)),
            }))
        }

        async fn load_snapshot(&self, id: SnapshotId) -> clinitrack_storage::Result<Option<ReevaluationSnapshot>> {
            self.inner.load_snapshot(id).await
        }

        async fn list_snapshots(&self, patient_id: PatientId) -> clinitrack_storage::Result<Vec<SnapshotHeader>> {
            self.inner.list_snapshots(patient_id).await
        }

        async fn insert_versioned(&self, kind: &str, id: &str, version: u64, data: &serde_json::Value) -> clinitrack_storage::Result<()> {
            self.inner.insert_versioned(kind, id, version, data).await
        }

        async fn load_versioned(&self, kind: &str, id: &str) -> clinitrack_storage::Result<Option<VersionedRow>> {
            self.inner.load_versioned(kind, id).await
        }

        async fn list_versioned(&self, kind: &str) -> clinitrack_storage::Result<Vec<VersionedRow>> {
            self.inner.list_versioned(kind).await
        }

        async fn compare_and_swap(
            &self,
            kind: &str,
            id: &str,
            expected_version: u64,
            data: &serde_json::Value,
        ) -> clinitrack_storage::Result<CasOutcome> {
            self.inner.compare_and_swap(kind, id, expected_version, data).await
        }
    }

    fn request(patient: PatientId) -> ReevaluationRequest {
        ReevaluationRequest::new(patient, ClinicId::new(), ClinicianId::new())
    }

    async fn record(storage: &Arc<impl Storage>, patient: PatientId, key: &str, value: f64, at: Time) -> MeasurementRecord {
        MeasurementLedger::new(Arc::clone(storage))
            .record(NewMeasurement::new(patient, ClinicId::new(), ClinicianId::new(), key, value).recorded_at(at))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reevaluate_counts_and_persists() {
        let (_dir, storage) = storage().await;
        let aggregator = ProgressAggregator::new(Arc::clone(&storage));
        let patient = PatientId::new();
        let start = Utc::now() - Duration::days(30);

        record(&storage, patient, "vas_pain", 8.0, start).await;
        record(&storage, patient, "lefs", 40.0, start).await;
        record(&storage, patient, "rom.shoulder.flexion.active.right", 120.0, start).await;

        let req = request(patient)
            .item(ReevaluationInput::new("vas_pain", 3.0))
            .item(ReevaluationInput::new("lefs", 42.0))
            .item(ReevaluationInput::new("rom.shoulder.flexion.active.right", 122.0))
            .item(ReevaluationInput::new("odi", 30.0))
            .with_notes("4 week re-eval");

        let snapshot = aggregator.reevaluate(&req).await.unwrap();
        let summary = &snapshot.header.summary;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.improved, 2);
        assert_eq!(summary.stable, 1);
        assert_eq!(summary.first_record, 1);
        assert_eq!(summary.significant, 1);
        assert!(snapshot.is_consistent());

        let stored = aggregator.snapshot(snapshot.id()).await.unwrap();
        assert_eq!(stored, snapshot);
        assert_eq!(stored.items[3].comparison.trend, Trend::FirstRecord);
        assert_eq!(stored.items[3].baseline_source, BaselineSource::None);
        assert_eq!(stored.items[0].family, MeasureFamily::OutcomeMeasure);
    }

    #[tokio::test]
    async fn test_validation() {
        let (_dir, storage) = storage().await;
        let aggregator = ProgressAggregator::new(Arc::clone(&storage))
            .with_config(ProgressConfig { max_batch_items: 2, ..Default::default() });
        let patient = PatientId::new();

        let empty = request(patient);
        assert_eq!(aggregator.reevaluate(&empty).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let duplicate = request(patient)
            .item(ReevaluationInput::new("vas_pain", 3.0))
            .item(ReevaluationInput::new("VAS_PAIN", 4.0));
        assert_eq!(aggregator.reevaluate(&duplicate).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let too_many = request(patient)
            .item(ReevaluationInput::new("vas_pain", 3.0))
            .item(ReevaluationInput::new("odi", 4.0))
            .item(ReevaluationInput::new("lefs", 4.0));
        assert_eq!(aggregator.reevaluate(&too_many).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let out_of_range = request(patient).item(ReevaluationInput::new("vas_pain", 12.0));
        assert_eq!(aggregator.reevaluate(&out_of_range).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let bad_override = request(patient).item(ReevaluationInput::new("vas_pain", 3.0).with_threshold(0.0));
        assert_eq!(aggregator.reevaluate(&bad_override).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let unknown = request(patient).item(ReevaluationInput::new("nope", 1.0));
        assert_eq!(aggregator.reevaluate(&unknown).await.unwrap_err().kind(), ErrorKind::NotFound);

        assert!(aggregator.snapshots(patient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_modes() {
        let (_dir, storage) = storage().await;
        let aggregator = ProgressAggregator::new(Arc::clone(&storage));
        let patient = PatientId::new();
        let now = Utc::now();

        let intake = record(&storage, patient, "vas_pain", 9.0, now - Duration::days(60)).await;
        let pre_treatment = record(&storage, patient, "vas_pain", 7.0, now - Duration::days(30)).await;
        record(&storage, patient, "vas_pain", 5.0, now - Duration::days(10)).await;

        let first = aggregator
            .preview(&request(patient).item(ReevaluationInput::new("vas_pain", 4.0)))
            .await
            .unwrap();
        assert_eq!(first.items[0].baseline_measurement_id, Some(intake.id));
        assert_eq!(first.items[0].comparison.change, Some(-5.0));

        let cutoff = request(patient)
            .baseline_mode(BaselineMode::LatestBefore { cutoff: now - Duration::days(20) })
            .item(ReevaluationInput::new("vas_pain", 4.0));
        let cutoff = aggregator.preview(&cutoff).await.unwrap();
        assert_eq!(cutoff.items[0].baseline_measurement_id, Some(pre_treatment.id));
        assert_eq!(cutoff.items[0].baseline_source, BaselineSource::LatestBeforeCutoff);
        assert_eq!(cutoff.items[0].comparison.change, Some(-3.0));

        let explicit = request(patient)
            .explicit_baseline("vas_pain", pre_treatment.id)
            .item(ReevaluationInput::new("vas_pain", 6.0));
        let explicit = aggregator.preview(&explicit).await.unwrap();
        assert_eq!(explicit.items[0].baseline_source, BaselineSource::Explicit);
        assert_eq!(explicit.items[0].comparison.trend, Trend::Stable);

        // preview never stores anything
        assert!(aggregator.snapshots(patient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_baseline_must_match_patient_and_key() {
        let (_dir, storage) = storage().await;
        let aggregator = ProgressAggregator::new(Arc::clone(&storage));
        let patient = PatientId::new();
        let other = PatientId::new();
        let now = Utc::now();

        let foreign = record(&storage, other, "vas_pain", 9.0, now).await;
        let req = request(patient)
            .explicit_baseline("vas_pain", foreign.id)
            .item(ReevaluationInput::new("vas_pain", 4.0));
        assert_eq!(aggregator.preview(&req).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let wrong_key = record(&storage, patient, "nprs", 9.0, now).await;
        let req = request(patient)
            .explicit_baseline("vas_pain", wrong_key.id)
            .item(ReevaluationInput::new("vas_pain", 4.0));
        assert_eq!(aggregator.preview(&req).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        let missing = request(patient)
            .explicit_baseline("vas_pain", MeasurementId::new())
            .item(ReevaluationInput::new("vas_pain", 4.0));
        assert_eq!(aggregator.preview(&missing).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_threshold_override_wins() {
        let (_dir, storage) = storage().await;
        let aggregator = ProgressAggregator::new(Arc::clone(&storage));
        let patient = PatientId::new();
        record(&storage, patient, "rom.knee.flexion.active.left", 90.0, Utc::now() - Duration::days(14)).await;

        let req = request(patient)
            .item(ReevaluationInput::new("rom.knee.flexion.active.left", 100.0).with_threshold(5.0));
        let snapshot = aggregator.preview(&req).await.unwrap();
        assert!(snapshot.items[0].comparison.meets_significance);
        assert_eq!(snapshot.items[0].comparison.threshold, Some(5.0));
    }

    fn four_item_request(patient: PatientId) -> ReevaluationRequest {
        request(patient)
            .item(ReevaluationInput::new("vas_pain", 3.0))
            .item(ReevaluationInput::new("odi", 20.0))
            .item(ReevaluationInput::new("lefs", 50.0))
            .item(ReevaluationInput::new("ndi", 10.0))
    }

    /// Reevaluate through a transaction that fails on the third item and check
    /// that neither the header nor any item is visible afterwards.
    async fn assert_failed_write_leaves_nothing<S: Storage + 'static>(failing: Arc<FailingStorage<S>>) {
        let aggregator = ProgressAggregator::new(Arc::clone(&failing));
        let patient = PatientId::new();

        let err = aggregator.reevaluate(&four_item_request(patient)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);

        let attempted = failing.began().expect("a snapshot transaction was opened");
        let err = aggregator.snapshot(attempted).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(aggregator.snapshots(patient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_snapshot() {
        let (dir, seeded) = storage().await;
        drop(seeded);
        let failing = Arc::new(FailingStorage::new(JsonStorage::new(dir.path()).await.unwrap(), 2));
        assert_failed_write_leaves_nothing(failing).await;
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_failed_write_rolls_back_sqlite_snapshot() {
        let sqlite = clinitrack_storage::SqliteStorage::in_memory().await.unwrap();
        let failing = Arc::new(FailingStorage::new(sqlite, 2));
        MeasureLibrary::new(Arc::clone(&failing))
            .seed(&crate::catalog::standard_catalog())
            .await
            .unwrap();

        // the header row is written when the transaction opens
        assert_failed_write_leaves_nothing(failing).await;
    }
}
