//! Measurement ledger.
//!
//! Append-only store of serial measurements. Records are validated against
//! their measure definition on the way in and come back out in chronological
//! order per patient and measure-key.

use std::sync::Arc;
use clinitrack_core::{
    BaselineMode, ClinicId, ClinicianId, ComparisonResult, FamilyReading, MeasureKey, MeasurementId,
    MeasurementQuery, MeasurementRecord, NewMeasurement, PatientId, SessionId, Time,
};
use clinitrack_storage::Storage;
use tracing::debug;
use crate::compare::{compare_records, profile_for};
use crate::config::ProgressConfig;
use crate::error::{Result, TrackError};
use crate::library::MeasureLibrary;

/// Who recorded a family reading, and where.
#[derive(Debug, Clone)]
pub struct RecordingContext {
    /// Patient measured
    pub patient_id: PatientId,
    /// Clinic
    pub clinic_id: ClinicId,
    /// Clinician taking the measurement
    pub clinician_id: ClinicianId,
    /// Visit, if any
    pub session_id: Option<SessionId>,
    /// When the measurement was taken (defaults to now)
    pub recorded_at: Option<Time>,
}

impl RecordingContext {
    /// Context for a measurement taken now, outside any session.
    pub fn new(patient_id: PatientId, clinic_id: ClinicId, clinician_id: ClinicianId) -> Self {
        Self {
            patient_id,
            clinic_id,
            clinician_id,
            session_id: None,
            recorded_at: None,
        }
    }

    /// Attach a session.
    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Back-date the measurement.
    pub fn recorded_at(mut self, at: Time) -> Self {
        self.recorded_at = Some(at);
        self
    }
}

/// Append-only measurement ledger.
pub struct MeasurementLedger<S: Storage> {
    storage: Arc<S>,
    library: MeasureLibrary<S>,
    config: ProgressConfig,
}

impl<S: Storage> Clone for MeasurementLedger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            library: self.library.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Storage> MeasurementLedger<S> {
    /// Create a ledger with the default configuration.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            library: MeasureLibrary::new(Arc::clone(&storage)),
            storage,
            config: ProgressConfig::default(),
        }
    }

    /// Use a custom configuration.
    pub fn with_config(mut self, config: ProgressConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and append a measurement.
    pub async fn record(&self, measurement: NewMeasurement) -> Result<MeasurementRecord> {
        let definition = self.library.resolve(&measurement.measure_key).await?;
        if !definition.accepts(measurement.value) {
            return Err(TrackError::invalid(format!(
                "{} = {} is outside [{}, {}]",
                definition.key, measurement.value, definition.min_value, definition.max_value
            )));
        }

        let record = measurement.into_record();
        self.storage.append_measurement(&record).await?;
        debug!(
            "Recorded {} = {} for patient {}",
            record.measure_key, record.value, record.patient_id
        );
        Ok(record)
    }

    /// Record a typed family reading through its adapter.
    ///
    /// The reading's family must match the family of the definition its key
    /// resolves to.
    pub async fn record_family<R: FamilyReading + Sync>(
        &self,
        reading: &R,
        context: RecordingContext,
    ) -> Result<MeasurementRecord> {
        let key = reading.measure_key();
        let definition = self.library.resolve(&key).await?;
        if definition.family != reading.family() {
            return Err(TrackError::invalid(format!(
                "{} is a {} measure, got a {} reading",
                key,
                definition.family.as_str(),
                reading.family().as_str()
            )));
        }

        let mut measurement = NewMeasurement::new(
            context.patient_id,
            context.clinic_id,
            context.clinician_id,
            key,
            reading.value(),
        );
        measurement.session_id = context.session_id;
        measurement.recorded_at = context.recorded_at;
        self.record(measurement).await
    }

    /// Full history, oldest first.
    pub async fn history(&self, patient_id: PatientId, measure_key: &MeasureKey) -> Result<Vec<MeasurementRecord>> {
        let query = MeasurementQuery::history(patient_id, measure_key.clone());
        Ok(self.storage.query_measurements(&query).await?)
    }

    /// Most recent record.
    pub async fn latest(&self, patient_id: PatientId, measure_key: &MeasureKey) -> Result<Option<MeasurementRecord>> {
        Ok(self.history(patient_id, measure_key).await?.pop())
    }

    /// First record in history.
    pub async fn baseline(&self, patient_id: PatientId, measure_key: &MeasureKey) -> Result<Option<MeasurementRecord>> {
        Ok(self.history(patient_id, measure_key).await?.into_iter().next())
    }

    /// Most recent record at or before `cutoff`.
    pub async fn latest_before(
        &self,
        patient_id: PatientId,
        measure_key: &MeasureKey,
        cutoff: Time,
    ) -> Result<Option<MeasurementRecord>> {
        let query = MeasurementQuery::history(patient_id, measure_key.clone()).until(cutoff);
        Ok(self.storage.query_measurements(&query).await?.pop())
    }

    /// Load one record.
    pub async fn get(&self, id: MeasurementId) -> Result<MeasurementRecord> {
        self.storage
            .load_measurement(id)
            .await?
            .ok_or_else(|| TrackError::not_found("measurement", id))
    }

    /// Compare a baseline against the current record.
    ///
    /// The current record is the most recent one at or before `as_of` (the
    /// newest overall when `as_of` is `None`). The baseline is picked from the
    /// earlier records by `mode`: the first one, or the latest at or before
    /// the mode's cutoff, falling back to the first when none is that early.
    /// Only a single record up to `as_of` yields `first_record`.
    pub async fn progress(
        &self,
        patient_id: PatientId,
        measure_key: &MeasureKey,
        mode: BaselineMode,
        as_of: Option<Time>,
    ) -> Result<ComparisonResult> {
        let definition = self.library.resolve(measure_key).await?;
        let mut query = MeasurementQuery::history(patient_id, measure_key.clone());
        if let Some(as_of) = as_of {
            query = query.until(as_of);
        }
        let mut history = self.storage.query_measurements(&query).await?;
        let current = history
            .pop()
            .ok_or_else(|| TrackError::not_found("measurement history", format!("{}/{}", patient_id, measure_key)))?;

        let baseline = match mode {
            BaselineMode::FirstRecorded => history.first(),
            BaselineMode::LatestBefore { cutoff } => history
                .iter()
                .rev()
                .find(|r| r.recorded_at <= cutoff)
                .or_else(|| history.first()),
        };

        let profile = profile_for(&definition, self.config.significance);
        Ok(compare_records(baseline, &current, &profile))
    }
}
