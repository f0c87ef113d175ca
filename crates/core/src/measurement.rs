//! Measurement record - one serial observation.

use serde::{Deserialize, Serialize};
use crate::id::{ClinicId, ClinicianId, MeasureKey, MeasurementId, PatientId, SessionId};
use crate::Time;

/// One observation of one measure for one patient.
///
/// Records are append-only: nothing in this workspace mutates or deletes one
/// after it has been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Unique identifier
    pub id: MeasurementId,

    /// Patient the value belongs to
    pub patient_id: PatientId,

    /// Clinic where it was taken
    pub clinic_id: ClinicId,

    /// Clinician who recorded it
    pub clinician_id: ClinicianId,

    /// Which instrument/joint/muscle
    pub measure_key: MeasureKey,

    /// Numeric value
    pub value: f64,

    /// Visit the value was taken in
    pub session_id: Option<SessionId>,

    /// Free-text note
    pub note: Option<String>,

    /// When the measurement was taken
    pub recorded_at: Time,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

impl MeasurementRecord {
    /// Total order used by every history query: recorded time, then id.
    pub fn chronological(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.recorded_at
            .cmp(&b.recorded_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Input for appending a measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMeasurement {
    /// Patient
    pub patient_id: PatientId,

    /// Clinic
    pub clinic_id: ClinicId,

    /// Recording clinician
    pub clinician_id: ClinicianId,

    /// Measure key
    pub measure_key: MeasureKey,

    /// Value
    pub value: f64,

    /// Optional session reference
    pub session_id: Option<SessionId>,

    /// Optional note
    pub note: Option<String>,

    /// When the value was taken; defaults to now
    pub recorded_at: Option<Time>,
}

impl NewMeasurement {
    /// Create an input taken now, with no session or note.
    pub fn new(
        patient_id: PatientId,
        clinic_id: ClinicId,
        clinician_id: ClinicianId,
        measure_key: impl Into<MeasureKey>,
        value: f64,
    ) -> Self {
        Self {
            patient_id,
            clinic_id,
            clinician_id,
            measure_key: measure_key.into(),
            value,
            session_id: None,
            note: None,
            recorded_at: None,
        }
    }

    /// Attach a session.
    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Back-date the reading.
    pub fn recorded_at(mut self, at: Time) -> Self {
        self.recorded_at = Some(at);
        self
    }

    /// Turn the input into a record with a fresh id.
    pub fn into_record(self) -> MeasurementRecord {
        let now = chrono::Utc::now();
        MeasurementRecord {
            id: MeasurementId::new(),
            patient_id: self.patient_id,
            clinic_id: self.clinic_id,
            clinician_id: self.clinician_id,
            measure_key: self.measure_key,
            value: self.value,
            session_id: self.session_id,
            note: self.note,
            recorded_at: self.recorded_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ordered range query over a patient's readings of one measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementQuery {
    /// Patient
    pub patient_id: PatientId,

    /// Measure key
    pub measure_key: MeasureKey,

    /// Only records recorded at or after this time
    pub recorded_from: Option<Time>,

    /// Only records recorded at or before this time
    pub recorded_until: Option<Time>,
}

impl MeasurementQuery {
    /// Full history of one measure for one patient.
    pub fn history(patient_id: PatientId, measure_key: MeasureKey) -> Self {
        Self {
            patient_id,
            measure_key,
            recorded_from: None,
            recorded_until: None,
        }
    }

    /// Restrict to records at or before `cutoff`.
    pub fn until(mut self, cutoff: Time) -> Self {
        self.recorded_until = Some(cutoff);
        self
    }

    /// Restrict to records at or after `start`.
    pub fn since(mut self, start: Time) -> Self {
        self.recorded_from = Some(start);
        self
    }

    /// Whether a record falls inside this query.
    pub fn matches(&self, record: &MeasurementRecord) -> bool {
        record.patient_id == self.patient_id
            && record.measure_key == self.measure_key
            && self.recorded_from.map_or(true, |from| record.recorded_at >= from)
            && self.recorded_until.map_or(true, |until| record.recorded_at <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_into_record_defaults_recorded_at_to_now() {
        let input = NewMeasurement::new(
            PatientId::new(),
            ClinicId::new(),
            ClinicianId::new(),
            "vas_pain",
            6.0,
        );
        let record = input.into_record();
        assert_eq!(record.recorded_at, record.created_at);
        assert_eq!(record.measure_key.as_str(), "vas_pain");
    }

    #[test]
    fn test_query_window_is_inclusive() {
        let patient = PatientId::new();
        let at = Utc::now();
        let record = NewMeasurement::new(patient, ClinicId::new(), ClinicianId::new(), "vas_pain", 4.0)
            .recorded_at(at)
            .into_record();

        let query = MeasurementQuery::history(patient, MeasureKey::new("vas_pain"));
        assert!(query.clone().until(at).matches(&record));
        assert!(query.clone().since(at).matches(&record));
        assert!(!query.clone().until(at - Duration::seconds(1)).matches(&record));
        assert!(!MeasurementQuery::history(PatientId::new(), MeasureKey::new("vas_pain")).matches(&record));
    }
}
