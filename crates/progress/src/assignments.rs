//! Protocol assignment tracking.
//!
//! Every change goes through the version guard: callers pass the version they
//! last read, and a stale version is rejected rather than merged.

use std::sync::Arc;
use clinitrack_core::{
    AssignmentId, AssignmentStatus, ClinicianId, MeasurementRecord, PatientId, ProtocolAdherence,
    ProtocolAssignment,
};
use clinitrack_storage::Storage;
use crate::error::{Result, TrackError};
use crate::guard::VersionGuard;
use crate::ledger::{MeasurementLedger, RecordingContext};

/// Protocol assignment service.
pub struct AssignmentTracker<S: Storage> {
    guard: VersionGuard<S>,
    ledger: MeasurementLedger<S>,
}

impl<S: Storage> AssignmentTracker<S> {
    /// Create a tracker over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            guard: VersionGuard::new(Arc::clone(&storage)),
            ledger: MeasurementLedger::new(storage),
        }
    }

    /// Store a new assignment.
    pub async fn assign(&self, assignment: ProtocolAssignment) -> Result<ProtocolAssignment> {
        if assignment.protocol_name.trim().is_empty() {
            return Err(TrackError::invalid("protocol name must not be empty"));
        }
        self.guard.create(assignment).await
    }

    /// Load one assignment.
    pub async fn get(&self, id: AssignmentId) -> Result<ProtocolAssignment> {
        self.guard.load(&id.to_string()).await
    }

    /// A patient's assignments, oldest first.
    pub async fn for_patient(&self, patient_id: PatientId) -> Result<Vec<ProtocolAssignment>> {
        let mut assignments = self
            .guard
            .list(|a: &ProtocolAssignment| a.patient_id == patient_id)
            .await?;
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(assignments)
    }

    /// Count one completed session.
    pub async fn record_session(&self, id: AssignmentId, expected_version: u64) -> Result<ProtocolAssignment> {
        self.guard
            .update(&id.to_string(), expected_version, |a: &mut ProtocolAssignment| {
                if a.status != AssignmentStatus::Active {
                    return Err(TrackError::invalid(format!(
                        "cannot log a session on a {} assignment",
                        a.status.as_str()
                    )));
                }
                a.sessions_completed += 1;
                Ok(())
            })
            .await
    }

    /// Move to the next phase.
    pub async fn advance_phase(&self, id: AssignmentId, expected_version: u64) -> Result<ProtocolAssignment> {
        self.guard
            .update(&id.to_string(), expected_version, |a: &mut ProtocolAssignment| {
                if a.status.is_terminal() {
                    return Err(TrackError::invalid(format!("assignment is {}", a.status.as_str())));
                }
                if a.current_phase >= a.total_phases {
                    return Err(TrackError::invalid(format!(
                        "already at final phase {} of {}",
                        a.current_phase, a.total_phases
                    )));
                }
                a.current_phase += 1;
                Ok(())
            })
            .await
    }

    /// Change status. Completed and discontinued assignments stay that way.
    pub async fn set_status(
        &self,
        id: AssignmentId,
        expected_version: u64,
        status: AssignmentStatus,
    ) -> Result<ProtocolAssignment> {
        self.guard
            .update(&id.to_string(), expected_version, move |a: &mut ProtocolAssignment| {
                if a.status.is_terminal() && a.status != status {
                    return Err(TrackError::invalid(format!(
                        "cannot move a {} assignment to {}",
                        a.status.as_str(),
                        status.as_str()
                    )));
                }
                a.status = status;
                Ok(())
            })
            .await
    }

    /// Append a line to the progress notes.
    pub async fn append_progress_note(
        &self,
        id: AssignmentId,
        expected_version: u64,
        note: impl Into<String>,
    ) -> Result<ProtocolAssignment> {
        let note = note.into();
        self.guard
            .update(&id.to_string(), expected_version, move |a: &mut ProtocolAssignment| {
                let note = note.trim();
                if note.is_empty() {
                    return Err(TrackError::invalid("note must not be empty"));
                }
                a.progress_notes = Some(match a.progress_notes.take() {
                    Some(existing) => format!("{}\n{}", existing, note),
                    None => note.to_string(),
                });
                Ok(())
            })
            .await
    }

    /// Record the assignment's current adherence in the measurement ledger.
    pub async fn record_adherence(&self, id: AssignmentId, clinician_id: ClinicianId) -> Result<MeasurementRecord> {
        let assignment = self.get(id).await?;
        let adherence = ProtocolAdherence::from_assignment(&assignment)
            .map_err(|e| TrackError::invalid(e.to_string()))?;
        let context = RecordingContext::new(assignment.patient_id, assignment.clinic_id, clinician_id);
        self.ledger.record_family(&adherence, context).await
    }
}
