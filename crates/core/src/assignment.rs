//! Protocol assignment - an exercise/treatment protocol prescribed to a patient.

use serde::{Deserialize, Serialize};
use crate::id::{AssignmentId, ClinicId, ClinicianId, PatientId, ProtocolId};
use crate::versioned::VersionedEntity;
use crate::Time;

/// A protocol assigned to a patient, with its progress counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolAssignment {
    /// Unique identifier
    pub id: AssignmentId,

    /// Patient
    pub patient_id: PatientId,

    /// Clinic
    pub clinic_id: ClinicId,

    /// Protocol from the library
    pub protocol_id: ProtocolId,

    /// Protocol display name
    pub protocol_name: String,

    /// Assigning clinician
    pub assigned_by: ClinicianId,

    /// Assignment status
    pub status: AssignmentStatus,

    /// Current phase, starting at 1
    pub current_phase: u32,

    /// Number of phases in the protocol
    pub total_phases: u32,

    /// Sessions completed so far
    pub sessions_completed: u32,

    /// Planned number of sessions
    pub target_sessions: Option<u32>,

    /// Free-text progress notes
    pub progress_notes: Option<String>,

    /// Optimistic concurrency version
    pub version: u64,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

/// Assignment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Being followed
    Active,
    /// Temporarily on hold
    Paused,
    /// All phases finished
    Completed,
    /// Stopped early
    Discontinued,
}

impl AssignmentStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Paused => "paused",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Discontinued => "discontinued",
        }
    }

    /// Whether no further progress can be logged.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Completed | AssignmentStatus::Discontinued)
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AssignmentStatus::Active),
            "paused" => Ok(AssignmentStatus::Paused),
            "completed" => Ok(AssignmentStatus::Completed),
            "discontinued" => Ok(AssignmentStatus::Discontinued),
            other => Err(format!("unknown assignment status: {}", other)),
        }
    }
}

impl ProtocolAssignment {
    /// Create an active assignment at phase 1 with no sessions logged.
    pub fn new(
        patient_id: PatientId,
        clinic_id: ClinicId,
        protocol_id: ProtocolId,
        protocol_name: impl Into<String>,
        assigned_by: ClinicianId,
        total_phases: u32,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: AssignmentId::new(),
            patient_id,
            clinic_id,
            protocol_id,
            protocol_name: protocol_name.into(),
            assigned_by,
            status: AssignmentStatus::Active,
            current_phase: 1,
            total_phases: total_phases.max(1),
            sessions_completed: 0,
            target_sessions: None,
            progress_notes: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the planned session count.
    pub fn with_target_sessions(mut self, target: u32) -> Self {
        self.target_sessions = Some(target);
        self
    }

    /// Completed sessions as a percentage of the target, capped at 100.
    pub fn adherence_percent(&self) -> Option<f64> {
        match self.target_sessions {
            Some(target) if target > 0 => {
                Some((self.sessions_completed as f64 / target as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

impl VersionedEntity for ProtocolAssignment {
    const KIND: &'static str = "protocol_assignment";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn touch(&mut self, at: Time) {
        self.updated_at = at;
    }
}
