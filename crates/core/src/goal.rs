//! Treatment goal - a patient-specific target on one measure.

use serde::{Deserialize, Serialize};
use crate::id::{ClinicianId, GoalId, MeasureKey, PatientId};
use crate::versioned::VersionedEntity;
use crate::Time;

/// A target value a patient is working towards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentGoal {
    /// Unique identifier
    pub id: GoalId,

    /// Patient
    pub patient_id: PatientId,

    /// Measure the goal is expressed on
    pub measure_key: MeasureKey,

    /// Goal wording ("reach overhead shelf without pain")
    pub description: String,

    /// Value to reach
    pub target_value: f64,

    /// Goal status
    pub status: GoalStatus,

    /// Clinician who set the goal
    pub set_by: ClinicianId,

    /// Target date
    pub target_date: Option<Time>,

    /// Optimistic concurrency version
    pub version: u64,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

/// Goal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Being worked on
    Active,
    /// Target reached
    Achieved,
    /// Replaced by a revised goal
    Revised,
    /// Dropped
    Discontinued,
}

impl TreatmentGoal {
    /// Create an active goal.
    pub fn new(
        patient_id: PatientId,
        measure_key: impl Into<MeasureKey>,
        description: impl Into<String>,
        target_value: f64,
        set_by: ClinicianId,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: GoalId::new(),
            patient_id,
            measure_key: measure_key.into(),
            description: description.into(),
            target_value,
            status: GoalStatus::Active,
            set_by,
            target_date: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `value` reaches the target, respecting the improvement direction.
    pub fn is_met_by(&self, value: f64, higher_is_better: bool) -> bool {
        if higher_is_better {
            value >= self.target_value
        } else {
            value <= self.target_value
        }
    }
}

impl VersionedEntity for TreatmentGoal {
    const KIND: &'static str = "treatment_goal";

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_direction() {
        let pain = TreatmentGoal::new(PatientId::new(), "vas_pain", "pain at most 2", 2.0, ClinicianId::new());
        assert!(pain.is_met_by(2.0, false));
        assert!(pain.is_met_by(1.0, false));
        assert!(!pain.is_met_by(3.0, false));

        let flexion = TreatmentGoal::new(PatientId::new(), "rom.shoulder.flexion.active.right", "160 deg", 160.0, ClinicianId::new());
        assert!(flexion.is_met_by(165.0, true));
        assert!(!flexion.is_met_by(150.0, true));
    }
}
