//! Treatment goals.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use clinitrack_core::{GoalId, GoalStatus, PatientId, TreatmentGoal};
use clinitrack_storage::Storage;
use crate::error::{Result, TrackError};
use crate::guard::VersionGuard;
use crate::ledger::MeasurementLedger;
use crate::library::MeasureLibrary;

/// Where a goal stands against the patient's latest value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvaluation {
    /// The goal
    pub goal: TreatmentGoal,
    /// Latest recorded value, if any
    pub latest_value: Option<f64>,
    /// Whether the latest value reaches the target
    pub met: bool,
}

/// Treatment goal service.
pub struct GoalTracker<S: Storage> {
    guard: VersionGuard<S>,
    library: MeasureLibrary<S>,
    ledger: MeasurementLedger<S>,
}

impl<S: Storage> GoalTracker<S> {
    /// Create a tracker over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            guard: VersionGuard::new(Arc::clone(&storage)),
            library: MeasureLibrary::new(Arc::clone(&storage)),
            ledger: MeasurementLedger::new(storage),
        }
    }

    /// Store a new goal. The target must be plausible for its measure.
    pub async fn set_goal(&self, goal: TreatmentGoal) -> Result<TreatmentGoal> {
        let definition = self.library.resolve(&goal.measure_key).await?;
        if !definition.accepts(goal.target_value) {
            return Err(TrackError::invalid(format!(
                "target {} is outside [{}, {}] for {}",
                goal.target_value, definition.min_value, definition.max_value, definition.key
            )));
        }
        self.guard.create(goal).await
    }

    /// A patient's goals.
    pub async fn for_patient(&self, patient_id: PatientId) -> Result<Vec<TreatmentGoal>> {
        self.guard.list(|g: &TreatmentGoal| g.patient_id == patient_id).await
    }

    /// Compare a goal against the latest recorded value.
    pub async fn evaluate_goal(&self, id: GoalId) -> Result<GoalEvaluation> {
        let goal: TreatmentGoal = self.guard.load(&id.to_string()).await?;
        let definition = self.library.resolve(&goal.measure_key).await?;
        let latest_value = self
            .ledger
            .latest(goal.patient_id, &goal.measure_key)
            .await?
            .map(|r| r.value);
        let met = latest_value.map_or(false, |v| goal.is_met_by(v, definition.higher_is_better));
        Ok(GoalEvaluation { goal, latest_value, met })
    }

    /// Change a goal's status.
    pub async fn set_status(&self, id: GoalId, expected_version: u64, status: GoalStatus) -> Result<TreatmentGoal> {
        self.guard
            .update(&id.to_string(), expected_version, move |g: &mut TreatmentGoal| {
                g.status = status;
                Ok(())
            })
            .await
    }

    /// Move the target, marking the goal as revised.
    pub async fn revise_target(&self, id: GoalId, expected_version: u64, target_value: f64) -> Result<TreatmentGoal> {
        let goal: TreatmentGoal = self.guard.load(&id.to_string()).await?;
        let definition = self.library.resolve(&goal.measure_key).await?;
        self.guard
            .update(&id.to_string(), expected_version, move |g: &mut TreatmentGoal| {
                if !definition.accepts(target_value) {
                    return Err(TrackError::invalid(format!("target {} is out of range", target_value)));
                }
                g.target_value = target_value;
                g.status = GoalStatus::Revised;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinitrack_core::{ClinicId, ClinicianId, NewMeasurement};
    use crate::error::ErrorKind;
    use crate::test_support::storage;

    #[tokio::test]
    async fn test_goal_evaluation_respects_direction() {
        let (_dir, storage) = storage().await;
        let goals = GoalTracker::new(Arc::clone(&storage));
        let ledger = MeasurementLedger::new(Arc::clone(&storage));
        let patient = PatientId::new();

        let goal = goals
            .set_goal(TreatmentGoal::new(patient, "vas_pain", "pain at most 2/10", 2.0, ClinicianId::new()))
            .await
            .unwrap();

        let pending = goals.evaluate_goal(goal.id).await.unwrap();
        assert_eq!(pending.latest_value, None);
        assert!(!pending.met);

        ledger
            .record(NewMeasurement::new(patient, ClinicId::new(), ClinicianId::new(), "vas_pain", 1.5))
            .await
            .unwrap();
        let met = goals.evaluate_goal(goal.id).await.unwrap();
        assert!(met.met);
    }

    #[tokio::test]
    async fn test_goal_target_must_be_plausible() {
        let (_dir, storage) = storage().await;
        let goals = GoalTracker::new(storage);
        let patient = PatientId::new();

        let err = goals
            .set_goal(TreatmentGoal::new(patient, "vas_pain", "impossible", 15.0, ClinicianId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let goal = goals
            .set_goal(TreatmentGoal::new(patient, "lefs", "return to running", 70.0, ClinicianId::new()))
            .await
            .unwrap();
        let revised = goals.revise_target(goal.id, goal.version, 65.0).await.unwrap();
        assert_eq!(revised.status, GoalStatus::Revised);
        assert_eq!(revised.version, 2);

        let err = goals.set_status(goal.id, goal.version, GoalStatus::Achieved).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);
        assert_eq!(goals.for_patient(patient).await.unwrap().len(), 1);
    }
}
