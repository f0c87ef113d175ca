//! Re-evaluation snapshot - an immutable batch of comparisons from one visit.

use serde::{Deserialize, Serialize};
use crate::comparison::{ComparisonResult, ProgressSummary};
use crate::id::{ClinicId, ClinicianId, MeasureKey, MeasurementId, PatientId, SessionId, SnapshotId};
use crate::measure::MeasureFamily;
use crate::Time;

/// How baselines are chosen for keys without an explicit baseline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BaselineMode {
    /// Earliest reading in the patient's history
    FirstRecorded,
    /// Most recent reading at or before `cutoff` (e.g. treatment start)
    LatestBefore {
        /// Cutoff time, inclusive
        cutoff: Time,
    },
}

impl Default for BaselineMode {
    fn default() -> Self {
        BaselineMode::FirstRecorded
    }
}

/// Where an item's baseline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Clinician picked a specific record
    Explicit,
    /// First reading in history
    FirstRecorded,
    /// Latest reading before the cutoff
    LatestBeforeCutoff,
    /// No prior reading existed
    None,
}

/// One compared measure inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReevaluationItem {
    /// Position in the batch, starting at 0
    pub position: usize,

    /// Measure family
    pub family: MeasureFamily,

    /// Display label at the time of the snapshot
    pub label: String,

    /// Baseline record used, if any
    pub baseline_measurement_id: Option<MeasurementId>,

    /// Where the baseline came from
    pub baseline_source: BaselineSource,

    /// Comparison outcome
    pub comparison: ComparisonResult,
}

impl ReevaluationItem {
    /// Measure key of the compared value.
    pub fn measure_key(&self) -> &MeasureKey {
        &self.comparison.measure_key
    }
}

/// Snapshot metadata and summary counts, without the items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Unique identifier
    pub id: SnapshotId,

    /// Patient re-evaluated
    pub patient_id: PatientId,

    /// Clinic
    pub clinic_id: ClinicId,

    /// Clinician performing the re-evaluation
    pub clinician_id: ClinicianId,

    /// Visit the re-evaluation belongs to
    pub session_id: Option<SessionId>,

    /// Baseline mode for keys without an explicit baseline
    pub baseline_mode: BaselineMode,

    /// Aggregate counts
    pub summary: ProgressSummary,

    /// Free-text clinical notes
    pub notes: Option<String>,

    /// When the snapshot was taken
    pub taken_at: Time,
}

/// A persisted re-evaluation with its full item list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReevaluationSnapshot {
    /// Metadata and counts
    #[serde(flatten)]
    pub header: SnapshotHeader,

    /// Items in batch order
    pub items: Vec<ReevaluationItem>,
}

impl ReevaluationSnapshot {
    /// Snapshot id.
    pub fn id(&self) -> SnapshotId {
        self.header.id
    }

    /// Whether the stored counts agree with the stored items.
    pub fn is_consistent(&self) -> bool {
        ProgressSummary::from_results(self.items.iter().map(|i| &i.comparison)) == self.header.summary
    }
}
