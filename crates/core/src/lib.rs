//! Clinitrack core data models.
//!
//! This crate defines the data structures of the clinical outcome-tracking
//! core: serial measurements, measure reference data, comparisons,
//! re-evaluation snapshots and the versioned aggregates edited by clinicians.

#![warn(missing_docs)]

// Core identities
mod id;

// Reference data and observations
mod measure;
mod measurement;
mod family;

// Derived results
mod comparison;
mod snapshot;

// Versioned aggregates
mod versioned;
mod assignment;
mod goal;

// Re-exports
pub use id::*;

pub use measure::{MeasureDefinition, MeasureFamily};
pub use measurement::{MeasurementQuery, MeasurementRecord, NewMeasurement};
pub use family::{
    FamilyError, FamilyReading, FunctionalTest, GradeModifier, MotionMode, MuscleGrade,
    MuscleTest, OutcomeScore, ProtocolAdherence, RangeOfMotion, Side,
};

pub use comparison::{ComparisonResult, ProgressSummary, Reading, ScoringProfile, Trend};
pub use snapshot::{
    BaselineMode, BaselineSource, ReevaluationItem, ReevaluationSnapshot, SnapshotHeader,
};

pub use versioned::VersionedEntity;
pub use assignment::{AssignmentStatus, ProtocolAssignment};
pub use goal::{GoalStatus, TreatmentGoal};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
