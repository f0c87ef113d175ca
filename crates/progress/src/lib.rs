//! Outcome tracking services
//!
//! Measurement ledger, library lookup, baseline/current comparison,
//! re-evaluation snapshots and optimistic-concurrency updates.

#![warn(missing_docs)]

pub mod error;
pub mod config;
pub mod compare;
pub mod catalog;
pub mod library;
pub mod ledger;
pub mod reevaluation;
pub mod guard;
pub mod assignments;
pub mod goals;

pub use error::{ErrorKind, Result, TrackError};
pub use config::{ProgressConfig, SignificancePolicy};
pub use compare::{classify, compare, compare_history, compare_records, profile_for, Classification};
pub use catalog::standard_catalog;
pub use library::MeasureLibrary;
pub use ledger::{MeasurementLedger, RecordingContext};
pub use reevaluation::{summarize, ProgressAggregator, ReevaluationInput, ReevaluationRequest};
pub use guard::VersionGuard;
pub use assignments::AssignmentTracker;
pub use goals::{GoalEvaluation, GoalTracker};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use clinitrack_storage::JsonStorage;
    use tempfile::TempDir;
    use crate::catalog::standard_catalog;
    use crate::library::MeasureLibrary;

    /// Temporary JSON storage seeded with the standard catalog.
    pub async fn storage() -> (TempDir, Arc<JsonStorage>) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        MeasureLibrary::new(Arc::clone(&storage))
            .seed(&standard_catalog())
            .await
            .unwrap();
        (dir, storage)
    }
}
