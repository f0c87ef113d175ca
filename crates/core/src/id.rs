//! Unique identifiers for clinitrack entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier.
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a patient
    PatientId
);
ulid_id!(
    /// Unique identifier for a clinic
    ClinicId
);
ulid_id!(
    /// Unique identifier for a clinician
    ClinicianId
);
ulid_id!(
    /// Unique identifier for a visit/treatment session
    SessionId
);
ulid_id!(
    /// Unique identifier for a MeasurementRecord
    MeasurementId
);
ulid_id!(
    /// Unique identifier for a ReevaluationSnapshot
    SnapshotId
);
ulid_id!(
    /// Unique identifier for a treatment protocol
    ProtocolId
);
ulid_id!(
    /// Unique identifier for a ProtocolAssignment
    AssignmentId
);
ulid_id!(
    /// Unique identifier for a TreatmentGoal
    GoalId
);

/// Key identifying which standardized instrument, joint or muscle a value belongs to.
///
/// Keys are trimmed and lower-cased on construction so that `"VAS_Pain "` and
/// `"vas_pain"` address the same definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MeasureKey(String);

impl MeasureKey {
    /// Create a normalized measure key.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().trim().to_lowercase())
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty after normalization.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for MeasureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MeasureKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MeasureKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<MeasureKey> for String {
    fn from(key: MeasureKey) -> Self {
        key.0
    }
}
