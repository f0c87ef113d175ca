//! Errors surfaced by the outcome-tracking services.

use clinitrack_storage::StorageError;

/// Result alias for the outcome-tracking services.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Errors surfaced to callers of the ledger, library, aggregator and guard.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// Unknown measure-key, entity, measurement or snapshot
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of thing that was looked up
        entity: &'static str,
        /// Identifier used
        id: String,
    },

    /// Value outside plausible bounds, malformed batch, invalid transition
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stale optimistic-concurrency update
    #[error("{entity} {id} was modified by another request (expected version {expected}, found {current}), please reload")]
    VersionConflict {
        /// Entity kind
        entity: &'static str,
        /// Entity id
        id: String,
        /// Version the caller submitted
        expected: u64,
        /// Version currently stored
        current: u64,
    },

    /// Infrastructure failure in the storage layer
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Coarse classification used by outer layers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 404-equivalent
    NotFound,
    /// 400-equivalent
    InvalidInput,
    /// 409-equivalent, retryable after a reload
    VersionConflict,
    /// Storage failure
    Infrastructure,
}

impl TrackError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        TrackError::NotFound { entity, id: id.to_string() }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        TrackError::InvalidInput(message.into())
    }

    /// Coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackError::NotFound { .. } => ErrorKind::NotFound,
            TrackError::InvalidInput(_) => ErrorKind::InvalidInput,
            TrackError::VersionConflict { .. } => ErrorKind::VersionConflict,
            TrackError::Storage(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether re-reading and resubmitting can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackError::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(e: serde_json::Error) -> Self {
        TrackError::Storage(StorageError::Json(e))
    }
}
