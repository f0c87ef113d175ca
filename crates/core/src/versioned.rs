//! Versioned entities - aggregates guarded by optimistic concurrency.

use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::Time;

/// An aggregate carrying a monotonically increasing `version`.
///
/// The stored version is bumped by exactly one on every successful update.
/// An update submitted against any other version is rejected.
pub trait VersionedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage kind, used to namespace ids ("protocol_assignment", ...).
    const KIND: &'static str;

    /// Identifier as stored.
    fn entity_id(&self) -> String;

    /// Current version.
    fn version(&self) -> u64;

    /// Overwrite the version.
    fn set_version(&mut self, version: u64);

    /// Record a modification time.
    fn touch(&mut self, at: Time);
}
