//! Measure definition lookup.

use std::collections::HashMap;
use std::sync::Arc;
use clinitrack_core::{MeasureDefinition, MeasureKey};
use clinitrack_storage::Storage;
use tracing::{debug, info};
use crate::error::{Result, TrackError};

/// Read access to the measure library.
pub struct MeasureLibrary<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> Clone for MeasureLibrary<S> {
    fn clone(&self) -> Self {
        Self { storage: Arc::clone(&self.storage) }
    }
}

impl<S: Storage> MeasureLibrary<S> {
    /// Create a library over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Definition for `key`, or `NotFound`.
    pub async fn resolve(&self, key: &MeasureKey) -> Result<MeasureDefinition> {
        self.storage
            .load_definition(key)
            .await?
            .ok_or_else(|| TrackError::not_found("measure definition", key))
    }

    /// Definitions for a set of keys, fetched once per distinct key.
    ///
    /// Fails with `NotFound` on the first unknown key.
    pub async fn resolve_many<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a MeasureKey>,
    ) -> Result<HashMap<MeasureKey, MeasureDefinition>> {
        let mut resolved = HashMap::new();
        for key in keys {
            if resolved.contains_key(key) {
                continue;
            }
            let definition = self.resolve(key).await?;
            resolved.insert(key.clone(), definition);
        }
        debug!("Resolved {} measure definitions", resolved.len());
        Ok(resolved)
    }

    /// All registered definitions.
    pub async fn list(&self) -> Result<Vec<MeasureDefinition>> {
        let mut definitions = self.storage.list_definitions().await?;
        definitions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(definitions)
    }

    /// Register reference data. Every definition is validated before any is
    /// written.
    pub async fn seed(&self, definitions: &[MeasureDefinition]) -> Result<usize> {
        for definition in definitions {
            definition.validate().map_err(TrackError::InvalidInput)?;
        }
        for definition in definitions {
            self.storage.save_definition(definition).await?;
        }
        info!("Seeded {} measure definitions", definitions.len());
        Ok(definitions.len())
    }
}
