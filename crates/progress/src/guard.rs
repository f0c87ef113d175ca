//! Optimistic-concurrency guard for versioned aggregates.

use std::sync::Arc;
use chrono::Utc;
use clinitrack_core::VersionedEntity;
use clinitrack_storage::{CasOutcome, Storage};
use tracing::{info, warn};
use crate::error::{Result, TrackError};

/// Creates, loads and updates versioned entities.
///
/// Updates are accepted only against the version currently stored. The
/// version check and the write happen as one compare-and-swap in storage, so
/// of two updates submitted against the same version exactly one succeeds.
/// Nothing here retries.
pub struct VersionGuard<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> Clone for VersionGuard<S> {
    fn clone(&self) -> Self {
        Self { storage: Arc::clone(&self.storage) }
    }
}

impl<S: Storage> VersionGuard<S> {
    /// Create a guard over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Store a new entity at version 1.
    pub async fn create<T: VersionedEntity>(&self, mut entity: T) -> Result<T> {
        entity.set_version(1);
        let data = serde_json::to_value(&entity)?;
        self.storage
            .insert_versioned(T::KIND, &entity.entity_id(), 1, &data)
            .await?;
        info!("Created {} {}", T::KIND, entity.entity_id());
        Ok(entity)
    }

    /// Load an entity.
    pub async fn load<T: VersionedEntity>(&self, id: &str) -> Result<T> {
        let row = self
            .storage
            .load_versioned(T::KIND, id)
            .await?
            .ok_or_else(|| TrackError::not_found(T::KIND, id))?;
        let mut entity: T = serde_json::from_value(row.data)?;
        entity.set_version(row.version);
        Ok(entity)
    }

    /// All entities of a kind matching `filter`.
    pub async fn list<T: VersionedEntity>(&self, filter: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let rows = self.storage.list_versioned(T::KIND).await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let mut entity: T = serde_json::from_value(row.data)?;
            entity.set_version(row.version);
            if filter(&entity) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Apply `mutation` if the stored version equals `expected_version`.
    ///
    /// On success the stored version is `expected_version + 1` and the
    /// updated entity is returned. A stale version yields `VersionConflict`
    /// and nothing is written; so does an error returned by the mutation.
    pub async fn update<T, F>(&self, id: &str, expected_version: u64, mutation: F) -> Result<T>
    where
        T: VersionedEntity,
        F: FnOnce(&mut T) -> Result<()> + Send,
    {
        let mut entity: T = self.load(id).await?;
        if entity.version() != expected_version {
            warn!(
                "Rejected stale update of {} {}: expected version {}, stored {}",
                T::KIND,
                id,
                expected_version,
                entity.version()
            );
            return Err(conflict::<T>(id, expected_version, entity.version()));
        }

        mutation(&mut entity)?;
        entity.set_version(expected_version + 1);
        entity.touch(Utc::now());
        let data = serde_json::to_value(&entity)?;

        match self
            .storage
            .compare_and_swap(T::KIND, id, expected_version, &data)
            .await?
        {
            CasOutcome::Applied { new_version } => {
                info!("Updated {} {} to version {}", T::KIND, id, new_version);
                entity.set_version(new_version);
                Ok(entity)
            }
            CasOutcome::Conflict { current_version } => {
                warn!(
                    "Lost update race on {} {}: expected version {}, stored {}",
                    T::KIND,
                    id,
                    expected_version,
                    current_version
                );
                Err(conflict::<T>(id, expected_version, current_version))
            }
            CasOutcome::Missing => Err(TrackError::not_found(T::KIND, id)),
        }
    }
}

fn conflict<T: VersionedEntity>(id: &str, expected: u64, current: u64) -> TrackError {
    TrackError::VersionConflict {
        entity: T::KIND,
        id: id.to_string(),
        expected,
        current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinitrack_core::{ClinicId, ClinicianId, PatientId, ProtocolAssignment, ProtocolId};
    use crate::error::ErrorKind;
    use crate::test_support::storage;

    fn assignment() -> ProtocolAssignment {
        ProtocolAssignment::new(
            PatientId::new(),
            ClinicId::new(),
            ProtocolId::new(),
            "ACL reconstruction",
            ClinicianId::new(),
            4,
        )
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let (_dir, storage) = storage().await;
        let guard = VersionGuard::new(storage);

        let mut draft = assignment();
        draft.version = 7;
        let created = guard.create(draft).await.unwrap();
        assert_eq!(created.version, 1);

        let loaded: ProtocolAssignment = guard.load(&created.id.to_string()).await.unwrap();
        assert_eq!(loaded, created);

        assert!(guard.create(created.clone()).await.is_err());

        let err = guard
            .load::<ProtocolAssignment>(&ProtocolId::new().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_bumps_version_by_one() {
        let (_dir, storage) = storage().await;
        let guard = VersionGuard::new(storage);
        let created = guard.create(assignment()).await.unwrap();
        let id = created.id.to_string();

        let updated: ProtocolAssignment = guard
            .update(&id, 1, |a: &mut ProtocolAssignment| {
                a.sessions_completed += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.sessions_completed, 1);

        let stale = guard
            .update(&id, 1, |a: &mut ProtocolAssignment| {
                a.sessions_completed += 1;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(stale.is_retryable());

        let stored: ProtocolAssignment = guard.load(&id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.sessions_completed, 1);
    }

    #[tokio::test]
    async fn test_rejected_mutation_writes_nothing() {
        let (_dir, storage) = storage().await;
        let guard = VersionGuard::new(storage);
        let created = guard.create(assignment()).await.unwrap();
        let id = created.id.to_string();

        let err = guard
            .update(&id, 1, |_: &mut ProtocolAssignment| Err(TrackError::invalid("no")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let stored: ProtocolAssignment = guard.load(&id).await.unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_one_wins() {
        let (_dir, storage) = storage().await;
        let guard = VersionGuard::new(storage);
        let created = guard.create(assignment()).await.unwrap();
        let id = created.id.to_string();

        let mut handles = Vec::new();
        for note in ["from tablet", "from desk"] {
            let guard = guard.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .update(&id, 1, move |a: &mut ProtocolAssignment| {
                        a.progress_notes = Some(note.to_string());
                        Ok(())
                    })
                    .await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(updated) => {
                    assert_eq!(updated.version, 2);
                    wins += 1;
                }
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::VersionConflict);
                    conflicts += 1;
                }
            }
        }
        assert_eq!((wins, conflicts), (1, 1));

        // the loser reloads and resubmits
        let current: ProtocolAssignment = guard.load(&id).await.unwrap();
        let retried: ProtocolAssignment = guard
            .update(&id, current.version, |a: &mut ProtocolAssignment| {
                a.sessions_completed += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(retried.version, 3);
        assert!(retried.progress_notes.is_some());
    }
}
