//! Optimistic writes: install locally, persist remotely, undo on failure.
//!
//! When the remote rejects a column it does not know, the column is dropped
//! from the payload and the write is retried, up to the configured number of
//! attempts. Only optional columns can be dropped this way.

use tracing::{debug, error, warn};

use curriculum_core::FieldValue;
use curriculum_storage::{Filter, RemoteError, RemotePayload, columns};

use crate::error::EngineError;
use crate::store::{CurriculumStore, Tracked};
use crate::Curriculum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
}

impl Curriculum {
    /// Install `entity` in the store, then persist it. On failure the store
    /// goes back to what it held before, unless a reload got there first.
    pub(crate) async fn apply<E: Tracked>(&self, entity: E, mode: WriteMode) -> Result<(), EngineError> {
        let id = entity.id();
        let payload = entity.to_remote();
        let table = payload.table();

        let (previous, generation) = self.write(|store| {
            let previous = store.insert(entity);
            (previous, store.generation())
        });

        match self.write_with_drift(payload, mode).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(%table, ?id, error = %e, "write failed, rolling back");
                self.rollback(generation, |store| match previous {
                    Some(previous) => {
                        store.insert(previous);
                    }
                    None => {
                        store.remove::<E>(id);
                    }
                });
                Err(e)
            }
        }
    }

    /// Send one row, shedding optional columns the remote reports as unknown.
    /// Returns the payload as finally written.
    pub(crate) async fn write_with_drift(
        &self,
        mut payload: RemotePayload,
        mode: WriteMode,
    ) -> Result<RemotePayload, EngineError> {
        let table = payload.table();
        let max_attempts = self.config.max_write_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.send(&payload, mode).await {
                Ok(()) => {
                    if !payload.stripped().is_empty() {
                        warn!(%table, stripped = ?payload.stripped(), "written without columns the remote lacks");
                    }
                    debug!(%table, attempt, ?mode, "remote write succeeded");
                    return Ok(payload);
                }
                Err(e) => e,
            };

            let Some(column) = err.unknown_column().map(str::to_string) else {
                return Err(err.into());
            };
            if attempt >= max_attempts {
                return Err(EngineError::DriftRetriesExhausted {
                    table,
                    attempts: attempt,
                    column,
                });
            }
            if !payload.strip(&column) {
                return Err(EngineError::RequiredColumnMissing { table, column });
            }
            warn!(%table, %column, attempt, "remote lacks column, retrying without it");
        }
    }

    async fn send(&self, payload: &RemotePayload, mode: WriteMode) -> Result<(), RemoteError> {
        let table = payload.table();
        match mode {
            WriteMode::Insert => self.remote.insert(table, &[payload.to_row()]).await,
            WriteMode::Update => {
                let id = payload.get(columns::ID).cloned().unwrap_or(FieldValue::Null);
                let updated = self
                    .remote
                    .update(table, &payload.to_patch(), &Filter::Eq(columns::ID, id.clone()))
                    .await?;
                if updated == 0 {
                    return Err(RemoteError::NotFound(format!("{table} row {id:?}")));
                }
                Ok(())
            }
        }
    }

    /// Apply a compensating change, but only if no reload replaced the store
    /// since `generation` was observed.
    pub(crate) fn rollback(&self, generation: u64, undo: impl FnOnce(&mut CurriculumStore)) {
        self.write(|store| {
            if store.generation() == generation {
                undo(store);
                debug!(generation, "rolled back optimistic change");
            } else {
                debug!(
                    generation,
                    current = store.generation(),
                    "store reloaded since the change, skipping rollback"
                );
            }
        });
    }
}
