//! In-memory store: versioned documents in a concurrent map

use crate::config::StageConfig;
use crate::error::{NegotiationError, Result};
use crate::negotiation::types::NegotiationDocument;
use crate::types::{DocumentKey, ExperimentId, StageId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::{TransactionalStore, Versioned};

/// Compare-and-swap store keyed by `(experiment, cohort, stage)`.
///
/// Thread-safe: each key is guarded by its `DashMap` shard lock only for the
/// duration of a load or commit, so different keys proceed in parallel.
#[derive(Default)]
pub struct InMemoryStore {
    documents: DashMap<DocumentKey, Versioned<NegotiationDocument>>,
    stages: DashMap<(ExperimentId, StageId), StageConfig>,
    conflicts: AtomicU64,
    forced_conflicts: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits rejected because of a version mismatch
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Make the next `n` commits fail with a conflict
    #[cfg(test)]
    pub(crate) fn inject_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn conflict(&self, key: &DocumentKey) -> NegotiationError {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        NegotiationError::Conflict(key.clone())
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn load(&self, key: &DocumentKey) -> Result<Option<Versioned<NegotiationDocument>>> {
        Ok(self.documents.get(key).map(|entry| entry.value().clone()))
    }

    async fn commit(
        &self,
        key: &DocumentKey,
        expected_version: u64,
        document: NegotiationDocument,
    ) -> Result<u64> {
        if self.take_forced_conflict() {
            return Err(self.conflict(key));
        }

        match self.documents.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if current != expected_version {
                    drop(occupied);
                    return Err(self.conflict(key));
                }
                let version = current + 1;
                occupied.insert(Versioned {
                    version,
                    value: document,
                });
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    drop(vacant);
                    return Err(self.conflict(key));
                }
                vacant.insert(Versioned {
                    version: 1,
                    value: document,
                });
                Ok(1)
            }
        }
    }

    async fn stage_config(
        &self,
        experiment_id: &ExperimentId,
        stage_id: &StageId,
    ) -> Result<Option<StageConfig>> {
        Ok(self
            .stages
            .get(&(experiment_id.clone(), stage_id.clone()))
            .map(|entry| entry.value().clone()))
    }

    async fn put_stage_config(&self, experiment_id: &ExperimentId, config: StageConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(experiment = %experiment_id, stage = %config.id, "Registering stage config");
        self.stages
            .insert((experiment_id.clone(), config.id.clone()), config);
        Ok(())
    }
}
