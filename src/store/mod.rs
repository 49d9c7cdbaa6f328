//! Transactional document store
//!
//! Every mutating negotiation operation is a read-modify-write against one
//! versioned document. [`run_atomic`] re-runs the whole operation from the
//! read step whenever the commit loses an optimistic-concurrency race.

pub mod memory;

pub use memory::InMemoryStore;

use crate::config::{RetryPolicy, StageConfig};
use crate::error::{NegotiationError, Result};
use crate::negotiation::types::NegotiationDocument;
use crate::types::{DocumentKey, ExperimentId, StageId};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// A value with the version it was read at. Version 0 means "absent".
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Storage backend for negotiation documents and stage configs
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Read the document and its current version
    async fn load(&self, key: &DocumentKey) -> Result<Option<Versioned<NegotiationDocument>>>;

    /// Write `document` if the stored version still equals `expected_version`
    /// (0 = must not exist yet). Returns the new version, or
    /// [`NegotiationError::Conflict`] if another writer got there first.
    async fn commit(
        &self,
        key: &DocumentKey,
        expected_version: u64,
        document: NegotiationDocument,
    ) -> Result<u64>;

    /// Stage config, if the experiment defines one
    async fn stage_config(
        &self,
        experiment_id: &ExperimentId,
        stage_id: &StageId,
    ) -> Result<Option<StageConfig>>;

    async fn put_stage_config(&self, experiment_id: &ExperimentId, config: StageConfig) -> Result<()>;
}

/// What an atomic operation decided
#[derive(Debug)]
pub enum Mutation<T> {
    /// Write the (modified) document back and return `T`
    Commit(T),
    /// Leave the stored document untouched and return `T`
    Abort(T),
}

/// Run `apply` as one atomic read-modify-write on `key`.
///
/// Each attempt calls `read` for fresh side inputs (e.g. the roster), loads
/// the document, and hands both to `apply`. On a commit conflict the attempt
/// is discarded and the loop starts over; nothing from a losing attempt is
/// ever visible. `apply` must be free of external side effects.
pub async fn run_atomic<S, C, P, PF, F, T>(
    store: &S,
    key: &DocumentKey,
    policy: &RetryPolicy,
    mut read: P,
    mut apply: F,
) -> Result<T>
where
    S: TransactionalStore + ?Sized,
    P: FnMut() -> PF,
    PF: Future<Output = Result<C>>,
    F: FnMut(&mut Option<NegotiationDocument>, C) -> Result<Mutation<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let inputs = read().await?;
        let (version, mut document) = match store.load(key).await? {
            Some(Versioned { version, value }) => (version, Some(value)),
            None => (0, None),
        };

        let output = match apply(&mut document, inputs)? {
            Mutation::Abort(output) => return Ok(output),
            Mutation::Commit(output) => output,
        };
        let Some(document) = document else {
            return Ok(output);
        };

        match store.commit(key, version, document).await {
            Ok(new_version) => {
                tracing::trace!(document = %key, version = new_version, "committed");
                return Ok(output);
            }
            Err(NegotiationError::Conflict(_)) if attempt < policy.max_attempts => {
                let backoff = policy.backoff_ms(attempt);
                tracing::debug!(document = %key, attempt, backoff_ms = backoff, "write conflict, retrying");
                if backoff > 0 {
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            Err(NegotiationError::Conflict(_)) => {
                tracing::warn!(document = %key, attempts = attempt, "giving up after repeated conflicts");
                return Err(NegotiationError::RetriesExhausted {
                    key: key.clone(),
                    attempts: attempt,
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;

    fn key() -> DocumentKey {
        DocumentKey::new("exp", "cohort", "stage")
    }

    async fn read_nothing() -> Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_creates_document() {
        let store = InMemoryStore::new();
        let policy = RetryPolicy::default();

        let created = run_atomic(&store, &key(), &policy, read_nothing, |doc, ()| {
            assert!(doc.is_none());
            *doc = Some(NegotiationDocument::default());
            Ok(Mutation::Commit(true))
        })
        .await
        .unwrap();

        assert!(created);
        let stored = store.load(&key()).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let store = InMemoryStore::new();
        let policy = RetryPolicy::default();

        run_atomic(&store, &key(), &policy, read_nothing, |doc, ()| {
            *doc = Some(NegotiationDocument::default());
            Ok(Mutation::Abort(()))
        })
        .await
        .unwrap();

        assert!(store.load(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_is_retried_from_read() {
        let store = InMemoryStore::new();
        store.commit(&key(), 0, NegotiationDocument::default()).await.unwrap();
        store.inject_conflicts(2);
        let policy = RetryPolicy::default();

        let mut attempts = 0;
        run_atomic(&store, &key(), &policy, read_nothing, |doc, ()| {
            attempts += 1;
            if let Some(doc) = doc.as_mut() {
                doc.state.current_round += 1;
            }
            Ok(Mutation::Commit(()))
        })
        .await
        .unwrap();

        assert_eq!(attempts, 3);
        let stored = store.load(&key()).await.unwrap().unwrap();
        // only the winning attempt is visible
        assert_eq!(stored.value.state.current_round, 1);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let store = InMemoryStore::new();
        store.inject_conflicts(10);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        };

        let result = run_atomic(&store, &key(), &policy, read_nothing, |doc, ()| {
            *doc = Some(NegotiationDocument::default());
            Ok(Mutation::Commit(()))
        })
        .await;

        assert!(matches!(
            result,
            Err(NegotiationError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_runs_every_attempt() {
        let store = InMemoryStore::new();
        store.inject_conflicts(1);
        let policy = RetryPolicy::default();
        let reads = std::sync::atomic::AtomicU32::new(0);

        run_atomic(
            &store,
            &key(),
            &policy,
            || {
                reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Ok(vec![ParticipantId::from("alice")]) }
            },
            |doc, roster: Vec<ParticipantId>| {
                assert_eq!(roster.len(), 1);
                *doc = Some(NegotiationDocument::default());
                Ok(Mutation::Commit(()))
            },
        )
        .await
        .unwrap();

        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
