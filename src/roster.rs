//! Participant roster: who currently counts toward turns and quorums

use crate::error::Result;
use crate::types::{CohortId, ExperimentId, ParticipantId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a participant within an experiment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    InProgress,
    AttentionCheck,
    TransferPending,
    Success,
    AttentionTimeout,
    BootedOut,
    Deleted,
}

impl ParticipantStatus {
    /// Counts toward turn order and response quorum
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ParticipantStatus::InProgress | ParticipantStatus::AttentionCheck
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub status: ParticipantStatus,
}

/// Source of the live cohort roster. Queried fresh inside every atomic
/// negotiation operation.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    /// Active participants of the cohort, ordered by id
    async fn active_participants(
        &self,
        experiment_id: &ExperimentId,
        cohort_id: &CohortId,
    ) -> Result<Vec<Participant>>;
}

/// Roster held in memory, keyed by `(experiment, cohort)`
#[derive(Default)]
pub struct InMemoryRoster {
    cohorts: DashMap<(ExperimentId, CohortId), BTreeMap<ParticipantId, ParticipantStatus>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, or overwrite the status of an existing one
    pub fn add(
        &self,
        experiment_id: &ExperimentId,
        cohort_id: &CohortId,
        participant_id: ParticipantId,
        status: ParticipantStatus,
    ) {
        self.cohorts
            .entry((experiment_id.clone(), cohort_id.clone()))
            .or_default()
            .insert(participant_id, status);
    }

    /// Returns false if the participant is not in the cohort
    pub fn set_status(
        &self,
        experiment_id: &ExperimentId,
        cohort_id: &CohortId,
        participant_id: &ParticipantId,
        status: ParticipantStatus,
    ) -> bool {
        let Some(mut cohort) = self
            .cohorts
            .get_mut(&(experiment_id.clone(), cohort_id.clone()))
        else {
            return false;
        };
        match cohort.get_mut(participant_id) {
            Some(current) => {
                tracing::debug!(participant = %participant_id, from = ?current, to = ?status, "Participant status changed");
                *current = status;
                true
            }
            None => false,
        }
    }

    pub fn status(
        &self,
        experiment_id: &ExperimentId,
        cohort_id: &CohortId,
        participant_id: &ParticipantId,
    ) -> Option<ParticipantStatus> {
        self.cohorts
            .get(&(experiment_id.clone(), cohort_id.clone()))?
            .get(participant_id)
            .copied()
    }
}

#[async_trait]
impl RosterProvider for InMemoryRoster {
    async fn active_participants(
        &self,
        experiment_id: &ExperimentId,
        cohort_id: &CohortId,
    ) -> Result<Vec<Participant>> {
        let Some(cohort) = self
            .cohorts
            .get(&(experiment_id.clone(), cohort_id.clone()))
        else {
            return Ok(Vec::new());
        };

        Ok(cohort
            .iter()
            .filter(|(_, status)| status.is_active())
            .map(|(id, status)| Participant {
                id: id.clone(),
                status: *status,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(ParticipantStatus::InProgress.is_active());
        assert!(ParticipantStatus::AttentionCheck.is_active());
        assert!(!ParticipantStatus::Success.is_active());
        assert!(!ParticipantStatus::TransferPending.is_active());
        assert!(!ParticipantStatus::BootedOut.is_active());
    }

    #[tokio::test]
    async fn test_active_participants_filtered_and_ordered() {
        let roster = InMemoryRoster::new();
        let experiment = ExperimentId::from("e");
        let cohort = CohortId::from("c");

        roster.add(&experiment, &cohort, ParticipantId::from("carol"), ParticipantStatus::InProgress);
        roster.add(&experiment, &cohort, ParticipantId::from("alice"), ParticipantStatus::AttentionCheck);
        roster.add(&experiment, &cohort, ParticipantId::from("bob"), ParticipantStatus::Success);

        let active = roster.active_participants(&experiment, &cohort).await.unwrap();
        let ids: Vec<_> = active.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_set_status() {
        let roster = InMemoryRoster::new();
        let experiment = ExperimentId::from("e");
        let cohort = CohortId::from("c");
        let alice = ParticipantId::from("alice");

        assert!(!roster.set_status(&experiment, &cohort, &alice, ParticipantStatus::Success));

        roster.add(&experiment, &cohort, alice.clone(), ParticipantStatus::InProgress);
        assert!(roster.set_status(&experiment, &cohort, &alice, ParticipantStatus::BootedOut));
        assert_eq!(
            roster.status(&experiment, &cohort, &alice),
            Some(ParticipantStatus::BootedOut)
        );
        assert!(roster
            .active_participants(&experiment, &cohort)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unknown_cohort_is_empty() {
        let roster = InMemoryRoster::new();
        let active = tokio_test::block_on(
            roster.active_participants(&ExperimentId::from("e"), &CohortId::from("none")),
        )
        .unwrap();
        assert!(active.is_empty());
    }
}
