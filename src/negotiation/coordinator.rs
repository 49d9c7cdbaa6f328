//! Negotiation coordinator: the public operation surface
//!
//! Each operation is one atomic read-modify-write of the cohort+stage
//! document. The roster is fetched fresh on every attempt, and all state
//! changes plus their event log entries commit together or not at all.

use crate::config::{EngineConfig, StageConfig};
use crate::error::{NegotiationError, Result};
use crate::events::ChipEvent;
use crate::ledger::ParticipantLedgerEntry;
use crate::roster::RosterProvider;
use crate::store::{run_atomic, Mutation, TransactionalStore};
use crate::types::{ChipMap, DocumentKey, ExperimentId, ParticipantId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::protocol;
use super::scheduler;
use super::settlement;
use super::types::{
    NegotiationDocument, NegotiationSnapshot, NoOpReason, OfferOutcome, RefreshOutcome, Rejection,
    Resolution, ResponseOutcome, TransactionStatus, TurnAdvance, TurnAssignment,
};

const GAME_ENDED: &str = "The game has ended.";

/// Coordinates turn assignment, offers, and responses for every
/// cohort+stage negotiation held in one store
pub struct NegotiationCoordinator<S: ?Sized, R: ?Sized> {
    store: Arc<S>,
    roster: Arc<R>,
    config: EngineConfig,
}

impl<S: ?Sized, R: ?Sized> Clone for NegotiationCoordinator<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            roster: Arc::clone(&self.roster),
            config: self.config.clone(),
        }
    }
}

impl<S, R> NegotiationCoordinator<S, R>
where
    S: TransactionalStore + ?Sized,
    R: RosterProvider + ?Sized,
{
    pub fn new(store: Arc<S>, roster: Arc<R>, config: EngineConfig) -> Self {
        Self {
            store,
            roster,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Make a stage config available to negotiations of `experiment_id`
    pub async fn register_stage(&self, experiment_id: &ExperimentId, stage: StageConfig) -> Result<()> {
        self.store.put_stage_config(experiment_id, stage).await
    }

    /// Stage config for the document, if registered
    pub async fn stage(&self, key: &DocumentKey) -> Result<Option<StageConfig>> {
        self.store.stage_config(&key.experiment_id, &key.stage_id).await
    }

    /// Create the participant's ledger entry (and the negotiation document on
    /// first use). Returns false if the participant already had an entry.
    pub async fn register_participant(&self, key: &DocumentKey, participant: &ParticipantId) -> Result<bool> {
        let stage = self
            .stage(key)
            .await?
            .ok_or_else(|| NegotiationError::StageNotConfigured(key.to_string()))?;

        let created = run_atomic(
            &*self.store,
            key,
            &self.config.retry,
            || async { Ok::<_, NegotiationError>(()) },
            |doc, ()| {
                let doc = doc.get_or_insert_with(NegotiationDocument::default);
                if doc.state.ledger.contains(participant) {
                    return Ok(Mutation::Abort(false));
                }
                let entry = ParticipantLedgerEntry::initialize(&stage, &mut rand::thread_rng());
                doc.state.ledger.insert_if_absent(participant.clone(), entry);
                Ok(Mutation::Commit(true))
            },
        )
        .await?;

        if created {
            info!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %participant, "Participant ledger initialized");
        }
        Ok(created)
    }

    /// Give the first turn of the game to the first participant in turn
    /// order. Idempotent: an existing turn is left alone unless its offer has
    /// already resolved, in which case the turn moves on.
    pub async fn assign_initial_turn(&self, key: &DocumentKey) -> Result<TurnAssignment> {
        let Some(stage) = self.stage(key).await? else {
            debug!(document = %key, "No stage config, skipping turn assignment");
            return Ok(TurnAssignment::NoOp(NoOpReason::StageNotConfigured));
        };

        let assignment = run_atomic(
            &*self.store,
            key,
            &self.config.retry,
            || self.active_ids(key),
            |doc, active: Vec<ParticipantId>| {
                let Some(doc) = doc.as_mut() else {
                    return Ok(Mutation::Abort(TurnAssignment::NoOp(NoOpReason::NoNegotiation)));
                };
                if doc.state.is_game_over {
                    return Ok(Mutation::Abort(TurnAssignment::NoOp(NoOpReason::GameOver)));
                }
                // a current turn whose offer already resolved is stale
                if let Some(current) = &doc.state.current_turn {
                    let resolved = doc
                        .state
                        .current_transaction()
                        .is_some_and(|t| t.status.is_terminal());
                    if !resolved {
                        return Ok(Mutation::Abort(TurnAssignment::AlreadyAssigned(current.clone())));
                    }
                }
                if active.is_empty() {
                    return Ok(Mutation::Abort(TurnAssignment::NoOp(NoOpReason::NoActiveParticipants)));
                }

                let now = Utc::now();
                let order = scheduler::compute_turn_order(&active, &stage.id);
                let next = scheduler::advance(&mut doc.state, &order, stage.num_rounds);
                let assignment = match &next {
                    TurnAdvance::Turn { round, participant } => {
                        // opening turn of the game also opens round 0
                        if !doc.state.offers_by_round.contains_key(round) {
                            doc.log.append(ChipEvent::NewRound { round: *round }, now);
                        }
                        TurnAssignment::Assigned {
                            round: *round,
                            participant: participant.clone(),
                        }
                    }
                    TurnAdvance::NewRound { round, participant } => TurnAssignment::Assigned {
                        round: *round,
                        participant: participant.clone(),
                    },
                    TurnAdvance::GameOver => TurnAssignment::NoOp(NoOpReason::GameOver),
                    TurnAdvance::Unchanged => {
                        return Ok(Mutation::Abort(TurnAssignment::NoOp(NoOpReason::NoActiveParticipants)));
                    }
                };
                log_turn_advance(doc, &next, now);
                Ok(Mutation::Commit(assignment))
            },
        )
        .await?;

        match &assignment {
            TurnAssignment::Assigned { round, participant } => {
                info!(cohort = %key.cohort_id, stage = %key.stage_id, round, participant = %participant, "Initial turn assigned");
            }
            TurnAssignment::AlreadyAssigned(participant) => {
                debug!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %participant, "Turn already assigned");
            }
            TurnAssignment::NoOp(reason) => {
                debug!(cohort = %key.cohort_id, stage = %key.stage_id, reason = ?reason, "Turn assignment skipped");
            }
        }
        Ok(assignment)
    }

    /// Submit an offer for the current turn.
    ///
    /// Structural problems come back as `OfferOutcome::Rejected`; only store
    /// faults are errors. If the sender is the only active participant the
    /// offer resolves immediately.
    pub async fn offer(
        &self,
        key: &DocumentKey,
        sender: &ParticipantId,
        buy: ChipMap,
        sell: ChipMap,
    ) -> Result<OfferOutcome> {
        let Some(stage) = self.stage(key).await? else {
            return Ok(OfferOutcome::Rejected(Rejection::NoActiveNegotiation));
        };

        let outcome = run_atomic(
            &*self.store,
            key,
            &self.config.retry,
            || self.active_ids(key),
            |doc, active: Vec<ParticipantId>| {
                let Some(doc) = doc.as_mut() else {
                    return Ok(Mutation::Abort(OfferOutcome::Rejected(Rejection::NoActiveNegotiation)));
                };
                if doc.state.is_game_over {
                    return Ok(Mutation::Abort(OfferOutcome::Rejected(Rejection::GameOver)));
                }
                if !active.contains(sender) {
                    return Ok(Mutation::Abort(OfferOutcome::Rejected(Rejection::UnknownParticipant)));
                }

                let now = Utc::now();
                let offer_id = match protocol::submit_offer(
                    &mut doc.state,
                    &mut doc.log,
                    &stage,
                    sender,
                    buy.clone(),
                    sell.clone(),
                    now,
                ) {
                    Ok(offer_id) => offer_id,
                    Err(rejection) => return Ok(Mutation::Abort(OfferOutcome::Rejected(rejection))),
                };

                let resolution = resolve(doc, &stage, &active, now);
                Ok(Mutation::Commit(OfferOutcome::Submitted {
                    offer_id,
                    resolution,
                }))
            },
        )
        .await?;

        match &outcome {
            OfferOutcome::Submitted { offer_id, resolution } => {
                info!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %sender, offer = %offer_id, "Offer submitted");
                if let Some(resolution) = resolution {
                    trace_resolution(key, resolution);
                }
            }
            OfferOutcome::Rejected(rejection) => {
                warn!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %sender, reason = %rejection, "Offer rejected");
            }
        }
        Ok(outcome)
    }

    /// Accept or decline the pending offer. The response that completes the
    /// quorum also settles the trade and advances the turn.
    pub async fn respond(
        &self,
        key: &DocumentKey,
        responder: &ParticipantId,
        accepted: bool,
    ) -> Result<ResponseOutcome> {
        let Some(stage) = self.stage(key).await? else {
            return Ok(ResponseOutcome::Rejected(Rejection::NoActiveNegotiation));
        };

        let outcome = run_atomic(
            &*self.store,
            key,
            &self.config.retry,
            || self.active_ids(key),
            |doc, active: Vec<ParticipantId>| {
                let Some(doc) = doc.as_mut() else {
                    return Ok(Mutation::Abort(ResponseOutcome::Rejected(Rejection::NoActiveNegotiation)));
                };
                if doc.state.is_game_over {
                    return Ok(Mutation::Abort(ResponseOutcome::Rejected(Rejection::GameOver)));
                }
                if !active.contains(responder) {
                    return Ok(Mutation::Abort(ResponseOutcome::Rejected(Rejection::UnknownParticipant)));
                }

                let now = Utc::now();
                if let Err(rejection) =
                    protocol::submit_response(&mut doc.state, &mut doc.log, responder, accepted, now)
                {
                    return Ok(Mutation::Abort(ResponseOutcome::Rejected(rejection)));
                }

                let outcome = match resolve(doc, &stage, &active, now) {
                    Some(resolution) => ResponseOutcome::Resolved(resolution),
                    None => ResponseOutcome::Recorded,
                };
                Ok(Mutation::Commit(outcome))
            },
        )
        .await?;

        match &outcome {
            ResponseOutcome::Recorded => {
                info!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %responder, accepted, "Response recorded");
            }
            ResponseOutcome::Resolved(resolution) => {
                info!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %responder, accepted, "Response recorded");
                trace_resolution(key, resolution);
            }
            ResponseOutcome::Rejected(rejection) => {
                warn!(cohort = %key.cohort_id, stage = %key.stage_id, participant = %responder, reason = %rejection, "Response rejected");
            }
        }
        Ok(outcome)
    }

    /// Re-check the negotiation against the current roster.
    ///
    /// A pending offer whose remaining responders have all answered is
    /// resolved; a current-turn participant who left before offering loses
    /// the turn. A turn left empty or on an already-resolved offer is handed
    /// to the next active participant.
    pub async fn refresh_turn(&self, key: &DocumentKey) -> Result<RefreshOutcome> {
        let Some(stage) = self.stage(key).await? else {
            return Ok(RefreshOutcome::NoOp(NoOpReason::StageNotConfigured));
        };

        let outcome = run_atomic(
            &*self.store,
            key,
            &self.config.retry,
            || self.active_ids(key),
            |doc, active: Vec<ParticipantId>| {
                let Some(doc) = doc.as_mut() else {
                    return Ok(Mutation::Abort(RefreshOutcome::NoOp(NoOpReason::NoNegotiation)));
                };
                if doc.state.is_game_over {
                    return Ok(Mutation::Abort(RefreshOutcome::NoOp(NoOpReason::GameOver)));
                }
                let now = Utc::now();
                if doc.state.pending_transaction().is_some() {
                    return Ok(match resolve(doc, &stage, &active, now) {
                        Some(resolution) => Mutation::Commit(RefreshOutcome::Resolved(resolution)),
                        None => Mutation::Abort(RefreshOutcome::Unchanged),
                    });
                }

                let stale = match &doc.state.current_turn {
                    // cleared when a resolution found nobody to hand the turn to
                    None => !doc.state.offers_by_round.is_empty(),
                    Some(current) => {
                        !active.contains(current) || doc.state.has_offered(doc.state.current_round, current)
                    }
                };
                if !stale {
                    return Ok(Mutation::Abort(RefreshOutcome::Unchanged));
                }

                let order = scheduler::compute_turn_order(&active, &stage.id);
                match scheduler::advance(&mut doc.state, &order, stage.num_rounds) {
                    TurnAdvance::Unchanged => Ok(Mutation::Abort(RefreshOutcome::Unchanged)),
                    next => {
                        log_turn_advance(doc, &next, now);
                        Ok(Mutation::Commit(RefreshOutcome::Advanced(next)))
                    }
                }
            },
        )
        .await?;

        match &outcome {
            RefreshOutcome::Resolved(resolution) => trace_resolution(key, resolution),
            RefreshOutcome::Advanced(next) => {
                info!(cohort = %key.cohort_id, stage = %key.stage_id, next = ?next, "Turn reassigned");
            }
            RefreshOutcome::Unchanged | RefreshOutcome::NoOp(_) => {
                debug!(cohort = %key.cohort_id, stage = %key.stage_id, outcome = ?outcome, "Refresh found nothing to do");
            }
        }
        Ok(outcome)
    }

    /// Read-only view of the negotiation state and its full event log
    pub async fn snapshot(&self, key: &DocumentKey) -> Result<Option<NegotiationSnapshot>> {
        Ok(self.store.load(key).await?.map(|versioned| NegotiationSnapshot {
            events: versioned.value.log.entries().to_vec(),
            state: versioned.value.state,
            version: versioned.version,
        }))
    }

    async fn active_ids(&self, key: &DocumentKey) -> Result<Vec<ParticipantId>> {
        let participants = self
            .roster
            .active_participants(&key.experiment_id, &key.cohort_id)
            .await?;
        Ok(participants.into_iter().map(|p| p.id).collect())
    }
}

/// Resolve the current transaction if its quorum is complete, settle it,
/// and move the turn on. Runs inside the caller's atomic operation.
fn resolve(
    doc: &mut NegotiationDocument,
    stage: &StageConfig,
    active: &[ParticipantId],
    now: DateTime<Utc>,
) -> Option<Resolution> {
    let decision = protocol::try_resolve(&mut doc.state, active, &mut rand::thread_rng())?;
    let transaction = doc
        .state
        .transaction(decision.round, &decision.sender_id)?
        .clone();

    let mut status = decision.status;
    let mut recipient_id = decision.recipient_id;
    let settlement_error = match settlement::settle(&mut doc.state.ledger, &mut doc.log, &transaction, now) {
        Ok(()) => None,
        Err(e) => {
            // fail closed: the trade never happened
            if let Some(stored) = doc.state.transaction_mut(decision.round, &decision.sender_id) {
                stored.status = TransactionStatus::Declined;
                stored.recipient_id = None;
            }
            status = TransactionStatus::Declined;
            recipient_id = None;
            doc.log.append(
                ChipEvent::Error {
                    message: format!("Transaction from {} failed to settle: {}", decision.sender_id, e),
                },
                now,
            );
            Some(e)
        }
    };

    let order = scheduler::compute_turn_order(active, &stage.id);
    let next = scheduler::advance(&mut doc.state, &order, stage.num_rounds);
    if next == TurnAdvance::Unchanged {
        // nobody active; refresh_turn hands the turn out once someone returns
        doc.state.current_turn = None;
    }
    log_turn_advance(doc, &next, now);

    Some(Resolution {
        round: decision.round,
        sender_id: decision.sender_id,
        status,
        recipient_id,
        settlement_error,
        next,
    })
}

fn log_turn_advance(doc: &mut NegotiationDocument, next: &TurnAdvance, now: DateTime<Utc>) {
    match next {
        TurnAdvance::Unchanged => {}
        TurnAdvance::Turn { round, participant } => {
            doc.log.append(
                ChipEvent::NewTurn {
                    round: *round,
                    participant_id: participant.clone(),
                },
                now,
            );
        }
        TurnAdvance::NewRound { round, participant } => {
            doc.log.append(ChipEvent::NewRound { round: *round }, now);
            doc.log.append(
                ChipEvent::NewTurn {
                    round: *round,
                    participant_id: participant.clone(),
                },
                now,
            );
        }
        TurnAdvance::GameOver => {
            doc.log.append(
                ChipEvent::Info {
                    message: GAME_ENDED.to_string(),
                },
                now,
            );
        }
    }
}

fn trace_resolution(key: &DocumentKey, resolution: &Resolution) {
    if let Some(e) = &resolution.settlement_error {
        error!(
            cohort = %key.cohort_id,
            stage = %key.stage_id,
            round = resolution.round,
            sender = %resolution.sender_id,
            error = %e,
            "Settlement failed, transaction forced to DECLINED"
        );
    } else {
        info!(
            cohort = %key.cohort_id,
            stage = %key.stage_id,
            round = resolution.round,
            sender = %resolution.sender_id,
            status = %resolution.status,
            recipient = ?resolution.recipient_id,
            "Transaction resolved"
        );
    }

    match &resolution.next {
        TurnAdvance::NewRound { round, participant } => {
            info!(cohort = %key.cohort_id, stage = %key.stage_id, round, participant = %participant, "New round");
        }
        TurnAdvance::Turn { round, participant } => {
            info!(cohort = %key.cohort_id, stage = %key.stage_id, round, participant = %participant, "Next turn");
        }
        TurnAdvance::GameOver => {
            info!(cohort = %key.cohort_id, stage = %key.stage_id, "Game over");
        }
        TurnAdvance::Unchanged => {}
    }
}
