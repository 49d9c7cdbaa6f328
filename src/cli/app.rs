//! Simulation application: a full game played by randomized agents

use crate::config::{ScenarioConfig, StageConfig};
use crate::error::{NegotiationError, Result};
use crate::events::render_history;
use crate::ledger::{ChipLedger, ParticipantLedgerEntry};
use crate::negotiation::{NegotiationCoordinator, NegotiationSnapshot, Offer, OfferOutcome, ResponseOutcome};
use crate::roster::{InMemoryRoster, ParticipantStatus};
use crate::store::InMemoryStore;
use crate::types::{ChipId, ChipMap, DocumentKey, ParticipantId};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Outcome of one simulated game
#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub history: Vec<String>,
    pub snapshot: NegotiationSnapshot,
    pub offers: usize,
    pub deals: usize,
    pub conflicts: u64,
}

/// Runs a scenario against an in-memory store and roster
#[derive(Clone)]
pub struct SimulationApp {
    coordinator: NegotiationCoordinator<InMemoryStore, InMemoryRoster>,
    store: Arc<InMemoryStore>,
    scenario: ScenarioConfig,
    key: DocumentKey,
}

impl SimulationApp {
    /// Register the stage and every participant of the scenario
    pub async fn new(scenario: ScenarioConfig) -> Result<Self> {
        scenario.validate()?;

        let store = Arc::new(InMemoryStore::new());
        let roster = Arc::new(InMemoryRoster::new());
        let coordinator =
            NegotiationCoordinator::new(Arc::clone(&store), Arc::clone(&roster), scenario.engine.clone());
        let key = scenario.document_key();

        coordinator
            .register_stage(&key.experiment_id, scenario.stage.clone())
            .await?;
        for participant in &scenario.participants {
            roster.add(
                &key.experiment_id,
                &key.cohort_id,
                participant.clone(),
                ParticipantStatus::InProgress,
            );
            coordinator.register_participant(&key, participant).await?;
        }

        Ok(Self {
            coordinator,
            store,
            scenario,
            key,
        })
    }

    pub fn stage(&self) -> &StageConfig {
        &self.scenario.stage
    }

    /// Play until the game ends. Responses to each offer are sent
    /// concurrently, so the last-responder race is exercised every turn.
    pub async fn run(&self, seed: u64, viewer: Option<&ParticipantId>) -> Result<SimulationReport> {
        let mut rng = StdRng::seed_from_u64(seed);
        let stage = self.stage();
        let max_turns = stage.num_rounds as usize * self.scenario.participants.len() + 1;
        let mut offers = 0;
        let mut deals = 0;

        self.coordinator.assign_initial_turn(&self.key).await?;

        loop {
            let snapshot = self.snapshot().await?;
            if snapshot.state.is_game_over {
                break;
            }
            if offers >= max_turns {
                return Err(NegotiationError::Internal(format!(
                    "game did not finish after {} offers",
                    offers
                )));
            }
            let Some(sender) = snapshot.state.current_turn.clone() else {
                return Err(NegotiationError::Internal("no participant holds the turn".to_string()));
            };
            let (buy, sell) = propose(&snapshot.state.ledger, &sender, stage, &mut rng)?;
            offers += 1;
            let resolution = match self.coordinator.offer(&self.key, &sender, buy, sell).await? {
                OfferOutcome::Submitted { resolution, .. } => resolution,
                OfferOutcome::Rejected(rejection) => {
                    return Err(NegotiationError::Internal(format!(
                        "simulated offer from {} rejected: {}",
                        sender, rejection
                    )));
                }
            };
            if resolution.is_some() {
                continue;
            }

            let snapshot = self.snapshot().await?;
            let Some(offer) = snapshot.state.pending_transaction().map(|t| t.offer.clone()) else {
                continue;
            };
            let decisions: Vec<(ParticipantId, bool)> = self
                .scenario
                .participants
                .iter()
                .filter(|p| **p != sender)
                .filter_map(|p| {
                    let entry = snapshot.state.ledger.get(p)?;
                    Some((p.clone(), decide(entry, &offer, &mut rng)))
                })
                .collect();

            let responses = join_all(
                decisions
                    .iter()
                    .map(|(responder, accept)| self.coordinator.respond(&self.key, responder, *accept)),
            )
            .await;

            for response in responses {
                match response? {
                    ResponseOutcome::Resolved(resolution) if resolution.recipient_id.is_some() => deals += 1,
                    ResponseOutcome::Rejected(rejection) => {
                        tracing::warn!(reason = %rejection, "Simulated response rejected");
                    }
                    _ => {}
                }
            }
        }

        let snapshot = self.snapshot().await?;
        Ok(SimulationReport {
            history: render_history(&snapshot.state, stage, viewer),
            snapshot,
            offers,
            deals,
            conflicts: self.store.conflict_count(),
        })
    }

    async fn snapshot(&self) -> Result<NegotiationSnapshot> {
        self.coordinator
            .snapshot(&self.key)
            .await?
            .ok_or_else(|| NegotiationError::Internal(format!("negotiation {} missing", self.key)))
    }
}

/// Random one-for-one-color offer the sender can afford, asking only for
/// chips some counterparty holds when anyone holds any
fn propose(
    ledger: &ChipLedger,
    sender: &ParticipantId,
    stage: &StageConfig,
    rng: &mut StdRng,
) -> Result<(ChipMap, ChipMap)> {
    let entry = ledger
        .get(sender)
        .ok_or_else(|| NegotiationError::Internal(format!("{} has no ledger entry", sender)))?;

    let sellable: Vec<_> = stage
        .chips
        .iter()
        .filter(|chip| chip.can_sell && entry.quantity(&chip.id) > 0)
        .collect();
    let sell_chip = sellable.choose(rng).copied();

    let buyable: Vec<_> = stage
        .chips
        .iter()
        .filter(|chip| chip.can_buy && Some(chip.id.as_str()) != sell_chip.map(|c| c.id.as_str()))
        .collect();
    let supplied: Vec<_> = buyable
        .iter()
        .copied()
        .filter(|chip| ledger.can_any_counterparty_supply(sender, &single(&chip.id, 1)))
        .collect();
    let pool = if supplied.is_empty() { &buyable } else { &supplied };
    let buy_chip = pool
        .choose(rng)
        .copied()
        .ok_or_else(|| NegotiationError::InvalidConfig("no chip can be bought".to_string()))?;

    let mut quantity = rng.gen_range(1..=3);
    while quantity > 1 && !ledger.can_any_counterparty_supply(sender, &single(&buy_chip.id, quantity)) {
        quantity -= 1;
    }
    let buy = single(&buy_chip.id, quantity);
    let mut sell = ChipMap::new();
    if let Some(chip) = sell_chip {
        let held = entry.quantity(&chip.id);
        sell.insert(chip.id.clone(), rng.gen_range(1..=held.min(3)));
    }
    Ok((buy, sell))
}

fn single(chip: &ChipId, quantity: u32) -> ChipMap {
    let mut map = ChipMap::new();
    map.insert(chip.clone(), quantity);
    map
}

/// Accept trades that gain value for the responder, with some noise
fn decide(entry: &ParticipantLedgerEntry, offer: &Offer, rng: &mut StdRng) -> bool {
    if !entry.holds(&offer.buy) {
        return false;
    }
    let gain = entry.offer_payout(&offer.sell, &offer.buy).gain();
    let rational = gain > 0.0;
    if rng.gen_bool(0.1) {
        !rational
    } else {
        rational
    }
}
