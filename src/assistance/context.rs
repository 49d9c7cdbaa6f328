//! What the assistant is told about the game

use crate::config::StageConfig;
use crate::error::AssistanceError;
use crate::events::{describe_chips, render_history};
use crate::negotiation::types::{NegotiationSnapshot, Offer};
use crate::types::{ChipMap, ChipValueMap, ParticipantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Which decision the player wants help with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceKind {
    Offer,
    Response,
}

/// Read-only view of the negotiation from one player's seat
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistanceContext {
    pub kind: AssistanceKind,
    pub player_id: ParticipantId,
    pub chip_values: ChipValueMap,
    pub chip_quantities: ChipMap,
    pub inventories: BTreeMap<ParticipantId, ChipMap>,
    pub history: Vec<String>,
    pub rounds_left: u32,
    /// The offer being evaluated (response assistance only)
    pub pending_offer: Option<Offer>,
}

impl AssistanceContext {
    pub fn build(
        snapshot: &NegotiationSnapshot,
        stage: &StageConfig,
        player_id: &ParticipantId,
        kind: AssistanceKind,
    ) -> Result<Self, AssistanceError> {
        let state = &snapshot.state;
        let entry = state
            .ledger
            .get(player_id)
            .ok_or_else(|| AssistanceError::UnknownParticipant(player_id.clone()))?;

        let pending_offer = match kind {
            AssistanceKind::Offer => None,
            AssistanceKind::Response => {
                let offer = state
                    .pending_transaction()
                    .map(|t| t.offer.clone())
                    .filter(|offer| &offer.sender_id != player_id)
                    .ok_or(AssistanceError::NoPendingOffer)?;
                Some(offer)
            }
        };

        Ok(Self {
            kind,
            player_id: player_id.clone(),
            chip_values: entry.values().clone(),
            chip_quantities: entry.quantities().clone(),
            inventories: state
                .ledger
                .iter()
                .map(|(id, entry)| (id.clone(), entry.quantities().clone()))
                .collect(),
            history: render_history(state, stage, Some(player_id)),
            rounds_left: state.rounds_left(stage.num_rounds),
            pending_offer,
        })
    }

    /// Prompt text handed to the provider
    pub fn prompt(&self, stage: &StageConfig) -> String {
        let mut prompt = String::new();
        let player = &self.player_id;

        let _ = writeln!(
            prompt,
            "You are advising {} in a chip trading game. The goal is to end the game holding chips worth as much as possible to {}.",
            player, player
        );
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "### Current game state");

        let values: Vec<String> = stage
            .chips
            .iter()
            .filter_map(|chip| {
                let value = self.chip_values.get(&chip.id)?;
                Some(format!("{} ${:.2}", chip.name, value))
            })
            .collect();
        let _ = writeln!(prompt, "* {}'s chip valuations: {}", player, values.join(", "));
        let _ = writeln!(
            prompt,
            "* {}'s chip inventory: {}",
            player,
            describe_chips(&self.chip_quantities, stage)
        );
        for (id, quantities) in &self.inventories {
            if id != player {
                let _ = writeln!(prompt, "* {} holds {}", id, describe_chips(quantities, stage));
            }
        }
        let _ = writeln!(prompt, "* Rounds left after this one: {}", self.rounds_left);
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "### Transaction history");
        for line in &self.history {
            let _ = writeln!(prompt, "{}", line);
        }
        let _ = writeln!(prompt);

        match (&self.kind, &self.pending_offer) {
            (AssistanceKind::Response, Some(offer)) => {
                let _ = writeln!(
                    prompt,
                    "{} offers {} in exchange for {}. Should {} accept?",
                    offer.sender_id,
                    describe_chips(&offer.sell, stage),
                    describe_chips(&offer.buy, stage),
                    player
                );
                let _ = writeln!(
                    prompt,
                    "Reply with JSON only: {{\"response\": true|false, \"feedback\": string, \"reasoning\": string}}"
                );
            }
            _ => {
                let _ = writeln!(
                    prompt,
                    "Propose one trade: request a single chip color and give a different color in return. Do not propose a trade that loses value for {}.",
                    player
                );
                let _ = writeln!(
                    prompt,
                    "Reply with JSON only: {{\"suggestedBuyType\": string, \"suggestedBuyQuantity\": number, \"suggestedSellType\": string, \"suggestedSellQuantity\": number, \"reasoning\": string}}"
                );
            }
        }

        prompt
    }
}
