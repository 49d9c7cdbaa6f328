//! Human-readable negotiation history (also used as LLM prompt context)

use crate::config::StageConfig;
use crate::negotiation::types::{NegotiationState, Transaction, TransactionStatus};
use crate::types::{ChipMap, ParticipantId};

/// Describe a chip map in stage order, e.g. "2 red chips, 1 blue chip, and 3 green chips"
pub fn describe_chips(map: &ChipMap, stage: &StageConfig) -> String {
    let mut parts: Vec<String> = stage
        .chips
        .iter()
        .filter_map(|chip| {
            let quantity = *map.get(&chip.id)?;
            if quantity == 0 {
                return None;
            }
            let plural = if quantity == 1 { "" } else { "s" };
            let text = format!("{} {} chip{}", quantity, chip.name, plural);
            Some(if chip.avatar.is_empty() {
                text
            } else {
                format!("{} {}", chip.avatar, text)
            })
        })
        .collect();

    if parts.len() > 2 {
        let last = parts.pop().unwrap_or_default();
        return format!("{}, and {}", parts.join(", "), last);
    }
    parts.join(" and ")
}

/// Render the negotiation as ordered lines, from `viewer`'s point of view
/// when given ("You ..." instead of the participant ID)
pub fn render_history(
    state: &NegotiationState,
    stage: &StageConfig,
    viewer: Option<&ParticipantId>,
) -> Vec<String> {
    let mut lines = Vec::new();

    for (round, offers) in &state.offers_by_round {
        lines.push(format!("Round {} of {}", round + 1, stage.num_rounds));

        let mut transactions: Vec<&Transaction> = offers.values().collect();
        transactions.sort_by_key(|t| t.offer.timestamp);

        for transaction in transactions {
            render_transaction(&mut lines, transaction, stage, viewer);
        }
    }

    if state.is_game_over {
        lines.push("The game has ended.".to_string());
        return lines;
    }

    if let Some(turn) = &state.current_turn {
        if !state.has_offered(state.current_round, turn) {
            if state.offers_by_round.get(&state.current_round).is_none() {
                lines.push(format!(
                    "Round {} of {}",
                    state.current_round + 1,
                    stage.num_rounds
                ));
            }
            if viewer == Some(turn) {
                lines.push(format!("Your turn ({}) to submit an offer!", turn));
            } else {
                lines.push(format!("{}'s turn to submit an offer!", turn));
            }
        }
    }

    lines
}

fn render_transaction(
    lines: &mut Vec<String>,
    transaction: &Transaction,
    stage: &StageConfig,
    viewer: Option<&ParticipantId>,
) {
    let offer = &transaction.offer;
    let sender = &offer.sender_id;
    let is_sender = viewer == Some(sender);

    let offering = if is_sender {
        format!("You ({}) are", sender)
    } else {
        format!("{} is", sender)
    };
    lines.push(format!(
        "{} offering {} to get {} in return.",
        offering,
        describe_chips(&offer.sell, stage),
        describe_chips(&offer.buy, stage)
    ));

    let viewer_response = viewer.and_then(|v| transaction.response_map.get(v));
    if let (false, Some(response)) = (is_sender, viewer_response) {
        let verb = if response.accepted { "accepted" } else { "rejected" };
        lines.push(format!("You {} the offer.", verb));
    }

    let possessive = if is_sender {
        "your".to_string()
    } else {
        format!("{}'s", sender)
    };

    match transaction.status {
        TransactionStatus::Pending => {
            if is_sender {
                lines.push("Waiting for other participants to respond to your offer...".to_string());
            } else if viewer_response.is_some() || viewer.is_none() {
                lines.push(format!(
                    "Waiting for other participants to respond to {} offer...",
                    possessive
                ));
            } else {
                lines.push(format!("Please evaluate and respond to {} offer!", possessive));
            }
        }
        TransactionStatus::Accepted => {
            let recipient = transaction
                .recipient_id
                .as_ref()
                .map(|r| if viewer == Some(r) { "you".to_string() } else { r.to_string() })
                .unwrap_or_else(|| "another participant".to_string());
            // IDs are case-sensitive
            let subject = if is_sender { "Your".to_string() } else { possessive };
            lines.push(format!("Deal made: {} offer was accepted by {}.", subject, recipient));
        }
        TransactionStatus::Declined => {
            lines.push(format!("No deal: No one accepted {} offer.", possessive));
        }
    }
}
