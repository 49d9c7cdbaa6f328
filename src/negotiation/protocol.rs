//! Offer/response protocol: lifecycle of a single trade proposal
//!
//! Per `(round, sender)` transaction the only transitions are
//! `PENDING -> ACCEPTED` and `PENDING -> DECLINED`.

use crate::config::StageConfig;
use crate::events::{ChipEvent, EventLog};
use crate::types::{ChipMap, OfferId, ParticipantId};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use super::types::{
    NegotiationState, Offer, OfferResponse, Rejection, Transaction, TransactionStatus,
};

/// Quorum decision for the current transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumDecision {
    pub round: u32,
    pub sender_id: ParticipantId,
    pub status: TransactionStatus,
    pub recipient_id: Option<ParticipantId>,
}

/// Check an offer against the stage config and the sender's holdings
pub fn validate_offer(
    state: &NegotiationState,
    stage: &StageConfig,
    sender: &ParticipantId,
    buy: &ChipMap,
    sell: &ChipMap,
) -> Result<(), Rejection> {
    let invalid = |reason: String| Err(Rejection::InvalidOffer(reason));

    if buy.is_empty() && sell.is_empty() {
        return invalid("offer is empty".to_string());
    }

    for (chip, quantity) in buy {
        let Some(item) = stage.chip(chip) else {
            return invalid(format!("unknown chip {}", chip));
        };
        if !item.can_buy {
            return invalid(format!("{} chips cannot be bought", item.name));
        }
        if *quantity == 0 {
            return invalid(format!("zero quantity for {}", chip));
        }
        if sell.contains_key(chip) {
            return invalid(format!("{} appears on both sides", chip));
        }
    }

    for (chip, quantity) in sell {
        let Some(item) = stage.chip(chip) else {
            return invalid(format!("unknown chip {}", chip));
        };
        if !item.can_sell {
            return invalid(format!("{} chips cannot be sold", item.name));
        }
        if *quantity == 0 {
            return invalid(format!("zero quantity for {}", chip));
        }
    }

    let Some(entry) = state.ledger.get(sender) else {
        return Err(Rejection::UnknownParticipant);
    };
    if let Some((chip, required, available)) = entry.shortfall(sell) {
        return invalid(format!(
            "sender holds {} {} but offers {}",
            available, chip, required
        ));
    }

    Ok(())
}

/// Record a new offer from the current-turn participant.
///
/// The turn is not advanced: the sender stays current until the transaction
/// resolves.
pub fn submit_offer(
    state: &mut NegotiationState,
    log: &mut EventLog,
    stage: &StageConfig,
    sender: &ParticipantId,
    buy: ChipMap,
    sell: ChipMap,
    now: DateTime<Utc>,
) -> Result<OfferId, Rejection> {
    if state.is_game_over {
        return Err(Rejection::GameOver);
    }
    if state.current_turn.as_ref() != Some(sender) {
        return Err(Rejection::NotYourTurn);
    }

    let round = state.current_round;
    if state.has_offered(round, sender) {
        return Err(Rejection::DuplicateOffer);
    }

    validate_offer(state, stage, sender, &buy, &sell)?;

    let offer = Offer {
        id: OfferId::generate(),
        round,
        sender_id: sender.clone(),
        buy,
        sell,
        timestamp: now,
    };
    let offer_id = offer.id;

    log.append(ChipEvent::Offer { offer: offer.clone() }, now);
    state
        .offers_by_round
        .entry(round)
        .or_default()
        .insert(sender.clone(), Transaction::new(offer));

    Ok(offer_id)
}

/// Record an accept/decline for the pending transaction of the current turn.
///
/// Accepting requires holding everything the sender asks for: responder
/// holdings cannot change while a transaction is pending, so every accepter
/// can settle if drawn as recipient.
pub fn submit_response(
    state: &mut NegotiationState,
    log: &mut EventLog,
    responder: &ParticipantId,
    accepted: bool,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    let round = state.current_round;
    let Some(sender) = state.current_turn.clone() else {
        return Err(Rejection::NoPendingOffer);
    };
    let Some(transaction) = state
        .transaction(round, &sender)
        .filter(|t| t.is_pending())
    else {
        return Err(Rejection::NoPendingOffer);
    };

    if responder == &sender {
        return Err(Rejection::SelfResponse);
    }
    if transaction.has_responded(responder) {
        return Err(Rejection::DuplicateResponse);
    }
    if accepted
        && !state
            .ledger
            .get(responder)
            .is_some_and(|entry| entry.holds(&transaction.offer.buy))
    {
        return Err(Rejection::CannotSupply);
    }

    if let Some(transaction) = state.transaction_mut(round, &sender) {
        transaction.response_map.insert(
            responder.clone(),
            OfferResponse {
                accepted,
                timestamp: now,
            },
        );
    }
    log.append(
        ChipEvent::Response {
            round,
            sender_id: sender,
            responder_id: responder.clone(),
            accepted,
        },
        now,
    );

    Ok(())
}

/// Resolve the current transaction once every active participant other than
/// the sender has responded.
///
/// The recipient is drawn uniformly from the accepters. Returns `None` when
/// the quorum is incomplete or there is nothing pending; calling again after
/// resolution is a no-op.
pub fn try_resolve<R: Rng + ?Sized>(
    state: &mut NegotiationState,
    active: &[ParticipantId],
    rng: &mut R,
) -> Option<QuorumDecision> {
    let round = state.current_round;
    let sender = state.current_turn.clone()?;
    let transaction = state.transaction_mut(round, &sender)?;
    if !transaction.is_pending() {
        return None;
    }

    let mut accepters = Vec::new();
    for participant in active.iter().filter(|p| **p != sender) {
        match transaction.response_map.get(participant) {
            None => return None,
            Some(response) if response.accepted => accepters.push(participant),
            Some(_) => {}
        }
    }

    let recipient = accepters.choose(rng).map(|p| (*p).clone());
    transaction.status = match recipient {
        Some(_) => TransactionStatus::Accepted,
        None => TransactionStatus::Declined,
    };
    transaction.recipient_id = recipient.clone();

    Some(QuorumDecision {
        round,
        sender_id: sender,
        status: transaction.status,
        recipient_id: recipient,
    })
}
