//! Negotiation types and state machine data

use crate::error::SettlementError;
use crate::events::{EventLog, EventLogEntry};
use crate::ledger::ChipLedger;
use crate::types::{ChipMap, OfferId, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trade proposal. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub round: u32,
    pub sender_id: ParticipantId,
    /// Chips the sender wants to receive
    pub buy: ChipMap,
    /// Chips the sender gives up in return
    pub sell: ChipMap,
    pub timestamp: DateTime<Utc>,
}

/// One participant's answer to an offer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfferResponse {
    pub accepted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Transaction status. `Pending` moves to exactly one terminal status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Accepted,
    Declined,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::Accepted => write!(f, "ACCEPTED"),
            TransactionStatus::Declined => write!(f, "DECLINED"),
        }
    }
}

/// An offer together with the responses it collected
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub offer: Offer,
    pub response_map: BTreeMap<ParticipantId, OfferResponse>,
    pub status: TransactionStatus,
    /// Set only when the status becomes `Accepted`
    pub recipient_id: Option<ParticipantId>,
}

impl Transaction {
    pub fn new(offer: Offer) -> Self {
        Self {
            offer,
            response_map: BTreeMap::new(),
            status: TransactionStatus::Pending,
            recipient_id: None,
        }
    }

    pub fn sender_id(&self) -> &ParticipantId {
        &self.offer.sender_id
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn has_responded(&self, participant: &ParticipantId) -> bool {
        self.response_map.contains_key(participant)
    }
}

/// Shared mutable root of one cohort+stage negotiation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NegotiationState {
    pub is_game_over: bool,
    pub current_round: u32,
    pub current_turn: Option<ParticipantId>,
    /// round -> sender -> transaction
    pub offers_by_round: BTreeMap<u32, BTreeMap<ParticipantId, Transaction>>,
    pub ledger: ChipLedger,
}

impl NegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(&self, round: u32, sender: &ParticipantId) -> Option<&Transaction> {
        self.offers_by_round.get(&round)?.get(sender)
    }

    pub(crate) fn transaction_mut(
        &mut self,
        round: u32,
        sender: &ParticipantId,
    ) -> Option<&mut Transaction> {
        self.offers_by_round.get_mut(&round)?.get_mut(sender)
    }

    /// Transaction submitted by the current-turn participant this round
    pub fn current_transaction(&self) -> Option<&Transaction> {
        let sender = self.current_turn.as_ref()?;
        self.transaction(self.current_round, sender)
    }

    /// Current transaction if it is still awaiting responses
    pub fn pending_transaction(&self) -> Option<&Transaction> {
        self.current_transaction().filter(|t| t.is_pending())
    }

    pub fn has_offered(&self, round: u32, participant: &ParticipantId) -> bool {
        self.transaction(round, participant).is_some()
    }

    /// Rounds not yet started, counting the current one as in progress
    pub fn rounds_left(&self, num_rounds: u32) -> u32 {
        num_rounds.saturating_sub(self.current_round + 1)
    }
}

/// Everything persisted under one document key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NegotiationDocument {
    pub state: NegotiationState,
    pub log: EventLog,
}

/// Read-only view returned to display and audit consumers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSnapshot {
    pub state: NegotiationState,
    pub events: Vec<EventLogEntry>,
    pub version: u64,
}

/// Structural reasons a request was refused. Never retried; the caller
/// should refresh its view of the state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    NoActiveNegotiation,
    GameOver,
    UnknownParticipant,
    NotYourTurn,
    DuplicateOffer,
    InvalidOffer(String),
    NoPendingOffer,
    SelfResponse,
    DuplicateResponse,
    /// Responder accepted but does not hold the chips the sender asks for
    CannotSupply,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoActiveNegotiation => write!(f, "no active negotiation"),
            Rejection::GameOver => write!(f, "game is over"),
            Rejection::UnknownParticipant => write!(f, "participant is not active in this cohort"),
            Rejection::NotYourTurn => write!(f, "not your turn"),
            Rejection::DuplicateOffer => write!(f, "offer already submitted this round"),
            Rejection::InvalidOffer(reason) => write!(f, "invalid offer: {}", reason),
            Rejection::NoPendingOffer => write!(f, "no pending offer"),
            Rejection::SelfResponse => write!(f, "cannot respond to own offer"),
            Rejection::DuplicateResponse => write!(f, "already responded"),
            Rejection::CannotSupply => write!(f, "cannot supply the requested chips"),
        }
    }
}

/// Where the turn pointer moved after a resolution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnAdvance {
    Unchanged,
    Turn {
        round: u32,
        participant: ParticipantId,
    },
    NewRound {
        round: u32,
        participant: ParticipantId,
    },
    GameOver,
}

/// Final outcome of one transaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub round: u32,
    pub sender_id: ParticipantId,
    pub status: TransactionStatus,
    pub recipient_id: Option<ParticipantId>,
    /// Set when an accepted trade could not settle and was forced to decline
    #[serde(skip)]
    pub settlement_error: Option<SettlementError>,
    pub next: TurnAdvance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoOpReason {
    StageNotConfigured,
    NoNegotiation,
    NoActiveParticipants,
    GameOver,
}

/// Result of `assign_initial_turn`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnAssignment {
    Assigned {
        round: u32,
        participant: ParticipantId,
    },
    AlreadyAssigned(ParticipantId),
    NoOp(NoOpReason),
}

impl TurnAssignment {
    /// Participant holding the turn after the call, if any
    pub fn current_turn(&self) -> Option<&ParticipantId> {
        match self {
            TurnAssignment::Assigned { participant, .. } => Some(participant),
            TurnAssignment::AlreadyAssigned(participant) => Some(participant),
            TurnAssignment::NoOp(_) => None,
        }
    }
}

/// Result of `offer`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OfferOutcome {
    Submitted {
        offer_id: OfferId,
        /// Present when the quorum was empty and the offer resolved at once
        resolution: Option<Resolution>,
    },
    Rejected(Rejection),
}

impl OfferOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, OfferOutcome::Submitted { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            OfferOutcome::Rejected(rejection) => Some(rejection),
            OfferOutcome::Submitted { .. } => None,
        }
    }
}

/// Result of `respond`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResponseOutcome {
    /// Response stored; other responses still outstanding
    Recorded,
    /// This response completed the quorum
    Resolved(Resolution),
    Rejected(Rejection),
}

impl ResponseOutcome {
    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            ResponseOutcome::Resolved(resolution) => Some(resolution),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ResponseOutcome::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Result of `refresh_turn`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RefreshOutcome {
    /// Nothing to repair
    Unchanged,
    /// A departed responder completed the quorum
    Resolved(Resolution),
    /// The current-turn participant left before offering
    Advanced(TurnAdvance),
    NoOp(NoOpReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chip_map;

    fn offer(sender: &str, round: u32) -> Offer {
        Offer {
            id: OfferId::generate(),
            round,
            sender_id: ParticipantId::from(sender),
            buy: chip_map([("blue", 1)]),
            sell: chip_map([("red", 1)]),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Accepted.is_terminal());
        assert!(TransactionStatus::Declined.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TransactionStatus::Accepted).unwrap();
        assert_eq!(json, "\"ACCEPTED\"");
    }

    #[test]
    fn test_current_transaction_lookup() {
        let mut state = NegotiationState::new();
        assert!(state.current_transaction().is_none());

        let alice = ParticipantId::from("alice");
        state
            .offers_by_round
            .entry(0)
            .or_default()
            .insert(alice.clone(), Transaction::new(offer("alice", 0)));
        assert!(state.current_transaction().is_none());

        state.current_turn = Some(alice.clone());
        assert!(state.pending_transaction().is_some());
        assert!(state.has_offered(0, &alice));
        assert!(!state.has_offered(1, &alice));

        state.transaction_mut(0, &alice).unwrap().status = TransactionStatus::Declined;
        assert!(state.current_transaction().is_some());
        assert!(state.pending_transaction().is_none());
    }

    #[test]
    fn test_rounds_left() {
        let mut state = NegotiationState::new();
        assert_eq!(state.rounds_left(3), 2);
        state.current_round = 2;
        assert_eq!(state.rounds_left(3), 0);
        state.current_round = 3;
        assert_eq!(state.rounds_left(3), 0);
    }

    #[test]
    fn test_document_serialization() {
        let mut doc = NegotiationDocument::default();
        doc.state
            .offers_by_round
            .entry(1)
            .or_default()
            .insert(ParticipantId::from("bob"), Transaction::new(offer("bob", 1)));

        let json = serde_json::to_string(&doc).unwrap();
        let back: NegotiationDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(Rejection::NotYourTurn.to_string(), "not your turn");
        assert_eq!(
            Rejection::InvalidOffer("empty".to_string()).to_string(),
            "invalid offer: empty"
        );
    }
}
