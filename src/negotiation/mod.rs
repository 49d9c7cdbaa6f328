//! Chip negotiation: turn scheduling, offer/response protocol, settlement,
//! and the coordinator that runs them atomically

pub mod coordinator;
pub mod protocol;
pub mod scheduler;
pub mod settlement;
pub mod types;

pub use coordinator::NegotiationCoordinator;
pub use protocol::QuorumDecision;
pub use scheduler::compute_turn_order;
pub use types::{
    NegotiationDocument, NegotiationSnapshot, NegotiationState, NoOpReason, Offer, OfferOutcome,
    OfferResponse, RefreshOutcome, Rejection, Resolution, ResponseOutcome, Transaction,
    TransactionStatus, TurnAdvance, TurnAssignment,
};
