//! Chip negotiation engine
//!
//! Participants take turns proposing trades of fungible chips; every other
//! active participant accepts or declines, and accepted trades settle under
//! strict conservation. All state for one cohort+stage lives in a single
//! versioned document, and every operation is an atomic read-modify-write
//! against it, retried on contention.

pub mod assistance;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod negotiation;
pub mod roster;
pub mod store;
pub mod types;

pub use config::{ChipItem, EngineConfig, RetryPolicy, ScenarioConfig, StageConfig};
pub use error::{AssistanceError, NegotiationError, Result, SettlementError};
pub use negotiation::{
    NegotiationCoordinator, NegotiationSnapshot, OfferOutcome, Rejection, ResponseOutcome,
    TurnAssignment,
};
pub use types::{ChipId, ChipMap, CohortId, DocumentKey, ExperimentId, ParticipantId, StageId};
