//! Error types for the chip negotiation engine
//!
//! Structural rejections (wrong turn, duplicate offer, ...) are not errors; see
//! [`crate::negotiation::Rejection`]. Everything here is a true fault.

use crate::types::{ChipId, DocumentKey, ParticipantId};
use thiserror::Error;

/// Main error type for the negotiation engine
#[derive(Error, Debug)]
pub enum NegotiationError {
    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Write conflict on document {0}")]
    Conflict(DocumentKey),

    #[error("Transaction on {key} gave up after {attempts} conflicting attempts")]
    RetriesExhausted { key: DocumentKey, attempts: u32 },

    // Collaborator errors
    #[error("Roster provider failed: {0}")]
    Roster(String),

    #[error("Stage not configured: {0}")]
    StageNotConfigured(String),

    // Configuration errors
    #[error("Invalid configuration value: {0}")]
    InvalidConfig(String),

    // Settlement errors that escaped the coordinator
    #[error("Settlement failed: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Assistance failed: {0}")]
    Assistance(#[from] AssistanceError),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while applying an accepted transaction to the ledger
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Insufficient chips: {participant} needs {required} {chip}, holds {available}")]
    InsufficientChips {
        participant: ParticipantId,
        chip: ChipId,
        required: u32,
        available: u32,
    },

    #[error("Accepted transaction has no recipient")]
    MissingRecipient,

    #[error("Participant has no ledger entry: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Chip total changed during settlement: {0}")]
    ConservationViolated(ChipId),

    #[error("Transaction is not in a settleable state: {0}")]
    NotSettleable(String),
}

/// Errors from the LLM assistance boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssistanceError {
    #[error("Assistance provider error: {0}")]
    Provider(String),

    #[error("Assistance timed out after {0} ms")]
    Timeout(u64),

    #[error("Malformed assistance output")]
    Malformed { raw: String },

    #[error("No pending offer to respond to")]
    NoPendingOffer,

    #[error("Participant has no ledger entry: {0}")]
    UnknownParticipant(ParticipantId),
}

impl AssistanceError {
    /// Raw model text to show the user when parsing failed
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            AssistanceError::Malformed { raw } => Some(raw),
            _ => None,
        }
    }
}

/// Result type alias for negotiation operations
pub type Result<T> = std::result::Result<T, NegotiationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = NegotiationError::StageNotConfigured("chips".to_string());
        assert_eq!(err.to_string(), "Stage not configured: chips");
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = NegotiationError::RetriesExhausted {
            key: DocumentKey::new("exp", "c1", "s1"),
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "Transaction on exp/c1/s1 gave up after 4 conflicting attempts"
        );
    }

    #[test]
    fn test_insufficient_chips_error() {
        let err = SettlementError::InsufficientChips {
            participant: ParticipantId::from("alice"),
            chip: ChipId::from("red"),
            required: 5,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient chips: alice needs 5 red, holds 2"
        );
    }

    #[test]
    fn test_settlement_error_conversion() {
        fn settle() -> Result<()> {
            Err(SettlementError::MissingRecipient)?;
            Ok(())
        }

        assert!(matches!(
            settle().unwrap_err(),
            NegotiationError::Settlement(SettlementError::MissingRecipient)
        ));
    }

    #[test]
    fn test_malformed_keeps_raw_output() {
        let err = AssistanceError::Malformed {
            raw: "not json".to_string(),
        };
        assert_eq!(err.raw_output(), Some("not json"));
        assert_eq!(AssistanceError::Timeout(10).raw_output(), None);
    }
}
