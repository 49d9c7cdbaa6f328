//! Append-only negotiation event log

pub mod history;

pub use history::{describe_chips, render_history};

use crate::negotiation::types::{Offer, Transaction};
use crate::types::ParticipantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event payloads
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChipEvent {
    NewRound {
        round: u32,
    },
    NewTurn {
        round: u32,
        participant_id: ParticipantId,
    },
    Offer {
        offer: Offer,
    },
    Response {
        round: u32,
        sender_id: ParticipantId,
        responder_id: ParticipantId,
        accepted: bool,
    },
    OfferDeclined {
        offer: Offer,
    },
    Transaction {
        transaction: Transaction,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ChipEvent {
    /// Round the event belongs to, if it is round-scoped
    pub fn round(&self) -> Option<u32> {
        match self {
            ChipEvent::NewRound { round }
            | ChipEvent::NewTurn { round, .. }
            | ChipEvent::Response { round, .. } => Some(*round),
            ChipEvent::Offer { offer } | ChipEvent::OfferDeclined { offer } => Some(offer.round),
            ChipEvent::Transaction { transaction } => Some(transaction.offer.round),
            ChipEvent::Info { .. } | ChipEvent::Error { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ChipEvent,
}

/// Entries are only ever appended; timestamps never decrease.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    entries: Vec<EventLogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. A timestamp earlier than the last entry (clock skew
    /// between writers) is clamped up to it.
    pub fn append(&mut self, event: ChipEvent, at: DateTime<Utc>) -> &EventLogEntry {
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };
        self.entries.push(EventLogEntry { timestamp, event });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[EventLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&EventLogEntry> {
        self.entries.last()
    }

    /// Entries scoped to one round, in append order
    pub fn for_round(&self, round: u32) -> impl Iterator<Item = &EventLogEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.event.round() == Some(round))
    }
}
