//! Chip ledger: holdings for every participant in one negotiation

pub mod entry;

pub use entry::{ParticipantLedgerEntry, PayoutPreview};

use crate::types::{ChipId, ChipMap, ParticipantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ledger for all participants of one cohort+stage
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChipLedger {
    entries: BTreeMap<ParticipantId, ParticipantLedgerEntry>,
}

impl ChipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<&ParticipantLedgerEntry> {
        self.entries.get(participant)
    }

    pub(crate) fn get_mut(
        &mut self,
        participant: &ParticipantId,
    ) -> Option<&mut ParticipantLedgerEntry> {
        self.entries.get_mut(participant)
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.entries.contains_key(participant)
    }

    /// Add a participant's initial entry. Returns false (and leaves the
    /// existing entry alone) if the participant is already present.
    pub fn insert_if_absent(
        &mut self,
        participant: ParticipantId,
        entry: ParticipantLedgerEntry,
    ) -> bool {
        if self.entries.contains_key(&participant) {
            return false;
        }
        self.entries.insert(participant, entry);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &ParticipantLedgerEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of each chip type across all participants
    pub fn totals(&self) -> BTreeMap<ChipId, u64> {
        let mut totals = BTreeMap::new();
        for entry in self.entries.values() {
            for (chip, quantity) in entry.quantities() {
                *totals.entry(chip.clone()).or_insert(0) += u64::from(*quantity);
            }
        }
        totals
    }

    /// True if some participant other than `sender` holds all of `buy`
    pub fn can_any_counterparty_supply(&self, sender: &ParticipantId, buy: &ChipMap) -> bool {
        self.entries
            .iter()
            .any(|(participant, entry)| participant != sender && entry.holds(buy))
    }
}
