//! Settlement: applies a resolved transaction to the chip ledger

use crate::error::SettlementError;
use crate::events::{ChipEvent, EventLog};
use crate::ledger::{ChipLedger, ParticipantLedgerEntry};
use crate::types::{ChipId, ChipMap, ParticipantId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::types::{Transaction, TransactionStatus};

/// Apply a resolved transaction.
///
/// Accepted: the sender gives `sell` and receives `buy`; the recipient does
/// the opposite. Either both entries change or neither does. Declined: no
/// ledger change, an `OfferDeclined` entry is logged.
pub fn settle(
    ledger: &mut ChipLedger,
    log: &mut EventLog,
    transaction: &Transaction,
    now: DateTime<Utc>,
) -> Result<(), SettlementError> {
    match transaction.status {
        TransactionStatus::Pending => Err(SettlementError::NotSettleable(format!(
            "offer {} is still pending",
            transaction.offer.id
        ))),
        TransactionStatus::Declined => {
            log.append(
                ChipEvent::OfferDeclined {
                    offer: transaction.offer.clone(),
                },
                now,
            );
            Ok(())
        }
        TransactionStatus::Accepted => {
            transfer(ledger, transaction)?;
            log.append(
                ChipEvent::Transaction {
                    transaction: transaction.clone(),
                },
                now,
            );
            Ok(())
        }
    }
}

fn transfer(ledger: &mut ChipLedger, transaction: &Transaction) -> Result<(), SettlementError> {
    let offer = &transaction.offer;
    let sender_id = &offer.sender_id;
    let recipient_id = transaction
        .recipient_id
        .as_ref()
        .ok_or(SettlementError::MissingRecipient)?;
    if recipient_id == sender_id {
        return Err(SettlementError::NotSettleable(
            "sender cannot trade with themselves".to_string(),
        ));
    }

    let sender = ledger
        .get(sender_id)
        .ok_or_else(|| SettlementError::UnknownParticipant(sender_id.clone()))?;
    let recipient = ledger
        .get(recipient_id)
        .ok_or_else(|| SettlementError::UnknownParticipant(recipient_id.clone()))?;

    ensure_holds(sender, sender_id, &offer.sell)?;
    ensure_holds(recipient, recipient_id, &offer.buy)?;

    let sender_after = sender
        .apply_trade(&offer.buy, &offer.sell)
        .ok_or_else(|| SettlementError::NotSettleable("sender quantity overflow".to_string()))?;
    let recipient_after = recipient
        .apply_trade(&offer.sell, &offer.buy)
        .ok_or_else(|| SettlementError::NotSettleable("recipient quantity overflow".to_string()))?;

    let totals_before = ledger.totals();
    let mut updated = ledger.clone();
    if let Some(entry) = updated.get_mut(sender_id) {
        entry.set_quantities(sender_after);
    }
    if let Some(entry) = updated.get_mut(recipient_id) {
        entry.set_quantities(recipient_after);
    }

    let totals_after = updated.totals();
    let total = |totals: &BTreeMap<ChipId, u64>, chip: &ChipId| totals.get(chip).copied().unwrap_or(0);
    if let Some(chip) = totals_before
        .keys()
        .chain(totals_after.keys())
        .find(|chip| total(&totals_before, *chip) != total(&totals_after, *chip))
    {
        return Err(SettlementError::ConservationViolated(chip.clone()));
    }

    *ledger = updated;
    Ok(())
}

fn ensure_holds(
    entry: &ParticipantLedgerEntry,
    participant: &ParticipantId,
    gives: &ChipMap,
) -> Result<(), SettlementError> {
    match entry.shortfall(gives) {
        Some((chip, required, available)) => Err(SettlementError::InsufficientChips {
            participant: participant.clone(),
            chip: chip.clone(),
            required,
            available,
        }),
        None => Ok(()),
    }
}
