//! Per-participant chip holdings and private valuations

use crate::config::StageConfig;
use crate::types::{ChipId, ChipMap, ChipValueMap};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One participant's chips. Quantities change through settlement only;
/// valuations are fixed at creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantLedgerEntry {
    chip_quantities: ChipMap,
    chip_values: ChipValueMap,
}

/// Payout before and after a hypothetical trade
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayoutPreview {
    pub before: f64,
    pub after: f64,
}

impl PayoutPreview {
    pub fn gain(&self) -> f64 {
        self.after - self.before
    }
}

impl ParticipantLedgerEntry {
    pub fn new(chip_quantities: ChipMap, chip_values: ChipValueMap) -> Self {
        Self {
            chip_quantities,
            chip_values,
        }
    }

    /// Starting quantities from the stage config, values sampled in whole
    /// cents uniformly from each chip's `[lower, upper]` range
    pub fn initialize<R: Rng + ?Sized>(stage: &StageConfig, rng: &mut R) -> Self {
        let mut chip_quantities = ChipMap::new();
        let mut chip_values = ChipValueMap::new();

        for chip in &stage.chips {
            chip_quantities.insert(chip.id.clone(), chip.starting_quantity);

            let span_cents = ((chip.upper_value - chip.lower_value) * 100.0).round() + 1.0;
            let cents = (rng.gen::<f64>() * span_cents + chip.lower_value * 100.0).floor();
            chip_values.insert(chip.id.clone(), cents / 100.0);
        }

        Self {
            chip_quantities,
            chip_values,
        }
    }

    pub fn quantities(&self) -> &ChipMap {
        &self.chip_quantities
    }

    pub fn values(&self) -> &ChipValueMap {
        &self.chip_values
    }

    pub fn quantity(&self, chip: &ChipId) -> u32 {
        self.chip_quantities.get(chip).copied().unwrap_or(0)
    }

    pub fn value(&self, chip: &ChipId) -> f64 {
        self.chip_values.get(chip).copied().unwrap_or(0.0)
    }

    /// True if every quantity in `required` is held
    pub fn holds(&self, required: &ChipMap) -> bool {
        required
            .iter()
            .all(|(chip, quantity)| self.quantity(chip) >= *quantity)
    }

    /// First chip in `required` that is not fully held, with the held amount
    pub fn shortfall<'a>(&self, required: &'a ChipMap) -> Option<(&'a ChipId, u32, u32)> {
        required.iter().find_map(|(chip, quantity)| {
            let available = self.quantity(chip);
            (available < *quantity).then_some((chip, *quantity, available))
        })
    }

    /// Quantities after removing `remove` and adding `add`, or `None` if any
    /// chip would go negative. Does not modify `self`.
    pub(crate) fn apply_trade(&self, add: &ChipMap, remove: &ChipMap) -> Option<ChipMap> {
        let mut quantities = self.chip_quantities.clone();

        for (chip, quantity) in remove {
            let held = quantities.entry(chip.clone()).or_insert(0);
            *held = held.checked_sub(*quantity)?;
        }
        for (chip, quantity) in add {
            let held = quantities.entry(chip.clone()).or_insert(0);
            *held = held.checked_add(*quantity)?;
        }

        Some(quantities)
    }

    pub(crate) fn set_quantities(&mut self, quantities: ChipMap) {
        self.chip_quantities = quantities;
    }

    /// Value of all held chips at this participant's private valuation
    pub fn total_value(&self) -> f64 {
        self.chip_quantities
            .iter()
            .map(|(chip, quantity)| f64::from(*quantity) * self.value(chip))
            .sum()
    }

    /// Payout change if `add` were received and `remove` given up
    pub fn offer_payout(&self, add: &ChipMap, remove: &ChipMap) -> PayoutPreview {
        let before = self.total_value();
        let value_of = |map: &ChipMap| -> f64 {
            map.iter()
                .map(|(chip, quantity)| f64::from(*quantity) * self.value(chip))
                .sum()
        };

        PayoutPreview {
            before,
            after: before + value_of(add) - value_of(remove),
        }
    }
}
