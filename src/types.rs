//! Core types used throughout the chip negotiation engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Experiment owning the cohorts and stages
    ExperimentId
);
string_id!(
    /// Group of participants progressing through stages together
    CohortId
);
string_id!(
    /// Stage identifier; also the public seed for turn ordering
    StageId
);
string_id!(
    /// Public participant identifier
    ParticipantId
);
string_id!(
    /// Chip type identifier (e.g. "red")
    ChipId
);

/// Unique identifier for offers (time-ordered)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub Uuid);

impl OfferId {
    /// Generate a new time-ordered offer ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offer_{}", self.0)
    }
}

/// Chip type -> quantity
pub type ChipMap = BTreeMap<ChipId, u32>;

/// Chip type -> private per-chip valuation
pub type ChipValueMap = BTreeMap<ChipId, f64>;

/// Key of one shared negotiation document
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub experiment_id: ExperimentId,
    pub cohort_id: CohortId,
    pub stage_id: StageId,
}

impl DocumentKey {
    pub fn new(
        experiment_id: impl Into<String>,
        cohort_id: impl Into<String>,
        stage_id: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: ExperimentId::new(experiment_id),
            cohort_id: CohortId::new(cohort_id),
            stage_id: StageId::new(stage_id),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.experiment_id, self.cohort_id, self.stage_id
        )
    }
}

/// Build a chip map from `(chip, quantity)` pairs
pub fn chip_map<'a>(pairs: impl IntoIterator<Item = (&'a str, u32)>) -> ChipMap {
    pairs
        .into_iter()
        .map(|(chip, quantity)| (ChipId::new(chip), quantity))
        .collect()
}
