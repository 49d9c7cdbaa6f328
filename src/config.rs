//! Stage and engine configuration

use crate::error::{NegotiationError, Result};
use crate::types::{ChipId, DocumentKey, ParticipantId, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Chip item config
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChipItem {
    pub id: ChipId,
    /// Display name, e.g. "red"
    pub name: String,
    /// Emoji shown next to the chip
    #[serde(default)]
    pub avatar: String,
    #[serde(default = "default_true")]
    pub can_buy: bool,
    #[serde(default = "default_true")]
    pub can_sell: bool,
    pub starting_quantity: u32,
    /// Lower bound for the randomly-sampled private value
    pub lower_value: f64,
    /// Upper bound for the randomly-sampled private value
    pub upper_value: f64,
}

/// Chip negotiation stage config. Read-only to the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: StageId,
    #[serde(default = "default_stage_name")]
    pub name: String,
    pub chips: Vec<ChipItem>,
    #[serde(default = "default_num_rounds")]
    pub num_rounds: u32,
    #[serde(default)]
    pub enable_chat: bool,
}

impl StageConfig {
    /// Look up a chip item by ID
    pub fn chip(&self, chip_id: &ChipId) -> Option<&ChipItem> {
        self.chips.iter().find(|chip| &chip.id == chip_id)
    }

    /// Check the config is usable by the engine
    pub fn validate(&self) -> Result<()> {
        if self.num_rounds == 0 {
            return Err(NegotiationError::InvalidConfig(format!(
                "stage {}: num_rounds must be at least 1",
                self.id
            )));
        }

        if self.chips.is_empty() {
            return Err(NegotiationError::InvalidConfig(format!(
                "stage {}: no chips configured",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for chip in &self.chips {
            if !seen.insert(&chip.id) {
                return Err(NegotiationError::InvalidConfig(format!(
                    "stage {}: duplicate chip id {}",
                    self.id, chip.id
                )));
            }
            if !(chip.lower_value <= chip.upper_value) {
                return Err(NegotiationError::InvalidConfig(format!(
                    "chip {}: lower_value {} exceeds upper_value {}",
                    chip.id, chip.lower_value, chip.upper_value
                )));
            }
        }

        Ok(())
    }
}

/// Retry discipline for optimistic-concurrency conflicts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), exponential and capped
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistanceConfig {
    /// Upper bound on one assistance call
    #[serde(default = "default_assistance_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AssistanceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_assistance_timeout_ms(),
        }
    }
}

/// Engine-wide settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub assistance: AssistanceConfig,
}

/// A runnable negotiation scenario (used by the CLI simulator)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub experiment_id: String,
    pub cohort_id: String,
    pub stage: StageConfig,
    pub participants: Vec<ParticipantId>,
    /// Seed for the simulated agents; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a scenario from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let scenario: ScenarioConfig = toml::from_str(contents)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        self.stage.validate()?;

        if self.participants.is_empty() {
            return Err(NegotiationError::InvalidConfig(
                "scenario has no participants".to_string(),
            ));
        }

        let unique: HashSet<_> = self.participants.iter().collect();
        if unique.len() != self.participants.len() {
            return Err(NegotiationError::InvalidConfig(
                "scenario lists a participant twice".to_string(),
            ));
        }

        if self.engine.retry.max_attempts == 0 {
            return Err(NegotiationError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Document key for this scenario's negotiation
    pub fn document_key(&self) -> DocumentKey {
        DocumentKey::new(
            self.experiment_id.clone(),
            self.cohort_id.clone(),
            self.stage.id.0.clone(),
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_stage_name() -> String {
    "Chip negotiation".to_string()
}

fn default_num_rounds() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    16
}

fn default_base_backoff_ms() -> u64 {
    2
}

fn default_max_backoff_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_assistance_timeout_ms() -> u64 {
    30_000
}


#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
experiment_id = "exp-1"
cohort_id = "cohort-a"
participants = ["alice", "bob", "carol"]
seed = 7

[engine.retry]
max_attempts = 8

[stage]
id = "chips"
num_rounds = 2

[[stage.chips]]
id = "red"
name = "red"
avatar = "🔴"
starting_quantity = 10
lower_value = 0.1
upper_value = 1.0

[[stage.chips]]
id = "green"
name = "green"
can_buy = false
starting_quantity = 5
lower_value = 0.5
upper_value = 0.5
"#;

    #[test]
    fn test_scenario_from_toml() {
        let scenario = ScenarioConfig::from_toml(SCENARIO).unwrap();

        assert_eq!(scenario.participants.len(), 3);
        assert_eq!(scenario.seed, Some(7));
        assert_eq!(scenario.stage.num_rounds, 2);
        assert_eq!(scenario.stage.name, "Chip negotiation");
        assert!(!scenario.stage.enable_chat);
        assert_eq!(scenario.engine.retry.max_attempts, 8);
        assert_eq!(scenario.engine.retry.base_backoff_ms, 2);
        assert_eq!(scenario.engine.logging.level, "info");

        let green = scenario.stage.chip(&ChipId::from("green")).unwrap();
        assert!(!green.can_buy);
        assert!(green.can_sell);
        assert_eq!(
            scenario.document_key(),
            DocumentKey::new("exp-1", "cohort-a", "chips")
        );
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let mut stage = fixtures::stage(1);
        stage.num_rounds = 0;
        assert!(matches!(
            stage.validate(),
            Err(NegotiationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_chip() {
        let mut stage = fixtures::stage(1);
        stage.chips.push(fixtures::chip("red", 1));
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_value_range() {
        let mut stage = fixtures::stage(1);
        stage.chips[0].lower_value = 2.0;
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ms(1), 2);
        assert_eq!(policy.backoff_ms(2), 4);
        assert_eq!(policy.backoff_ms(10), 50);
        assert_eq!(policy.backoff_ms(u32::MAX), 50);
    }

    #[test]
    fn test_scenario_rejects_duplicate_participants() {
        let toml = SCENARIO.replace(
            "[\"alice\", \"bob\", \"carol\"]",
            "[\"alice\", \"alice\"]",
        );
        assert!(ScenarioConfig::from_toml(&toml).is_err());
    }
}
