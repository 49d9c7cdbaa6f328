//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chip-negotiation")]
#[command(about = "Chip negotiation engine - round-based multi-party chip trading", long_about = None)]
pub struct Cli {
    /// Log level, overriding the scenario's engine.logging.level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a full game with simulated participants
    Simulate {
        /// Scenario file (TOML)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Seed for the simulated agents (overrides the scenario's)
        #[arg(long)]
        seed: Option<u64>,

        /// Render the history from this participant's point of view
        #[arg(long)]
        viewer: Option<String>,

        /// Print the final snapshot as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Load and check a scenario file
    Validate {
        /// Scenario file (TOML)
        #[arg(short, long)]
        scenario: PathBuf,
    },
}

impl Commands {
    pub fn scenario_path(&self) -> &PathBuf {
        match self {
            Commands::Simulate { scenario, .. } | Commands::Validate { scenario } => scenario,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::parse_from([
            "chip-negotiation",
            "simulate",
            "--scenario",
            "game.toml",
            "--seed",
            "42",
        ]);

        match cli.command {
            Commands::Simulate { scenario, seed, viewer, json } => {
                assert_eq!(scenario, PathBuf::from("game.toml"));
                assert_eq!(seed, Some(42));
                assert_eq!(viewer, None);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_validate_with_global_log_level() {
        let cli = Cli::parse_from(["chip-negotiation", "validate", "-s", "game.toml", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.command.scenario_path(), &PathBuf::from("game.toml"));
    }
}
