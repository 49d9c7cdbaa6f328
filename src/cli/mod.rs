//! CLI module for the chip negotiation simulator

pub mod app;
pub mod commands;

pub use app::{SimulationApp, SimulationReport};
pub use commands::{Cli, Commands};
