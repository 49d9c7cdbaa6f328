//! Chip negotiation CLI binary

use anyhow::Context;
use chip_negotiation::cli::{Cli, Commands, SimulationApp, SimulationReport};
use chip_negotiation::events::describe_chips;
use chip_negotiation::{ParticipantId, ScenarioConfig, StageConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.command.scenario_path().clone();
    let scenario = ScenarioConfig::load(&path)
        .with_context(|| format!("failed to load scenario {}", path.display()))?;

    // RUST_LOG wins over --log-level, which wins over the scenario
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| scenario.engine.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Validate { .. } => {
            println!(
                "{}: ok ({} participants, {} chips, {} rounds)",
                path.display(),
                scenario.participants.len(),
                scenario.stage.chips.len(),
                scenario.stage.num_rounds
            );
        }

        Commands::Simulate { seed, viewer, json, .. } => {
            let seed = seed.or(scenario.seed).unwrap_or_else(rand::random);
            tracing::info!(seed, "Starting simulation");

            let app = SimulationApp::new(scenario).await?;
            let viewer = viewer.map(ParticipantId::new);
            let report = app
                .run(seed, viewer.as_ref())
                .await
                .context("simulation failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report.snapshot)?);
            } else {
                print_report(&report, app.stage());
            }
        }
    }

    Ok(())
}

fn print_report(report: &SimulationReport, stage: &StageConfig) {
    for line in &report.history {
        println!("{}", line);
    }

    println!();
    println!("Final holdings:");
    for (participant, entry) in report.snapshot.state.ledger.iter() {
        println!(
            "  {}: {} (worth ${:.2})",
            participant,
            describe_chips(entry.quantities(), stage),
            entry.total_value()
        );
    }
    println!(
        "{} offers, {} deals, {} write conflicts retried",
        report.offers, report.deals, report.conflicts
    );
}
