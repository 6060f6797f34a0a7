//! # Temple Engine
//!
//! Headless runner for the Temple combat core.
//!
//! Loads `temple.toml` (or the path given as the first argument), stages the
//! configured scenario and runs it on a fixed step until one side is wiped
//! out or the time cap is reached. `temple-sim --init [path]` writes the
//! default configuration instead.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod scenario;

use std::path::PathBuf;

use anyhow::{Context, Result};
use temple_gameplay::Simulation;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{SimulationConfig, CONFIG_FILE};
use scenario::{populate, Autopilot, FightReport};

/// Main entry point.
fn main() -> Result<()> {
    let mut args = std::env::args_os().skip(1).peekable();
    let init = args.next_if(|a| a == "--init").is_some();
    let path = args.next().map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    if init {
        SimulationConfig::default()
            .save_to(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        return Ok(());
    }

    let loaded = SimulationConfig::read(&path);
    let mut config = loaded.as_ref().map_or_else(|_| SimulationConfig::default(), Clone::clone);

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive(config.log_filter.parse()?);
    if config.log_json {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    info!("Temple simulation starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &loaded {
        Ok(_) => info!("Config: {}", path.display()),
        Err(e) => warn!("Failed to load {}: {e}, using defaults", path.display()),
    }
    config.validate();

    let report = run(&config)?;
    info!(
        "Fight over after {:.1}s ({} ticks): player {}, {} allies and {} foes standing",
        report.elapsed_ms / 1000.0,
        report.ticks,
        if report.player_alive { "alive" } else { "down" },
        report.allies_alive,
        report.foes_alive
    );
    Ok(())
}

/// Stages and runs one fight.
fn run(config: &SimulationConfig) -> Result<FightReport> {
    let mut sim = Simulation::new(config.simulation.clone());
    let roster = populate(&mut sim, &config.scenario).context("failed to stage scenario")?;
    let mut pilot = config.scenario.autopilot.then(Autopilot::new);

    let mut elapsed = 0.0;
    while elapsed < config.duration_ms {
        if let (Some(pilot), Some(player)) = (pilot.as_mut(), roster.player) {
            let intent = pilot.intent(sim.combat(), player);
            sim.set_player_intent(intent);
        }
        sim.tick(config.tick_ms);
        elapsed += config.tick_ms;

        if config.report_every_ticks > 0 && sim.ticks() % config.report_every_ticks == 0 {
            let status = FightReport::capture(&sim, &roster);
            debug!(
                "t={:.1}s allies={} foes={} player_alive={}",
                status.elapsed_ms / 1000.0,
                status.allies_alive,
                status.foes_alive,
                status.player_alive
            );
        }
        if FightReport::capture(&sim, &roster).is_decided() {
            break;
        }
    }
    Ok(FightReport::capture(&sim, &roster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario::{ScenarioConfig, ScenarioKind};

    #[test]
    fn test_run_stops_when_decided() {
        let mut config = SimulationConfig::default();
        config.duration_ms = 5000.0;
        config.scenario = ScenarioConfig {
            kind: ScenarioKind::BossDuel,
            player: false,
            troopers: 0,
            ..ScenarioConfig::default()
        };
        let report = run(&config).expect("run");
        assert_eq!(report.ticks, 1, "nobody on Vader's side");
    }

    #[test]
    fn test_run_respects_duration_cap() {
        let mut config = SimulationConfig::default();
        config.duration_ms = 160.0;
        let report = run(&config).expect("run");
        assert_eq!(report.ticks, 10);
        assert!(report.player_alive);
    }
}
