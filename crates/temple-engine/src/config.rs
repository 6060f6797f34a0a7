//! Runner configuration.
//!
//! Holds the tick loop, logging and scenario settings together with the
//! gameplay tuning. Loaded from a TOML file; missing or broken files fall
//! back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use temple_common::{TempleError, TempleResult};
use temple_gameplay::SimulationSettings;
use tracing::{info, warn};

use crate::scenario::ScenarioConfig;

/// Configuration file name.
pub const CONFIG_FILE: &str = "temple.toml";

/// Runner configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // === Loop Settings ===
    /// Fixed step (ms)
    pub tick_ms: f32,
    /// Fight length cap (ms)
    pub duration_ms: f32,
    /// Log a status line every N ticks (0 = never)
    pub report_every_ticks: u64,

    // === Logging ===
    /// Default `EnvFilter` directive
    pub log_filter: String,
    /// Emit JSON log lines
    pub log_json: bool,

    // === Fight ===
    /// Who is on the field
    pub scenario: ScenarioConfig,
    /// Gameplay tuning
    pub simulation: SimulationSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 16.0,
            duration_ms: 120_000.0,
            report_every_ticks: 300,

            log_filter: "temple=info".to_owned(),
            log_json: false,

            scenario: ScenarioConfig::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl SimulationConfig {
    /// Reads a config file. A missing file yields defaults.
    pub fn read(path: impl AsRef<Path>) -> TempleResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| TempleError::Parse(e.to_string()))
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    #[cfg(test)]
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::read(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to load config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> TempleResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp values to sensible ranges. Returns the names of the fields that
    /// had to change.
    pub fn validate(&mut self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let mut clamp = |name: &'static str, value: &mut f32, min: f32, max: f32| {
            let clamped = if value.is_finite() { value.clamp(min, max) } else { min };
            if clamped != *value {
                warn!("Config `{name}` = {value} out of range, using {clamped}");
                *value = clamped;
                changed.push(name);
            }
        };

        clamp("tick_ms", &mut self.tick_ms, 1.0, 100.0);
        clamp("duration_ms", &mut self.duration_ms, self.tick_ms, 3_600_000.0);

        let combat = &mut self.simulation.combat;
        clamp("combat.block.max_stamina", &mut combat.block.max_stamina, 1.0, 1000.0);
        clamp("combat.block.damage_reduction", &mut combat.block.damage_reduction, 0.0, 1.0);
        clamp("combat.combo_window_ms", &mut combat.combo_window_ms, 0.0, 10_000.0);

        let squad = &mut self.simulation.squad;
        clamp("squad.spacing", &mut squad.spacing, 8.0, 400.0);
        clamp("squad.engage_radius", &mut squad.engage_radius, 16.0, 2000.0);
        clamp("squad.switch_chance", &mut squad.switch_chance, 0.0, 1.0);

        clamp("player.move_speed", &mut self.simulation.player.move_speed, 10.0, 2000.0);

        if self.log_filter.trim().is_empty() {
            warn!("Config `log_filter` is empty, using temple=info");
            self.log_filter = "temple=info".to_owned();
            changed.push("log_filter");
        }
        changed.extend(self.scenario.validate());
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.tick_ms, 16.0);
        assert_eq!(config.log_filter, "temple=info");
        assert_eq!(config.simulation.seed, 42);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulationConfig::default();
        config.tick_ms = 0.0;
        config.duration_ms = f32::NAN;
        config.simulation.squad.switch_chance = 3.0;

        let changed = config.validate();

        assert_eq!(config.tick_ms, 1.0);
        assert_eq!(config.duration_ms, 1.0);
        assert_eq!(config.simulation.squad.switch_chance, 1.0);
        assert_eq!(changed, vec!["tick_ms", "duration_ms", "squad.switch_chance"]);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("temple.toml");

        let mut config = SimulationConfig::default();
        config.tick_ms = 8.0;
        config.simulation.seed = 777;
        config.scenario.troopers = 6;

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = SimulationConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("temple.toml");
        fs::write(&config_path, "tick_ms = 10.0\n[simulation]\nseed = 9\n").expect("write");

        let loaded = SimulationConfig::load_from(&config_path);
        assert_eq!(loaded.tick_ms, 10.0);
        assert_eq!(loaded.simulation.seed, 9);
        assert_eq!(loaded.simulation.combat, SimulationSettings::default().combat);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = SimulationConfig::load_from("/nonexistent/path/temple.toml");
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("temple.toml");
        fs::write(&config_path, "tick_ms = \"fast\"").expect("write");

        assert!(matches!(SimulationConfig::read(&config_path), Err(TempleError::Parse(_))));
        assert_eq!(SimulationConfig::load_from(&config_path), SimulationConfig::default());
    }
}
