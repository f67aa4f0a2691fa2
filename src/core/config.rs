//! Simulation configuration with documented defaults
//!
//! Loaded from a TOML file by the binaries and passed down explicitly;
//! nothing in the library reads configuration from a global.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::calendar::MS_PER_DAY;
use crate::core::error::{Result, SimError};

/// Configuration for a population run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Master seed. Each person derives its own generator from this and its
    /// index, so results do not depend on how rayon schedules persons.
    pub seed: u64,

    /// Number of persons to simulate
    pub population: usize,

    /// Calendar year in which persons are born and simulation begins
    pub start_year: i32,

    /// Calendar year at which simulation stops (exclusive)
    pub end_year: i32,

    /// Spacing between driver ticks, in days
    ///
    /// Delays that expire between ticks are rewound to their true expiry,
    /// so this only affects how often guards are re-evaluated.
    pub time_step_days: u32,

    /// Spacing between scheduled wellness encounters, in days
    ///
    /// Wellness Encounter states stay blocked until one of these occurs.
    pub wellness_interval_days: u32,

    /// Upper bound on state steps within a single `Context::run`
    ///
    /// Guards against modules whose transitions never make progress.
    pub iteration_limit: usize,

    /// Log every module's state history once it reaches Terminal
    pub log_history: bool,

    /// Directory holding the module library (`*.json`, submodules in sub-directories)
    pub modules_dir: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            population: 100,
            start_year: 1970,
            end_year: 2020,
            time_step_days: 7,
            wellness_interval_days: 365,
            iteration_limit: 10_000,
            log_history: false,
            modules_dir: PathBuf::from("modules"),
        }
    }
}

impl SimulationConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.population == 0 {
            return Err(SimError::Config("population must be at least 1".into()));
        }

        if self.end_year <= self.start_year {
            return Err(SimError::Config(format!(
                "end_year ({}) must be after start_year ({})",
                self.end_year, self.start_year
            )));
        }

        if self.time_step_days == 0 || self.wellness_interval_days == 0 {
            return Err(SimError::Config("time steps must be positive".into()));
        }

        if self.iteration_limit == 0 {
            return Err(SimError::Config("iteration_limit must be positive".into()));
        }

        Ok(())
    }

    pub fn time_step_millis(&self) -> i64 {
        self.time_step_days as i64 * MS_PER_DAY
    }

    pub fn wellness_interval_millis(&self) -> i64 {
        self.wellness_interval_days as i64 * MS_PER_DAY
    }
}
