use crate::error::{EvolutionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What a tick does when the previous one is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Return immediately with `TickOutcome::Skipped` and log a warning.
    #[default]
    Skip,
    /// Wait for the running tick, then run.
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
    /// Maximum entities scanned per tick.
    pub batch_size: usize,
    /// Maximum entities evaluated in parallel within a tick.
    pub max_concurrency: usize,
    /// Seconds since the last transition before a `time_progression` event fires.
    pub time_progression_secs: i64,
    /// A `network_sync` event fires on every Nth scheduler cycle.
    pub sync_every_ticks: u64,
    /// Modulus of the `phase` value carried by synthesized events.
    pub phase_modulus: u64,
    pub overlap: OverlapPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            batch_size: 100,
            max_concurrency: 8,
            time_progression_secs: 60,
            sync_every_ticks: 5,
            phase_modulus: 7,
            overlap: OverlapPolicy::Skip,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("interval_ms", self.interval_ms == 0),
            ("batch_size", self.batch_size == 0),
            ("max_concurrency", self.max_concurrency == 0),
            ("sync_every_ticks", self.sync_every_ticks == 0),
            ("phase_modulus", self.phase_modulus == 0),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(EvolutionError::ValidationError(format!(
                "scheduler.{name} must be greater than zero"
            )));
        }
        if self.time_progression_secs < 0 {
            return Err(EvolutionError::ValidationError(
                "scheduler.time_progression_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    /// Records returned by history queries that do not pass a limit.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            history_limit: 50,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file. Missing fields fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()
    }
}
