//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::ingestion::CheckpointPolicy;
use crate::orchestration::OrchestratorConfig;
use crate::processing::ProcessorConfig;

/// Rationale configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingestion: IngestionConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub health_check_interval_secs: u64,
    pub stale_sync_threshold_secs: u64,
    pub fetch_limit: usize,
    pub initial_backfill_hours: u32,
    pub dedup_window_hours: u32,
    pub max_processed_ids: usize,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub min_relationship_strength: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_secs: 300,
            health_check_interval_secs: 300,
            stale_sync_threshold_secs: 3600,
            fetch_limit: 1000,
            initial_backfill_hours: 24,
            dedup_window_hours: 24,
            max_processed_ids: 10_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 1000,
            min_relationship_strength: 0.3,
        }
    }
}

const KEYS: &[&str] = &[
    "ingestion.max_retries",
    "ingestion.retry_backoff_secs",
    "ingestion.health_check_interval_secs",
    "ingestion.stale_sync_threshold_secs",
    "ingestion.fetch_limit",
    "ingestion.initial_backfill_hours",
    "ingestion.dedup_window_hours",
    "ingestion.max_processed_ids",
    "ingestion.shutdown_timeout_secs",
    "processing.batch_size",
    "processing.max_retries",
    "processing.retry_delay_ms",
    "processing.min_relationship_strength",
];

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid value for {}: {}", key, value))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = match env::var("RATIONALE_CONFIG_DIR") {
            Ok(custom_dir) => PathBuf::from(custom_dir),
            Err(_) => dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("rationale"),
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default path, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let ingestion = &self.ingestion;
        if ingestion.max_retries == 0 {
            return Err(anyhow!("ingestion.max_retries must be at least 1"));
        }
        if ingestion.health_check_interval_secs == 0 {
            return Err(anyhow!("ingestion.health_check_interval_secs must be positive"));
        }
        if ingestion.fetch_limit == 0 {
            return Err(anyhow!("ingestion.fetch_limit must be positive"));
        }
        if ingestion.max_processed_ids == 0 {
            return Err(anyhow!("ingestion.max_processed_ids must be positive"));
        }

        let processing = &self.processing;
        if processing.batch_size == 0 {
            return Err(anyhow!("processing.batch_size must be positive"));
        }
        if processing.max_retries == 0 {
            return Err(anyhow!("processing.max_retries must be at least 1"));
        }
        if !(0.0..=1.0).contains(&processing.min_relationship_strength) {
            return Err(anyhow!(
                "processing.min_relationship_strength must be between 0.0 and 1.0"
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let i = &self.ingestion;
        let p = &self.processing;
        let value = match key {
            "ingestion.max_retries" => i.max_retries.to_string(),
            "ingestion.retry_backoff_secs" => i.retry_backoff_secs.to_string(),
            "ingestion.health_check_interval_secs" => i.health_check_interval_secs.to_string(),
            "ingestion.stale_sync_threshold_secs" => i.stale_sync_threshold_secs.to_string(),
            "ingestion.fetch_limit" => i.fetch_limit.to_string(),
            "ingestion.initial_backfill_hours" => i.initial_backfill_hours.to_string(),
            "ingestion.dedup_window_hours" => i.dedup_window_hours.to_string(),
            "ingestion.max_processed_ids" => i.max_processed_ids.to_string(),
            "ingestion.shutdown_timeout_secs" => i.shutdown_timeout_secs.to_string(),

            "processing.batch_size" => p.batch_size.to_string(),
            "processing.max_retries" => p.max_retries.to_string(),
            "processing.retry_delay_ms" => p.retry_delay_ms.to_string(),
            "processing.min_relationship_strength" => p.min_relationship_strength.to_string(),

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `rationale config list` to see available keys.",
                    key
                ));
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key
    ///
    /// The whole configuration is validated after the change; an invalid
    /// value leaves it untouched.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        let i = &mut updated.ingestion;
        let p = &mut updated.processing;
        match key {
            "ingestion.max_retries" => i.max_retries = parse(key, value)?,
            "ingestion.retry_backoff_secs" => i.retry_backoff_secs = parse(key, value)?,
            "ingestion.health_check_interval_secs" => {
                i.health_check_interval_secs = parse(key, value)?
            }
            "ingestion.stale_sync_threshold_secs" => {
                i.stale_sync_threshold_secs = parse(key, value)?
            }
            "ingestion.fetch_limit" => i.fetch_limit = parse(key, value)?,
            "ingestion.initial_backfill_hours" => i.initial_backfill_hours = parse(key, value)?,
            "ingestion.dedup_window_hours" => i.dedup_window_hours = parse(key, value)?,
            "ingestion.max_processed_ids" => i.max_processed_ids = parse(key, value)?,
            "ingestion.shutdown_timeout_secs" => i.shutdown_timeout_secs = parse(key, value)?,

            "processing.batch_size" => p.batch_size = parse(key, value)?,
            "processing.max_retries" => p.max_retries = parse(key, value)?,
            "processing.retry_delay_ms" => p.retry_delay_ms = parse(key, value)?,
            "processing.min_relationship_strength" => {
                p.min_relationship_strength = parse(key, value)?
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `rationale config list` to see available keys.",
                    key
                ));
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults by removing the config file
    pub fn reset() -> anyhow::Result<()> {
        Self::reset_at(&Self::config_path()?)
    }

    /// Remove the config file at `path`, if any
    pub fn reset_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            dedup_window: chrono::Duration::hours(i64::from(self.ingestion.dedup_window_hours)),
            max_processed_ids: self.ingestion.max_processed_ids,
            initial_backfill: chrono::Duration::hours(i64::from(
                self.ingestion.initial_backfill_hours,
            )),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let i = &self.ingestion;
        OrchestratorConfig {
            max_retries: i.max_retries,
            retry_backoff: Duration::from_secs(i.retry_backoff_secs),
            health_check_interval: Duration::from_secs(i.health_check_interval_secs),
            stale_sync_threshold: Duration::from_secs(i.stale_sync_threshold_secs),
            fetch_limit: i.fetch_limit,
            shutdown_timeout: Duration::from_secs(i.shutdown_timeout_secs),
            checkpoint: self.checkpoint_policy(),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        let p = &self.processing;
        ProcessorConfig {
            batch_size: p.batch_size,
            max_retries: p.max_retries,
            retry_delay: Duration::from_millis(p.retry_delay_ms),
            min_relationship_strength: p.min_relationship_strength,
        }
    }
}
