//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! data_dir = "./data"
//! export_dir = "./export"
//!
//! [admission]
//! bucket_capacity = 10.0
//! refill_rate_per_sec = 0.5
//! daily_limit = 2000
//!
//! [orchestrator]
//! default_backfill_days = 30
//! max_parallel_properties = 4
//!
//! [[properties]]
//! property = "https://example.com/"
//! sources = ["search_performance"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use siphon_core::{PropertyKey, SourceType};
use siphon_ingest::admission::AdmissionConfig;
use siphon_ingest::orchestrator::{OrchestratorConfig, PropertyConfig};

/// Root of the pipeline configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory for the watermark and fact stores.
    pub data_dir: PathBuf,
    /// Directory holding the JSONL metric exports to replay.
    pub export_dir: PathBuf,
    /// Admission controller defaults.
    #[serde(default)]
    pub admission: AdmissionSettings,
    /// Orchestrator tuning.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Properties to sync.
    #[serde(default)]
    pub properties: Vec<PropertyEntry>,
}

/// Admission settings in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AdmissionSettings {
    /// Token bucket capacity per property.
    pub bucket_capacity: f64,
    /// Token refill rate per second.
    pub refill_rate_per_sec: f64,
    /// Daily call limit per property.
    pub daily_limit: u32,
    /// Base backoff delay in seconds.
    pub base_delay_secs: u64,
    /// Backoff delay cap in seconds.
    pub max_delay_secs: u64,
    /// Jitter as a fraction of the backoff delay.
    pub jitter_fraction: f64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        let defaults = AdmissionConfig::default();
        Self {
            bucket_capacity: defaults.bucket_capacity,
            refill_rate_per_sec: defaults.refill_rate_per_sec,
            daily_limit: defaults.daily_limit,
            base_delay_secs: defaults.base_delay.as_secs(),
            max_delay_secs: defaults.max_delay.as_secs(),
            jitter_fraction: defaults.jitter_fraction,
        }
    }
}

impl AdmissionSettings {
    /// Converts into the engine's admission config.
    #[must_use]
    pub fn to_admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            bucket_capacity: self.bucket_capacity,
            refill_rate_per_sec: self.refill_rate_per_sec,
            daily_limit: self.daily_limit,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            jitter_fraction: self.jitter_fraction,
        }
    }
}

/// Orchestrator settings in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OrchestratorSettings {
    /// Days to backfill for a never-synced pair.
    pub default_backfill_days: u32,
    /// Maximum concurrently syncing units.
    pub max_parallel_properties: usize,
    /// Admission wait retries before giving up on a unit.
    pub max_admission_retries: u32,
    /// Remote fetch attempts per page.
    pub max_fetch_retries: u32,
    /// Window for reconcile runs, in days.
    pub reconcile_window_days: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            default_backfill_days: defaults.default_backfill_days,
            max_parallel_properties: defaults.max_parallel_properties,
            max_admission_retries: defaults.max_admission_retries,
            max_fetch_retries: defaults.max_fetch_retries,
            reconcile_window_days: defaults.reconcile_window_days,
        }
    }
}

impl OrchestratorSettings {
    /// Converts into the engine's orchestrator config.
    #[must_use]
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_backfill_days: self.default_backfill_days,
            max_parallel_properties: self.max_parallel_properties,
            max_admission_retries: self.max_admission_retries,
            max_fetch_retries: self.max_fetch_retries,
            reconcile_window_days: self.reconcile_window_days,
        }
    }
}

/// One configured property and its sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyEntry {
    /// The property key (e.g. a site URL).
    pub property: String,
    /// Sources to sync for this property.
    pub sources: Vec<SourceType>,
}

impl PipelineConfig {
    /// Loads and parses the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Validates the configured properties into engine configs.
    ///
    /// # Errors
    ///
    /// Returns an error if a property key is empty or a source list is.
    pub fn property_configs(&self) -> Result<Vec<PropertyConfig>> {
        self.properties
            .iter()
            .map(|entry| {
                let property = PropertyKey::new(entry.property.clone())
                    .with_context(|| format!("invalid property {:?}", entry.property))?;
                anyhow::ensure!(
                    !entry.sources.is_empty(),
                    "property {:?} has no sources configured",
                    entry.property
                );
                Ok(PropertyConfig::new(property, entry.sources.clone()))
            })
            .collect()
    }
}
