use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{ResolverConfig, MAX_IN_FLIGHT, MIN_REQUEST_INTERVAL};
use crate::errors::{AppError, AppResult};
use crate::strategy::StrategyName;

/// Optional resolver overrides persisted as JSON next to the caller's data.
/// Absent fields keep whatever the environment configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_request_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_city_support: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_cities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_ladder: Option<Vec<StrategyName>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviations: Option<Vec<(String, String)>>,
}

impl ResolverSettings {
    pub fn load(path: &Path) -> AppResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(settings) => Ok(settings),
                Err(err) => {
                    warn!(
                        target: "settings",
                        error = ?err,
                        "failed to parse settings file; regenerating defaults"
                    );
                    let defaults = Self::default();
                    defaults.persist(path)?;
                    Ok(defaults)
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    pub fn persist(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Applies the overrides, clamping numeric knobs into their safe ranges.
    pub fn apply_to(&self, config: &mut ResolverConfig) {
        if let Some(retries) = self.max_retries {
            config.max_retries = retries.max(1);
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = self.min_request_interval_ms {
            config.min_request_interval = Duration::from_millis(ms).max(MIN_REQUEST_INTERVAL);
        }
        if let Some(in_flight) = self.max_in_flight {
            config.max_in_flight = in_flight.clamp(1, MAX_IN_FLIGHT);
        }
        if let Some(threshold) = self.fuzzy_threshold {
            config.fuzzy_threshold = threshold.min(100);
        }
        if let Some(support) = self.min_city_support {
            config.min_city_support = support.max(1);
        }
        if let Some(cities) = &self.reference_cities {
            config.reference_cities = cities.clone();
        }
        if let Some(ladder) = &self.strategy_ladder {
            config.strategy_ladder = ladder.clone();
        }
        if let Some(rules) = &self.abbreviations {
            config.abbreviations = rules.clone();
        }
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("resolver-settings.json")
}
