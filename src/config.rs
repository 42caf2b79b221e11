use std::collections::HashSet;
use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::normalizer::default_abbreviations;
use crate::strategy::StrategyName;

const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_USER_AGENT: &str = "merchant_mapper_app";
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 70;
pub const MAX_IN_FLIGHT: usize = 4;
/// Smallest spacing allowed between two backend calls. Public geocoders
/// such as Nominatim allow at most one request per second.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_base_url: String,
    pub geocoder_user_agent: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub min_request_interval_ms: u64,
    pub max_in_flight: usize,
    pub fuzzy_threshold: u8,
    pub cache_capacity: Option<usize>,
    pub preflight: bool,
}

/// Knobs consumed by the resolution pipeline itself.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_jitter: Duration,
    pub request_timeout: Duration,
    pub min_request_interval: Duration,
    pub max_in_flight: usize,
    pub fuzzy_threshold: u8,
    /// How often a city must appear in the batch to join the correction
    /// vocabulary. With the default of 2, a city seen only once can be
    /// snapped to a more frequent similar spelling; 1 keeps every observed
    /// city as-is.
    pub min_city_support: usize,
    pub reference_cities: Vec<String>,
    pub strategy_ladder: Vec<StrategyName>,
    pub abbreviations: Vec<(String, String)>,
    pub cache_capacity: Option<usize>,
    pub preflight: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicResolverProfile {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub min_request_interval_ms: u64,
    pub max_in_flight: usize,
    pub fuzzy_threshold: u8,
    pub min_city_support: usize,
    pub reference_cities: usize,
    pub strategy_ladder: Vec<StrategyName>,
    pub abbreviation_rules: usize,
    pub cache_capacity: Option<usize>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            retry_jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            min_request_interval: MIN_REQUEST_INTERVAL,
            max_in_flight: 1,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            min_city_support: 2,
            reference_cities: Vec::new(),
            strategy_ladder: StrategyName::default_ladder(),
            abbreviations: default_abbreviations(),
            cache_capacity: None,
            preflight: true,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.max_retries == 0 {
            return Err(AppError::Config("max_retries must be at least 1".into()));
        }
        if self.fuzzy_threshold > 100 {
            return Err(AppError::Config(format!(
                "fuzzy_threshold must be within 0..=100, got {}",
                self.fuzzy_threshold
            )));
        }
        if self.min_request_interval < MIN_REQUEST_INTERVAL {
            return Err(AppError::Config(format!(
                "min_request_interval must be at least {}ms, got {}ms",
                MIN_REQUEST_INTERVAL.as_millis(),
                self.min_request_interval.as_millis()
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(AppError::Config("request_timeout must be non-zero".into()));
        }
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT {
            return Err(AppError::Config(format!(
                "max_in_flight must be within 1..={MAX_IN_FLIGHT}, got {}",
                self.max_in_flight
            )));
        }
        if self.strategy_ladder.is_empty() {
            return Err(AppError::Config("strategy_ladder must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.strategy_ladder {
            if !seen.insert(*name) {
                return Err(AppError::Config(format!(
                    "strategy `{name}` appears more than once in the ladder"
                )));
            }
        }
        if let Some(0) = self.cache_capacity {
            return Err(AppError::Config("cache_capacity must be non-zero".into()));
        }
        Ok(())
    }

    pub fn public_profile(&self) -> PublicResolverProfile {
        PublicResolverProfile {
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay.as_millis() as u64,
            request_timeout_ms: self.request_timeout.as_millis() as u64,
            min_request_interval_ms: self.min_request_interval.as_millis() as u64,
            max_in_flight: self.max_in_flight,
            fuzzy_threshold: self.fuzzy_threshold,
            min_city_support: self.min_city_support,
            reference_cities: self.reference_cities.len(),
            strategy_ladder: self.strategy_ladder.clone(),
            abbreviation_rules: self.abbreviations.len(),
            cache_capacity: self.cache_capacity,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = ResolverConfig::default();
        Self {
            geocoder_base_url: env::var("GEOCODER_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            max_retries: parse_u32("GEOCODER_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: parse_u64(
                "GEOCODER_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            ),
            request_timeout_ms: parse_u64(
                "GEOCODER_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            ),
            min_request_interval_ms: parse_u64(
                "GEOCODER_MIN_INTERVAL_MS",
                defaults.min_request_interval.as_millis() as u64,
            ),
            max_in_flight: parse_usize("GEOCODER_MAX_IN_FLIGHT", defaults.max_in_flight),
            fuzzy_threshold: parse_u32("FUZZY_THRESHOLD", u32::from(defaults.fuzzy_threshold))
                .min(100) as u8,
            cache_capacity: env::var("RESOLUTION_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0),
            preflight: parse_bool("GEOCODER_PREFLIGHT", defaults.preflight),
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            max_in_flight: self.max_in_flight,
            fuzzy_threshold: self.fuzzy_threshold,
            cache_capacity: self.cache_capacity,
            preflight: self.preflight,
            ..ResolverConfig::default()
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
