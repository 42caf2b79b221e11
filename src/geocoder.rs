use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::{AppConfig, ResolverConfig};
use crate::errors::{AppResult, GeocodeFailure};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// The external geocoding capability: one query string in, coordinates or a
/// classified failure out.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str, timeout: Duration)
        -> Result<Coordinates, GeocodeFailure>;

    async fn health_check(&self, _timeout: Duration) -> Result<(), GeocodeFailure> {
        Ok(())
    }
}

/// Result of resolving one query string, including how many backend calls
/// it took.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResolution {
    pub result: Result<Coordinates, GeocodeFailure>,
    pub calls: u32,
}

pub struct GeocodeClient {
    backend: Arc<dyn Geocoder>,
    rate_limiter: RateLimiter,
    max_retries: u32,
    retry_delay: Duration,
    retry_jitter: Duration,
    request_timeout: Duration,
    jitter_rng: Mutex<StdRng>,
    calls: AtomicU64,
}

impl GeocodeClient {
    pub fn new(backend: Arc<dyn Geocoder>, config: &ResolverConfig) -> Self {
        Self::with_rng(backend, config, StdRng::from_entropy())
    }

    pub fn with_rng(backend: Arc<dyn Geocoder>, config: &ResolverConfig, rng: StdRng) -> Self {
        Self {
            backend,
            rate_limiter: RateLimiter::new(config.min_request_interval),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            retry_jitter: config.retry_jitter,
            request_timeout: config.request_timeout,
            jitter_rng: Mutex::new(rng),
            calls: AtomicU64::new(0),
        }
    }

    /// Total backend calls issued through this client.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Probes the backend once per attempt, retrying transient failures under
    /// the same policy as queries.
    pub async fn preflight(&self) -> Result<(), GeocodeFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(
                self.request_timeout,
                self.backend.health_check(self.request_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GeocodeFailure::Timeout),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay();
                    warn!(
                        ?err,
                        attempt,
                        max_retries = self.max_retries,
                        "health check failed; retrying after {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Transient failures are retried after the configured delay; the backend
    /// is called at most `max_retries` times per query.
    pub async fn resolve(&self, query: &str) -> QueryResolution {
        if query.trim().is_empty() {
            return QueryResolution {
                result: Err(GeocodeFailure::Malformed("empty query".into())),
                calls: 0,
            };
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match timeout(
                self.request_timeout,
                self.backend.geocode(query, self.request_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GeocodeFailure::Timeout),
            };

            match result {
                Ok(coordinates) => {
                    return QueryResolution {
                        result: Ok(coordinates),
                        calls: attempt,
                    }
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay();
                    warn!(
                        ?err,
                        query,
                        attempt,
                        max_retries = self.max_retries,
                        "geocode failed; retrying after {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    debug!(?err, query, attempt, "geocode gave up on query");
                    return QueryResolution {
                        result: Err(err),
                        calls: attempt,
                    };
                }
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        let jitter_ms = self.retry_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.retry_delay;
        }
        let jitter = {
            let mut rng = self.jitter_rng.lock();
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        self.retry_delay + jitter
    }
}

/// Enforces a minimum spacing between consecutive backend calls across every
/// task sharing the client.
struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: AsyncMutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

/// HTTP backend speaking the Nominatim search API.
pub struct NominatimGeocoder {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: Value,
    lon: Value,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> AppResult<Self> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(config.geocoder_base_url.clone(), &config.geocoder_user_agent)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<Coordinates, GeocodeFailure> {
        let response = self
            .http
            .get(self.endpoint("search"))
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(response.status())?;

        let places: Vec<NominatimPlace> = response.json().await.map_err(classify_transport)?;
        let place = places.into_iter().next().ok_or(GeocodeFailure::NotFound)?;
        match (parse_degrees(&place.lat), parse_degrees(&place.lon)) {
            (Some(latitude), Some(longitude)) => Ok(Coordinates::new(latitude, longitude)),
            _ => Err(GeocodeFailure::Backend(format!(
                "unparseable coordinates lat={} lon={}",
                place.lat, place.lon
            ))),
        }
    }

    async fn health_check(&self, timeout: Duration) -> Result<(), GeocodeFailure> {
        let response = self
            .http
            .get(self.endpoint("status"))
            .query(&[("format", "json")])
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(response.status())
    }
}

fn check_status(status: StatusCode) -> Result<(), GeocodeFailure> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(GeocodeFailure::ServiceUnavailable(format!("status {status}")))
    } else if status.is_client_error() {
        Err(GeocodeFailure::Malformed(format!("status {status}")))
    } else {
        Err(GeocodeFailure::Backend(format!("status {status}")))
    }
}

fn classify_transport(err: reqwest::Error) -> GeocodeFailure {
    if err.is_timeout() {
        GeocodeFailure::Timeout
    } else if err.is_builder() {
        GeocodeFailure::Malformed(err.to_string())
    } else if err.is_connect() || err.is_request() {
        GeocodeFailure::ServiceUnavailable(err.to_string())
    } else {
        GeocodeFailure::Backend(err.to_string())
    }
}

fn parse_degrees(value: &Value) -> Option<f64> {
    match value {
        Value::String(text) => text.trim().parse().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    }
}
