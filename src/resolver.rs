use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{future, stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResolutionCache};
use crate::config::{AppConfig, ResolverConfig};
use crate::errors::{AppError, AppResult, FailureKind, GeocodeFailure};
use crate::fuzzy::{correct, Vocabulary};
use crate::geocoder::{Coordinates, GeocodeClient, Geocoder, NominatimGeocoder};
use crate::ingestion::{records_from_batch, ColumnMapping, RawRecord, TabularBatch};
use crate::normalizer::AddressNormalizer;
use crate::strategy::{build_ladder, AddressFields, StrategyName};

pub type ProgressObserver = Arc<dyn Fn(ResolutionProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionProgress {
    pub total: usize,
    pub processed: usize,
    pub resolved: usize,
}

/// Observer that forwards progress into a channel for consumers that prefer
/// polling a receiver over a callback.
pub fn progress_channel() -> (ProgressObserver, mpsc::UnboundedReceiver<ResolutionProgress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer: ProgressObserver = Arc::new(move |progress| {
        let _ = tx.send(progress);
    });
    (observer, rx)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyName,
    pub query: String,
    pub calls: u32,
    pub cached: bool,
    pub failure: Option<GeocodeFailure>,
}

/// The single result attached to one input record. `failed` is set exactly
/// when `coordinates` is absent; build through [`ResolutionOutcome::resolved`]
/// or [`ResolutionOutcome::exhausted`] to keep that pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionOutcome {
    pub record_index: usize,
    pub coordinates: Option<Coordinates>,
    pub strategy_used: Option<StrategyName>,
    pub attempts: u32,
    pub failed: bool,
    pub tried: Vec<StrategyAttempt>,
}

impl ResolutionOutcome {
    pub fn resolved(
        record_index: usize,
        coordinates: Coordinates,
        strategy: StrategyName,
        tried: Vec<StrategyAttempt>,
    ) -> Self {
        Self {
            record_index,
            coordinates: Some(coordinates),
            strategy_used: Some(strategy),
            attempts: tried.len() as u32,
            failed: false,
            tried,
        }
    }

    pub fn exhausted(record_index: usize, tried: Vec<StrategyAttempt>) -> Self {
        Self {
            record_index,
            coordinates: None,
            strategy_used: None,
            attempts: tried.len() as u32,
            failed: true,
            tried,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub resolved: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub strategy_usage: BTreeMap<StrategyName, usize>,
    pub geocoder_calls: u64,
    pub cache: CacheStats,
}

impl BatchStats {
    fn summarize(
        total: usize,
        outcomes: &[ResolutionOutcome],
        cancelled: bool,
        geocoder_calls: u64,
        cache: CacheStats,
    ) -> Self {
        let mut strategy_usage = BTreeMap::new();
        for strategy in outcomes.iter().filter_map(|o| o.strategy_used) {
            *strategy_usage.entry(strategy).or_insert(0) += 1;
        }
        let resolved = outcomes.iter().filter(|o| !o.failed).count();
        Self {
            total,
            processed: outcomes.len(),
            resolved,
            failed: outcomes.len() - resolved,
            skipped: total - outcomes.len(),
            cancelled,
            strategy_usage,
            geocoder_calls,
            cache,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub records: Vec<RawRecord>,
    pub outcomes: Vec<ResolutionOutcome>,
    pub stats: BatchStats,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    /// Outcomes paired with the record they belong to. Outcomes are an
    /// in-order prefix of `records`, so the pairing is positional and does
    /// not depend on the caller's `RawRecord::index` values.
    pub fn rows(&self) -> impl Iterator<Item = (&RawRecord, &ResolutionOutcome)> {
        self.records.iter().zip(&self.outcomes)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResolutionOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.failed)
    }

    pub fn mapped_points(&self) -> Vec<(&RawRecord, Coordinates)> {
        self.rows()
            .filter_map(|(record, outcome)| Some((record, outcome.coordinates?)))
            .collect()
    }

    /// Bounding box of every resolved point, or `None` when nothing resolved.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut points = self.outcomes.iter().filter_map(|o| o.coordinates);
        let first = points.next()?;
        let seed = Bounds {
            min_latitude: first.latitude,
            max_latitude: first.latitude,
            min_longitude: first.longitude,
            max_longitude: first.longitude,
        };
        Some(points.fold(seed, |acc, point| Bounds {
            min_latitude: acc.min_latitude.min(point.latitude),
            max_latitude: acc.max_latitude.max(point.latitude),
            min_longitude: acc.min_longitude.min(point.longitude),
            max_longitude: acc.max_longitude.max(point.longitude),
        }))
    }
}

pub struct BatchResolver {
    client: GeocodeClient,
    normalizer: AddressNormalizer,
    config: ResolverConfig,
}

impl BatchResolver {
    pub fn new(backend: Arc<dyn Geocoder>, config: ResolverConfig) -> AppResult<Self> {
        let client = GeocodeClient::new(backend, &config);
        Self::with_client(client, config)
    }

    pub fn with_client(client: GeocodeClient, config: ResolverConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            client,
            normalizer: AddressNormalizer::new(config.abbreviations.clone()),
            config,
        })
    }

    pub fn from_app_config(config: &AppConfig) -> AppResult<Self> {
        let backend = NominatimGeocoder::from_config(config)?;
        Self::new(Arc::new(backend), config.resolver_config())
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve_batch(
        &self,
        batch: &TabularBatch,
        mapping: &ColumnMapping,
        observer: Option<ProgressObserver>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> AppResult<BatchReport> {
        let records = records_from_batch(batch, mapping)?;
        self.resolve_records(records, observer, cancel_flag).await
    }

    /// Resolves every record, never failing because of a single record. A
    /// raised cancel flag stops the run before the next record starts;
    /// finished outcomes are kept.
    pub async fn resolve_records(
        &self,
        records: Vec<RawRecord>,
        observer: Option<ProgressObserver>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> AppResult<BatchReport> {
        let started_at = Utc::now();
        let total = records.len();

        if self.config.preflight && total > 0 {
            self.client
                .preflight()
                .await
                .map_err(|err| AppError::BackendUnavailable(err.to_string()))?;
        }

        let cache = ResolutionCache::new(self.config.cache_capacity);
        let vocabulary = self.build_vocabulary(&records);
        let calls_before = self.client.calls();
        info!(
            total,
            vocabulary = vocabulary.len(),
            in_flight = self.config.max_in_flight,
            "starting batch resolution"
        );

        let processed = AtomicUsize::new(0);
        let resolved = AtomicUsize::new(0);
        let outcomes: Vec<ResolutionOutcome> = {
            let cache = &cache;
            let vocabulary = &vocabulary;
            let processed = &processed;
            let resolved = &resolved;
            let observer = observer.as_ref();
            let cancel_flag = cancel_flag.as_ref();
            stream::iter(records.iter())
                .map(|record| async move {
                    if is_cancelled(cancel_flag) {
                        return None;
                    }
                    let outcome = self.resolve_record(record, vocabulary, cache).await;
                    if !outcome.failed {
                        resolved.fetch_add(1, Ordering::SeqCst);
                    }
                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(callback) = observer {
                        callback(ResolutionProgress {
                            total,
                            processed: done,
                            resolved: resolved.load(Ordering::SeqCst),
                        });
                    }
                    Some(outcome)
                })
                .buffered(self.config.max_in_flight)
                .take_while(|outcome| future::ready(outcome.is_some()))
                .filter_map(future::ready)
                .collect()
                .await
        };

        let cancelled = outcomes.len() < total && is_cancelled(cancel_flag.as_ref());
        let stats = BatchStats::summarize(
            total,
            &outcomes,
            cancelled,
            self.client.calls() - calls_before,
            cache.stats(),
        );
        info!(
            resolved = stats.resolved,
            failed = stats.failed,
            skipped = stats.skipped,
            cancelled,
            geocoder_calls = stats.geocoder_calls,
            cache_hits = stats.cache.hits,
            "batch resolution finished"
        );

        Ok(BatchReport {
            records,
            outcomes,
            stats,
            started_at,
            completed_at: Utc::now(),
        })
    }

    fn build_vocabulary(&self, records: &[RawRecord]) -> Vocabulary {
        let observed = records
            .iter()
            .filter_map(|record| self.normalizer.normalize_field(record.city.as_deref()));
        let mut vocabulary = Vocabulary::from_observations(observed, self.config.min_city_support);
        vocabulary.extend(
            self.config
                .reference_cities
                .iter()
                .map(|city| self.normalizer.normalize(city)),
        );
        vocabulary
    }

    fn prepare_fields(&self, record: &RawRecord, vocabulary: &Vocabulary) -> AddressFields {
        let city = self
            .normalizer
            .normalize_field(record.city.as_deref())
            .map(|city| correct(&city, vocabulary, self.config.fuzzy_threshold));
        AddressFields::new(
            self.normalizer.normalize_field(record.address.as_deref()),
            city,
            self.normalizer.normalize_field(record.state.as_deref()),
            self.normalizer.normalize_field(record.postal_code.as_deref()),
        )
    }

    async fn resolve_record(
        &self,
        record: &RawRecord,
        vocabulary: &Vocabulary,
        cache: &ResolutionCache,
    ) -> ResolutionOutcome {
        let fields = self.prepare_fields(record, vocabulary);
        let mut tried = Vec::new();

        for (strategy, query) in build_ladder(&self.config.strategy_ladder, &fields) {
            let Some(query) = query else {
                continue;
            };
            debug!(record = record.index, %strategy, query = %query, "trying strategy");

            let client = &self.client;
            let text = query.as_str();
            let lookup = cache
                .get_or_resolve(text, move || client.resolve(text))
                .await;

            match lookup.result {
                Ok(coordinates) => {
                    tried.push(StrategyAttempt {
                        strategy,
                        query,
                        calls: lookup.calls,
                        cached: lookup.hit,
                        failure: None,
                    });
                    return ResolutionOutcome::resolved(record.index, coordinates, strategy, tried);
                }
                Err(failure) => {
                    match failure.kind() {
                        FailureKind::NegativeResult => {
                            debug!(record = record.index, %strategy, "no match; falling back")
                        }
                        FailureKind::Transient => warn!(
                            record = record.index,
                            %strategy,
                            ?failure,
                            "retries exhausted; falling back"
                        ),
                        FailureKind::Permanent => warn!(
                            record = record.index,
                            %strategy,
                            ?failure,
                            "query rejected; falling back"
                        ),
                    }
                    tried.push(StrategyAttempt {
                        strategy,
                        query,
                        calls: lookup.calls,
                        cached: lookup.hit,
                        failure: Some(failure),
                    });
                }
            }
        }

        debug!(record = record.index, attempts = tried.len(), "record exhausted");
        ResolutionOutcome::exhausted(record.index, tried)
    }
}

fn is_cancelled(flag: Option<&Arc<AtomicBool>>) -> bool {
    flag.map_or(false, |flag| flag.load(Ordering::SeqCst))
}
