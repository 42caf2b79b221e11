mod cache;
mod config;
mod errors;
mod fuzzy;
mod geocoder;
mod ingestion;
mod normalizer;
mod resolver;
mod settings;
mod strategy;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cache::{CacheEntry, CacheLookup, CacheStats, ResolutionCache};
pub use config::{AppConfig, PublicResolverProfile, ResolverConfig};
pub use errors::{AppError, AppResult, FailureKind, GeocodeFailure};
pub use fuzzy::{correct, similarity, Vocabulary};
pub use geocoder::{Coordinates, GeocodeClient, Geocoder, NominatimGeocoder, QueryResolution};
pub use ingestion::{records_from_batch, ColumnMapping, RawRecord, TabularBatch};
pub use normalizer::{default_abbreviations, AddressNormalizer};
pub use resolver::{
    progress_channel, BatchReport, BatchResolver, BatchStats, Bounds, ProgressObserver,
    ResolutionOutcome, ResolutionProgress, StrategyAttempt,
};
pub use settings::{settings_path, ResolverSettings};
pub use strategy::{build_ladder, AddressFields, StrategyName};

/// Installs the global tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,merchant_mapper=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
