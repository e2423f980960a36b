pub mod cache;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod format;
pub mod matcher;
pub mod models;
pub mod places;
pub mod tih;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{JsonFileCache, PlaceCache, SqliteCache};
use crate::config::{AppConfig, CacheBackend, PublicAppConfig};
use crate::enrichment::{HiddenGemSearch, RatingPolicy, SearchParams};
use crate::tih::{DatasetCache, DatasetSource, TihClient};

pub use crate::enrichment::{SearchOutcome, SearchStats};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{AttractionRecord, PlacesCandidate};
pub use crate::places::PlacesResolver;

/// Dataset search, place resolution and caching wired together from one
/// configuration.
pub struct HiddenGemService {
    config: AppConfig,
    resolver: Arc<PlacesResolver>,
    datasets: DatasetCache,
    search: HiddenGemSearch,
}

impl HiddenGemService {
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let source: Arc<dyn DatasetSource> = Arc::new(TihClient::from_config(&config)?);
        Self::with_source(config, source)
    }

    /// Uses `source` in place of the live dataset API.
    pub fn with_source(config: AppConfig, source: Arc<dyn DatasetSource>) -> AppResult<Self> {
        let cache = open_cache(&config)?;
        let resolver = Arc::new(places::resolver_from_config(&config, cache)?);
        let datasets = DatasetCache::new(
            Arc::clone(&source),
            config.dataset_cache_file.clone(),
            config.dataset_cache_ttl_secs,
        );
        let search = HiddenGemSearch::new(
            source,
            Arc::clone(&resolver),
            RatingPolicy::from_config(&config),
            config.search_date_buffer_days,
        );
        info!(
            backend = ?config.cache_backend,
            live_places = resolver.has_provider(),
            "hidden gem service ready"
        );
        Ok(Self {
            config,
            resolver,
            datasets,
            search,
        })
    }

    /// Search parameters pre-filled with the configured page size and target.
    pub fn params(&self, datasets: Vec<String>, keywords: Vec<String>) -> SearchParams {
        let mut params = SearchParams::new(datasets, keywords);
        params.page_size = self.config.search_page_size;
        params.target_count = self.config.search_target_count;
        params
    }

    pub async fn search(&self, params: &SearchParams) -> AppResult<SearchOutcome> {
        self.search.search(params).await
    }

    pub async fn datasets(&self) -> AppResult<Vec<String>> {
        self.datasets.get_datasets().await
    }

    pub fn resolver(&self) -> &PlacesResolver {
        &self.resolver
    }

    pub fn profile(&self) -> PublicAppConfig {
        self.config.public_profile()
    }
}

fn open_cache(config: &AppConfig) -> AppResult<Box<dyn PlaceCache>> {
    let radius = config.cache_proximity_km;
    Ok(match config.cache_backend {
        CacheBackend::Json => Box::new(JsonFileCache::new(
            config.places_cache_file.clone(),
            config.places_cache_requests_file.clone(),
            radius,
        )),
        CacheBackend::Sqlite => Box::new(SqliteCache::open(&config.cache_database_file, radius)?),
    })
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hidden_gems=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
