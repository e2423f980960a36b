use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::cache::PlaceCache;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::matcher::{MatchTarget, MatchThresholds, PlaceMatcher};
use crate::models::PlacesCandidate;

pub const DEFAULT_SEARCH_RADIUS_M: u32 = 1000;
// A continuation token is rejected until the provider activates it.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_PAGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSearchRequest {
    pub query: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: u32,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSearchPage {
    pub results: Vec<PlacesCandidate>,
    pub next_page_token: Option<String>,
}

/// Live places-lookup provider.
#[async_trait]
pub trait PlaceLookup: Send + Sync {
    async fn text_search(&self, request: &TextSearchRequest) -> AppResult<TextSearchPage>;
}

/// Text search against the Google Places web service.
pub struct HttpPlacesClient {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

impl HttpPlacesClient {
    pub fn new(api_base: &str, api_key: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("hidden-gems/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// `None` when no API key is configured; the resolver then runs cache-only.
    pub fn maybe_new(config: &AppConfig) -> AppResult<Option<Self>> {
        match config.google_places_api_key.clone() {
            Some(key) => Ok(Some(Self::new(&config.google_places_api_base, key)?)),
            None => Ok(None),
        }
    }

    fn search_url(&self, request: &TextSearchRequest) -> AppResult<Url> {
        let mut url = Url::parse(&format!("{}/textsearch/json", self.api_base))
            .map_err(|err| AppError::Config(format!("invalid places api base: {err}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("query", &request.query)
                .append_pair("location", &format!("{},{}", request.lat, request.lng))
                .append_pair("radius", &request.radius_m.to_string())
                .append_pair("key", self.api_key.expose_secret());
            if let Some(token) = &request.page_token {
                pairs.append_pair("pagetoken", token);
            }
        }
        Ok(url)
    }
}

#[derive(Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    results: Vec<PlacesCandidate>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[async_trait]
impl PlaceLookup for HttpPlacesClient {
    async fn text_search(&self, request: &TextSearchRequest) -> AppResult<TextSearchPage> {
        let url = self.search_url(request)?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        let parsed: TextSearchResponse = response.json().await?;

        match parsed.status.as_deref() {
            None | Some("OK") | Some("ZERO_RESULTS") => {}
            Some(status) => {
                return Err(AppError::Upstream {
                    service: "places",
                    message: match parsed.error_message {
                        Some(message) => format!("{status}: {message}"),
                        None => status.to_string(),
                    },
                })
            }
        }

        Ok(TextSearchPage {
            results: parsed.results,
            next_page_token: parsed.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverOptions {
    pub search_radius_m: u32,
    pub page_delay: Duration,
    pub max_pages: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            page_delay: DEFAULT_PAGE_DELAY,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl ResolverOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            search_radius_m: config.places_search_radius_m,
            page_delay: Duration::from_millis(config.places_page_delay_ms),
            max_pages: config.places_max_pages.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Matched against candidates already in the cache.
    Cache,
    /// Coordinate was queried before and nothing nearby matched.
    SeenEmpty,
    /// No provider configured and nothing in the cache matched.
    CacheOnly,
    /// Fetched from the live provider.
    Provider,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub source: ResolutionSource,
    pub candidate: Option<PlacesCandidate>,
}

/// Resolves attraction records to provider places, consulting the cache
/// before the live provider.
pub struct PlacesResolver {
    cache: Mutex<Box<dyn PlaceCache>>,
    lookup: Option<Arc<dyn PlaceLookup>>,
    matcher: PlaceMatcher,
    options: ResolverOptions,
}

impl PlacesResolver {
    /// Loads the cache from storage before returning.
    pub fn new(
        mut cache: Box<dyn PlaceCache>,
        lookup: Option<Arc<dyn PlaceLookup>>,
        matcher: PlaceMatcher,
        options: ResolverOptions,
    ) -> AppResult<Self> {
        cache.load()?;
        if lookup.is_none() {
            info!("no places provider configured; resolving from cache only");
        }
        Ok(Self {
            cache: Mutex::new(cache),
            lookup,
            matcher,
            options,
        })
    }

    pub fn has_provider(&self) -> bool {
        self.lookup.is_some()
    }

    pub fn cached_candidates(&self) -> AppResult<usize> {
        self.cache.lock().len()
    }

    pub async fn find_place(
        &self,
        name: &str,
        block: &str,
        street: &str,
        lat: f64,
        lng: f64,
    ) -> AppResult<Option<PlacesCandidate>> {
        let target = MatchTarget::new(name, block, street);
        Ok(self.resolve(&target, lat, lng).await?.candidate)
    }

    pub async fn resolve(&self, target: &MatchTarget, lat: f64, lng: f64) -> AppResult<Resolution> {
        let (already_seen, nearby) = {
            let cache = self.cache.lock();
            (cache.has_seen(lat, lng)?, cache.query_nearby(lat, lng)?)
        };

        if let Some(found) = self.matcher.find_match(target, &nearby) {
            return Ok(Resolution {
                source: ResolutionSource::Cache,
                candidate: Some(found.clone()),
            });
        }

        if already_seen {
            return Ok(Resolution {
                source: ResolutionSource::SeenEmpty,
                candidate: None,
            });
        }

        let Some(lookup) = &self.lookup else {
            return Ok(Resolution {
                source: ResolutionSource::CacheOnly,
                candidate: None,
            });
        };

        debug!(name = target.name, lat, lng, "not found in cache; querying places provider");
        let fetched = self.collect_pages(lookup.as_ref(), &target.name, lat, lng).await?;

        {
            let mut cache = self.cache.lock();
            cache.upsert(&fetched)?;
            cache.mark_seen(lat, lng)?;
        }

        Ok(Resolution {
            source: ResolutionSource::Provider,
            candidate: self.matcher.find_match(target, &fetched).cloned(),
        })
    }

    async fn collect_pages(
        &self,
        lookup: &dyn PlaceLookup,
        query: &str,
        lat: f64,
        lng: f64,
    ) -> AppResult<Vec<PlacesCandidate>> {
        let mut request = TextSearchRequest {
            query: query.to_string(),
            lat,
            lng,
            radius_m: self.options.search_radius_m,
            page_token: None,
        };
        let mut collected = Vec::new();
        let mut pages = 0;

        loop {
            let page = lookup.text_search(&request).await?;
            pages += 1;
            collected.extend(page.results);

            let Some(token) = page.next_page_token else {
                break;
            };
            if pages >= self.options.max_pages {
                debug!(query, pages, "page limit reached; ignoring remaining provider pages");
                break;
            }
            sleep(self.options.page_delay).await;
            request.page_token = Some(token);
        }

        info!(query, pages, results = collected.len(), "places provider results collected");
        Ok(collected)
    }
}

/// Builds the cache-backed resolver described by `config`.
pub fn resolver_from_config(
    config: &AppConfig,
    cache: Box<dyn PlaceCache>,
) -> AppResult<PlacesResolver> {
    let lookup = HttpPlacesClient::maybe_new(config)?
        .map(|client| Arc::new(client) as Arc<dyn PlaceLookup>);
    let matcher = PlaceMatcher::new(MatchThresholds {
        name: config.match_name_threshold,
        street: config.match_street_threshold,
    });
    PlacesResolver::new(cache, lookup, matcher, ResolverOptions::from_config(config))
}
