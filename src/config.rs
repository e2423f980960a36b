use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_TIH_API_BASE: &str = "https://api.stb.gov.sg/content/common/v2";
const DEFAULT_PLACES_API_BASE: &str = "https://maps.googleapis.com/maps/api/place";

/// Upper bound for the event date widening, in days.
pub const MAX_DATE_BUFFER_DAYS: i64 = 365;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Json,
    Sqlite,
}

impl CacheBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(CacheBackend::Json),
            "sqlite" => Some(CacheBackend::Sqlite),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub tih_api_key: Option<SecretString>,
    pub tih_api_base: String,
    pub google_places_api_key: Option<SecretString>,
    pub google_places_api_base: String,
    pub cache_backend: CacheBackend,
    pub places_cache_file: PathBuf,
    pub places_cache_requests_file: Option<PathBuf>,
    pub cache_database_file: PathBuf,
    pub dataset_cache_file: Option<PathBuf>,
    pub dataset_cache_ttl_secs: u64,
    pub places_search_radius_m: u32,
    pub cache_proximity_km: f64,
    pub places_page_delay_ms: u64,
    pub places_max_pages: usize,
    pub match_name_threshold: f64,
    pub match_street_threshold: f64,
    pub search_page_size: usize,
    pub search_target_count: usize,
    pub search_date_buffer_days: i64,
    pub min_rating: f64,
    pub max_rating_count: u64,
    pub hidden_rating_count: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub tih_api_base: String,
    pub google_places_api_base: String,
    pub cache_backend: CacheBackend,
    pub places_cache_file: String,
    pub dataset_cache_ttl_secs: u64,
    pub places_search_radius_m: u32,
    pub cache_proximity_km: f64,
    pub search_page_size: usize,
    pub search_target_count: usize,
    pub has_tih_key: bool,
    pub has_google_places_key: bool,
}

impl Default for AppConfig {
    /// Built-in defaults with no API keys and no environment lookups.
    fn default() -> Self {
        Self {
            tih_api_key: None,
            tih_api_base: DEFAULT_TIH_API_BASE.to_string(),
            google_places_api_key: None,
            google_places_api_base: DEFAULT_PLACES_API_BASE.to_string(),
            cache_backend: CacheBackend::Json,
            places_cache_file: PathBuf::from("places_cache.json"),
            places_cache_requests_file: Some(PathBuf::from("places_cache_requests.json")),
            cache_database_file: PathBuf::from("places_cache.db"),
            dataset_cache_file: Some(PathBuf::from("datasets_cache.json")),
            dataset_cache_ttl_secs: 300,
            places_search_radius_m: 1000,
            cache_proximity_km: 1.0,
            places_page_delay_ms: 2_000,
            places_max_pages: 3,
            match_name_threshold: 0.5,
            match_street_threshold: 0.8,
            search_page_size: 50,
            search_target_count: 25,
            search_date_buffer_days: 5,
            min_rating: 3.0,
            max_rating_count: 500,
            hidden_rating_count: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            tih_api_key: parse_secret("TIH_API_KEY"),
            tih_api_base: env::var("TIH_API_BASE").unwrap_or(defaults.tih_api_base),
            google_places_api_key: parse_secret("GOOGLE_PLACES_API_KEY"),
            google_places_api_base: env::var("GOOGLE_PLACES_API_BASE")
                .unwrap_or(defaults.google_places_api_base),
            cache_backend: env::var("CACHE_BACKEND")
                .ok()
                .and_then(|v| CacheBackend::parse(&v))
                .unwrap_or(defaults.cache_backend),
            places_cache_file: parse_path("PLACES_CACHE_FILE", Some(defaults.places_cache_file.clone()))
                .unwrap_or(defaults.places_cache_file),
            places_cache_requests_file: parse_path(
                "PLACES_CACHE_REQUESTS_FILE",
                defaults.places_cache_requests_file,
            ),
            cache_database_file: parse_path(
                "CACHE_DATABASE_FILE",
                Some(defaults.cache_database_file.clone()),
            )
            .unwrap_or(defaults.cache_database_file),
            dataset_cache_file: parse_path("DATASET_CACHE_FILE", defaults.dataset_cache_file),
            dataset_cache_ttl_secs: parse_u64("DATASET_CACHE_TTL_SECS", defaults.dataset_cache_ttl_secs),
            places_search_radius_m: parse_u32("PLACES_SEARCH_RADIUS_M", defaults.places_search_radius_m),
            cache_proximity_km: parse_f64("CACHE_PROXIMITY_KM", defaults.cache_proximity_km),
            places_page_delay_ms: parse_u64("PLACES_PAGE_DELAY_MS", defaults.places_page_delay_ms),
            places_max_pages: parse_usize("PLACES_MAX_PAGES", defaults.places_max_pages).max(1),
            match_name_threshold: parse_f64("MATCH_NAME_THRESHOLD", defaults.match_name_threshold),
            match_street_threshold: parse_f64(
                "MATCH_STREET_THRESHOLD",
                defaults.match_street_threshold,
            ),
            search_page_size: parse_usize("SEARCH_PAGE_SIZE", defaults.search_page_size).max(1),
            search_target_count: parse_usize("SEARCH_TARGET_COUNT", defaults.search_target_count),
            search_date_buffer_days: parse_i64(
                "SEARCH_DATE_BUFFER_DAYS",
                defaults.search_date_buffer_days,
            )
            .clamp(0, MAX_DATE_BUFFER_DAYS),
            min_rating: parse_f64("MIN_RATING", defaults.min_rating),
            max_rating_count: parse_u64("MAX_RATING_COUNT", defaults.max_rating_count),
            hidden_rating_count: parse_u64("HIDDEN_RATING_COUNT", defaults.hidden_rating_count),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            tih_api_base: self.tih_api_base.clone(),
            google_places_api_base: self.google_places_api_base.clone(),
            cache_backend: self.cache_backend,
            places_cache_file: self.places_cache_file.to_string_lossy().to_string(),
            dataset_cache_ttl_secs: self.dataset_cache_ttl_secs,
            places_search_radius_m: self.places_search_radius_m,
            cache_proximity_km: self.cache_proximity_km,
            search_page_size: self.search_page_size,
            search_target_count: self.search_target_count,
            has_tih_key: self.tih_api_key.is_some(),
            has_google_places_key: self.google_places_api_key.is_some(),
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

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

/// An explicitly empty value disables the file.
fn parse_path(key: &str, default: Option<PathBuf>) -> Option<PathBuf> {
    match env::var(key) {
        Ok(value) if value.trim().is_empty() => None,
        Ok(value) => Some(PathBuf::from(value)),
        Err(_) => default,
    }
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

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
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

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
