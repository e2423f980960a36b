//! Client for the tourism information hub (TIH) content API and the
//! time-boxed cache of its dataset categories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{AttractionRecord, CACHED_AT_FORMAT};

const DATE_FORMAT: &str = "%Y-%m-%d";
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// One page request against the multi-dataset search endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub datasets: Vec<String>,
    pub keywords: Vec<String>,
    pub limit: usize,
    pub offset: usize,
    /// Only sent for event datasets; other datasets return nothing when
    /// a date range is present.
    pub date_window: Option<(NaiveDate, NaiveDate)>,
}

impl SearchQuery {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("dataset", self.datasets.join(", ")),
            ("distinct", "Yes".to_string()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("keyword", self.keywords.join(", ")),
        ];
        if let Some((start, end)) = self.date_window {
            pairs.push(("startDate", start.format(DATE_FORMAT).to_string()));
            pairs.push(("endDate", end.format(DATE_FORMAT).to_string()));
        }
        pairs
    }
}

#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> AppResult<Vec<AttractionRecord>>;

    async fn dataset_names(&self) -> AppResult<Vec<String>>;
}

pub struct TihClient {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl TihClient {
    pub fn new(api_base: &str, api_key: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(15))
            .user_agent(concat!("hidden-gems/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let key = config
            .tih_api_key
            .clone()
            .ok_or_else(|| AppError::Config("TIH_API_KEY is not set".into()))?;
        Self::new(&config.tih_api_base, key)
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        Url::parse(&format!("{}/{path}", self.api_base))
            .map_err(|err| AppError::Config(format!("invalid TIH api base: {err}")))
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("X-API-Key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl DatasetSource for TihClient {
    async fn search(&self, query: &SearchQuery) -> AppResult<Vec<AttractionRecord>> {
        let url = self.endpoint("search")?;
        let response = self
            .get(url)
            .header("X-Content-Language", "en")
            .query(&query.query_pairs())
            .send()
            .await?
            .error_for_status()?;
        let envelope: DataEnvelope<AttractionRecord> = response.json().await?;
        Ok(envelope.data)
    }

    async fn dataset_names(&self) -> AppResult<Vec<String>> {
        let url = self.endpoint("datasets")?;
        let response = self.get(url).send().await?.error_for_status()?;
        let envelope: DataEnvelope<String> = response.json().await?;
        Ok(envelope.data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetFile {
    #[serde(default)]
    cache_data: Vec<String>,
    #[serde(rename = "cachedAt", default)]
    cached_at: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedDatasets {
    names: Vec<String>,
    fetched_at: NaiveDateTime,
}

/// Dataset category list, refetched once it is older than the TTL.
pub struct DatasetCache {
    source: Arc<dyn DatasetSource>,
    path: Option<PathBuf>,
    ttl: Duration,
    state: Mutex<Option<CachedDatasets>>,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn DatasetSource>, path: Option<PathBuf>, ttl_secs: u64) -> Self {
        let state = path.as_deref().and_then(read_dataset_file);
        Self {
            source,
            path,
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            state: Mutex::new(state),
        }
    }

    pub async fn get_datasets(&self) -> AppResult<Vec<String>> {
        let now = Local::now().naive_local();
        if let Some(cached) = self.state.lock().as_ref() {
            if now - cached.fetched_at <= self.ttl {
                return Ok(cached.names.clone());
            }
        }

        let names = self.source.dataset_names().await?;
        let cached = CachedDatasets {
            names: names.clone(),
            fetched_at: now,
        };
        if let Some(path) = &self.path {
            write_dataset_file(path, &cached)?;
        }
        *self.state.lock() = Some(cached);
        info!(target: "dataset_cache", count = names.len(), "dataset cache refreshed");
        Ok(names)
    }

    pub fn invalidate(&self) {
        *self.state.lock() = None;
    }
}

fn read_dataset_file(path: &Path) -> Option<CachedDatasets> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(target: "dataset_cache", error = ?err, "failed to read dataset cache");
            return None;
        }
    };
    let file: DatasetFile = match serde_json::from_str(&contents) {
        Ok(file) => file,
        Err(err) => {
            warn!(target: "dataset_cache", error = ?err, "failed to parse dataset cache");
            return None;
        }
    };
    let fetched_at = match parse_cached_at(file.cached_at.as_deref()?) {
        Ok(fetched_at) => fetched_at,
        Err(err) => {
            warn!(target: "dataset_cache", error = %err, "ignoring dataset cache");
            return None;
        }
    };
    Some(CachedDatasets {
        names: file.cache_data,
        fetched_at,
    })
}

fn parse_cached_at(value: &str) -> AppResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), CACHED_AT_FORMAT)
        .map_err(|err| AppError::Parse(format!("invalid cachedAt {value:?}: {err}")))
}

fn write_dataset_file(path: &Path, cached: &CachedDatasets) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = DatasetFile {
        cache_data: cached.names.clone(),
        cached_at: Some(cached.fetched_at.format(CACHED_AT_FORMAT).to_string()),
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}
