use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::PlacesCandidate;

use super::{cached_at_now, is_nearby, request_fingerprint, CacheWrite, PlaceCache};

#[derive(Default, Deserialize)]
struct StoreFile {
    #[serde(default)]
    cache_data: Vec<PlacesCandidate>,
    #[serde(default)]
    cache_requests: Vec<String>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    cache_data: &'a [PlacesCandidate],
}

#[derive(Default, Deserialize)]
struct RequestsFile {
    #[serde(default)]
    cache_requests: Vec<String>,
}

#[derive(Serialize)]
struct RequestsFileRef<'a> {
    cache_requests: &'a BTreeSet<String>,
}

/// Cache persisted as two JSON documents, rewritten wholesale on every change.
///
/// Without a requests path the seen-set lives in memory only.
pub struct JsonFileCache {
    path: PathBuf,
    requests_path: Option<PathBuf>,
    radius_km: f64,
    candidates: Vec<PlacesCandidate>,
    index: HashMap<String, usize>,
    requests: BTreeSet<String>,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>, requests_path: Option<PathBuf>, radius_km: f64) -> Self {
        Self {
            path: path.into(),
            requests_path,
            radius_km,
            candidates: Vec::new(),
            index: HashMap::new(),
            requests: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn candidates(&self) -> &[PlacesCandidate] {
        &self.candidates
    }

    fn persist_store(&self) -> AppResult<()> {
        write_json(
            &self.path,
            &StoreFileRef {
                cache_data: &self.candidates,
            },
        )
    }

    fn persist_requests(&self) -> AppResult<()> {
        let Some(path) = &self.requests_path else {
            return Ok(());
        };
        write_json(
            path,
            &RequestsFileRef {
                cache_requests: &self.requests,
            },
        )
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .candidates
            .iter()
            .enumerate()
            .map(|(position, candidate)| (candidate.reference.clone(), position))
            .collect();
    }
}

impl PlaceCache for JsonFileCache {
    fn load(&mut self) -> AppResult<()> {
        let store: StoreFile = read_json(&self.path)?.unwrap_or_default();
        self.candidates = store.cache_data;
        self.rebuild_index();
        self.requests = store.cache_requests.into_iter().collect();

        if let Some(path) = &self.requests_path {
            let requests: RequestsFile = read_json(path)?.unwrap_or_default();
            self.requests.extend(requests.cache_requests);
        }

        info!(
            target: "places_cache",
            candidates = self.candidates.len(),
            requests = self.requests.len(),
            "cache loaded"
        );
        Ok(())
    }

    fn has_seen(&self, lat: f64, lng: f64) -> AppResult<bool> {
        Ok(self.requests.contains(&request_fingerprint(lat, lng)))
    }

    fn mark_seen(&mut self, lat: f64, lng: f64) -> AppResult<()> {
        if self.requests.insert(request_fingerprint(lat, lng)) {
            self.persist_requests()?;
        }
        Ok(())
    }

    fn query_nearby(&self, lat: f64, lng: f64) -> AppResult<Vec<PlacesCandidate>> {
        let nearby: Vec<PlacesCandidate> = self
            .candidates
            .iter()
            .filter(|candidate| is_nearby(candidate, lat, lng, self.radius_km))
            .cloned()
            .collect();
        debug!(target: "places_cache", lat, lng, hits = nearby.len(), "nearby lookup");
        Ok(nearby)
    }

    fn upsert(&mut self, candidates: &[PlacesCandidate]) -> AppResult<CacheWrite> {
        let mut write = CacheWrite::default();
        for candidate in candidates {
            match self.index.get(&candidate.reference) {
                Some(&position) => {
                    self.candidates[position] = candidate.clone();
                    write.replaced += 1;
                }
                None => {
                    self.index
                        .insert(candidate.reference.clone(), self.candidates.len());
                    self.candidates.push(candidate.clone());
                    write.added += 1;
                }
            }
        }

        let stamp = cached_at_now();
        for stored in &mut self.candidates {
            stored.cached_at = Some(stamp.clone());
        }
        write.total = self.candidates.len();

        self.persist_store()?;
        info!(
            target: "places_cache",
            total = write.total,
            added = write.added,
            replaced = write.replaced,
            "write to cache"
        );
        Ok(write)
    }

    fn len(&self) -> AppResult<usize> {
        Ok(self.candidates.len())
    }
}

/// `Ok(None)` for a missing file. An unreadable document is logged and
/// treated as missing so a damaged cache never blocks a search.
fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> AppResult<Option<T>> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<T>(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(
                    target: "places_cache",
                    path = %path.display(),
                    error = ?err,
                    "failed to parse cache file; starting empty"
                );
                Ok(None)
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)?;
    Ok(())
}
