//! Geographically scoped store of places-lookup results.
//!
//! Two things are tracked: the candidates themselves (deduplicated by the
//! provider `reference`) and a seen-set of coordinate fingerprints recording
//! which exact positions were already sent to the live provider.

mod json;
mod sqlite;

use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::AppResult;
use crate::models::{PlacesCandidate, CACHED_AT_FORMAT};

pub use json::JsonFileCache;
pub use sqlite::SqliteCache;

pub const EARTH_RADIUS_KM: f64 = 6372.0;
pub const DEFAULT_PROXIMITY_KM: f64 = 1.0;

/// Outcome of a single [`PlaceCache::upsert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheWrite {
    pub total: usize,
    pub added: usize,
    pub replaced: usize,
}

pub trait PlaceCache: Send {
    /// Hydrates the cache from storage. Missing storage is an empty cache.
    fn load(&mut self) -> AppResult<()>;

    /// True when this exact coordinate pair was already queried live.
    fn has_seen(&self, lat: f64, lng: f64) -> AppResult<bool>;

    /// Records the coordinate fingerprint and persists the seen-set.
    fn mark_seen(&mut self, lat: f64, lng: f64) -> AppResult<()>;

    /// Every stored candidate within the proximity radius, in store order.
    fn query_nearby(&self, lat: f64, lng: f64) -> AppResult<Vec<PlacesCandidate>>;

    /// Merges candidates by reference, refreshes every `cachedAt`, persists.
    fn upsert(&mut self, candidates: &[PlacesCandidate]) -> AppResult<CacheWrite>;

    fn len(&self) -> AppResult<usize>;

    fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Hex digest identifying a raw coordinate pair in the seen-set.
pub fn request_fingerprint(lat: f64, lng: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{lat}_{lng}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lng1, lat2, lng2) = (
        lat1.to_radians(),
        lng1.to_radians(),
        lat2.to_radians(),
        lng2.to_radians(),
    );
    let d_lat = lat2 - lat1;
    let d_lng = lng2 - lng1;
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    c * EARTH_RADIUS_KM
}

pub(crate) fn is_nearby(candidate: &PlacesCandidate, lat: f64, lng: f64, radius_km: f64) -> bool {
    haversine_km(lat, lng, candidate.lat(), candidate.lng()) < radius_km
}

pub(crate) fn cached_at_now() -> String {
    Local::now().format(CACHED_AT_FORMAT).to_string()
}
