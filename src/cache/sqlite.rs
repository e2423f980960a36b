use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, trace};

use crate::errors::{AppError, AppResult};
use crate::models::PlacesCandidate;

use super::{cached_at_now, is_nearby, request_fingerprint, CacheWrite, PlaceCache};

// Upper bound for kilometres per degree of latitude on the cache sphere.
const KM_PER_DEGREE_LAT: f64 = 111.0;

/// SQLite-backed cache. Rows keep their insertion rowid across upserts, so
/// nearby queries return candidates in the order they were first stored.
pub struct SqliteCache {
    connection: Connection,
    path: Option<PathBuf>,
    radius_km: f64,
}

impl SqliteCache {
    pub fn open<P: AsRef<Path>>(path: P, radius_km: f64) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(path, flags)?;
        Ok(Self {
            connection,
            path: Some(path.to_path_buf()),
            radius_km,
        })
    }

    pub fn in_memory(radius_km: f64) -> AppResult<Self> {
        Ok(Self {
            connection: Connection::open_in_memory()?,
            path: None,
            radius_km,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn run_migrations(&self) -> AppResult<()> {
        self.connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS places (
                reference TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_requests (
                fingerprint TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_places_lat_lng ON places(lat, lng);
            "#,
        )?;
        Ok(())
    }
}

impl PlaceCache for SqliteCache {
    fn load(&mut self) -> AppResult<()> {
        self.run_migrations()?;
        let candidates = self.len()?;
        let requests: i64 =
            self.connection
                .query_row("SELECT COUNT(*) FROM cache_requests", [], |row| row.get(0))?;
        info!(
            target: "places_cache",
            candidates,
            requests,
            path = ?self.path,
            "sqlite cache loaded"
        );
        Ok(())
    }

    fn has_seen(&self, lat: f64, lng: f64) -> AppResult<bool> {
        let fingerprint = request_fingerprint(lat, lng);
        self.connection
            .query_row(
                "SELECT 1 FROM cache_requests WHERE fingerprint = ?1",
                [fingerprint],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(AppError::from)
    }

    fn mark_seen(&mut self, lat: f64, lng: f64) -> AppResult<()> {
        self.connection.execute(
            "INSERT INTO cache_requests (fingerprint) VALUES (?1)
            ON CONFLICT(fingerprint) DO NOTHING",
            [request_fingerprint(lat, lng)],
        )?;
        Ok(())
    }

    fn query_nearby(&self, lat: f64, lng: f64) -> AppResult<Vec<PlacesCandidate>> {
        let window = self.radius_km / KM_PER_DEGREE_LAT;
        let mut stmt = self.connection.prepare(
            "SELECT payload, cached_at FROM places
            WHERE lat BETWEEN ?1 AND ?2
            ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map((lat - window, lat + window), |row| {
                let payload: String = row.get(0)?;
                let cached_at: String = row.get(1)?;
                Ok((payload, cached_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut nearby = Vec::new();
        for (payload, cached_at) in rows {
            let mut candidate: PlacesCandidate = serde_json::from_str(&payload)?;
            if is_nearby(&candidate, lat, lng, self.radius_km) {
                candidate.cached_at = Some(cached_at);
                nearby.push(candidate);
            }
        }
        Ok(nearby)
    }

    fn upsert(&mut self, candidates: &[PlacesCandidate]) -> AppResult<CacheWrite> {
        let stamp = cached_at_now();
        let mut write = CacheWrite::default();
        let tx = self.connection.transaction()?;
        for candidate in candidates {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM places WHERE reference = ?1",
                    [candidate.reference.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            let mut stored = candidate.clone();
            stored.cached_at = None;
            tx.execute(
                "INSERT INTO places (reference, lat, lng, payload, cached_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(reference) DO UPDATE SET
                    lat = excluded.lat,
                    lng = excluded.lng,
                    payload = excluded.payload,
                    cached_at = excluded.cached_at",
                (
                    stored.reference.as_str(),
                    stored.lat(),
                    stored.lng(),
                    serde_json::to_string(&stored)?,
                    stamp.as_str(),
                ),
            )?;
            if exists {
                write.replaced += 1;
            } else {
                write.added += 1;
            }
            trace!(reference = stored.reference, "candidate stored");
        }
        tx.execute("UPDATE places SET cached_at = ?1", [stamp.as_str()])?;
        tx.commit()?;

        write.total = self.len()?;
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
        self.connection
            .query_row("SELECT COUNT(*) FROM places", [], |row| row.get::<_, i64>(0))
            .map(|value| value as usize)
            .map_err(AppError::from)
    }
}
