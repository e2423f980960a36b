//! Paged "hidden gem" search: pulls dataset records page by page, resolves
//! each one against the places provider and keeps the ones that pass the
//! quality filter.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AppConfig, MAX_DATE_BUFFER_DAYS};
use crate::errors::{AppError, AppResult};
use crate::matcher::MatchTarget;
use crate::models::{AttractionRecord, PlacesCandidate};
use crate::places::{PlacesResolver, ResolutionSource};
use crate::tih::{DatasetSource, SearchQuery};

pub const EVENTS_DATASET: &str = "events";

/// Categories whose venues carry meaningful provider ratings.
pub const RATEABLE_DATASETS: &[&str] = &["food_beverages", "bars_clubs", "shops", "attractions"];

pub const DEFAULT_DATE_BUFFER_DAYS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingPolicy {
    pub min_rating: f64,
    pub max_rating_count: u64,
    pub hidden_rating_count: u64,
}

impl Default for RatingPolicy {
    fn default() -> Self {
        Self {
            min_rating: 3.0,
            max_rating_count: 500,
            hidden_rating_count: 10,
        }
    }
}

impl RatingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_rating: config.min_rating,
            max_rating_count: config.max_rating_count,
            hidden_rating_count: config.hidden_rating_count,
        }
    }

    /// Well rated but not overrun, or barely reviewed at all.
    pub fn accepts(&self, candidate: &PlacesCandidate) -> bool {
        let count = candidate.user_ratings_total;
        let well_rated = candidate.is_operational()
            && candidate.rating >= self.min_rating
            && count < self.max_rating_count;
        well_rated || count <= self.hidden_rating_count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub datasets: Vec<String>,
    pub keywords: Vec<String>,
    pub page_size: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub target_count: usize,
}

impl SearchParams {
    pub fn new(datasets: Vec<String>, keywords: Vec<String>) -> Self {
        Self {
            datasets,
            keywords,
            page_size: 50,
            start_date: None,
            end_date: None,
            target_count: 25,
        }
    }

    pub fn includes_events(&self) -> bool {
        self.datasets.iter().any(|d| dataset_is(d, EVENTS_DATASET))
    }

    pub fn requires_rating(&self) -> bool {
        self.datasets
            .iter()
            .any(|d| RATEABLE_DATASETS.iter().any(|rateable| dataset_is(d, rateable)))
    }
}

fn dataset_is(name: &str, expected: &str) -> bool {
    name.trim().eq_ignore_ascii_case(expected)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub pages_fetched: usize,
    pub records_inspected: usize,
    pub invalid_locations: usize,
    pub cache_hits: usize,
    pub provider_lookups: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub rejected_by_rating: usize,
    pub accepted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub records: Vec<AttractionRecord>,
    pub stats: SearchStats,
}

pub struct HiddenGemSearch {
    source: Arc<dyn DatasetSource>,
    resolver: Arc<PlacesResolver>,
    policy: RatingPolicy,
    date_buffer: Duration,
}

impl HiddenGemSearch {
    pub fn new(
        source: Arc<dyn DatasetSource>,
        resolver: Arc<PlacesResolver>,
        policy: RatingPolicy,
        date_buffer_days: i64,
    ) -> Self {
        Self {
            source,
            resolver,
            policy,
            date_buffer: Duration::days(date_buffer_days.clamp(0, MAX_DATE_BUFFER_DAYS)),
        }
    }

    pub fn policy(&self) -> RatingPolicy {
        self.policy
    }

    /// Accumulates at most `target_count` enriched records. Stops early when
    /// the source returns a short page; never fails for falling short.
    pub async fn search(&self, params: &SearchParams) -> AppResult<SearchOutcome> {
        if params.page_size == 0 {
            return Err(AppError::Config("search page size must be positive".into()));
        }

        let rating_filter = params.requires_rating();
        let mut query = SearchQuery {
            datasets: params.datasets.clone(),
            keywords: params.keywords.clone(),
            limit: params.page_size,
            offset: 0,
            date_window: self.date_window(params),
        };
        let mut outcome = SearchOutcome::default();

        while outcome.records.len() < params.target_count {
            let page = self.source.search(&query).await?;
            outcome.stats.pages_fetched += 1;
            let page_len = page.len();
            debug!(offset = query.offset, records = page_len, "dataset page fetched");

            for record in page {
                if outcome.records.len() >= params.target_count {
                    break;
                }
                if let Some(record) = self.enrich(record, rating_filter, &mut outcome.stats).await? {
                    outcome.records.push(record);
                }
            }

            if page_len < params.page_size {
                break;
            }
            query.offset += params.page_size;
        }

        outcome.stats.accepted = outcome.records.len();
        info!(
            datasets = ?params.datasets,
            accepted = outcome.stats.accepted,
            pages = outcome.stats.pages_fetched,
            inspected = outcome.stats.records_inspected,
            "hidden gem search finished"
        );
        Ok(outcome)
    }

    async fn enrich(
        &self,
        record: AttractionRecord,
        rating_filter: bool,
        stats: &mut SearchStats,
    ) -> AppResult<Option<AttractionRecord>> {
        stats.records_inspected += 1;
        if !record.location.is_valid() {
            stats.invalid_locations += 1;
            debug!(name = record.name, "skipping record without a location");
            return Ok(None);
        }

        let target = MatchTarget::from(&record);
        let resolution = self
            .resolver
            .resolve(&target, record.location.latitude, record.location.longitude)
            .await?;
        match resolution.source {
            ResolutionSource::Cache => stats.cache_hits += 1,
            ResolutionSource::Provider => stats.provider_lookups += 1,
            ResolutionSource::SeenEmpty | ResolutionSource::CacheOnly => {}
        }

        let Some(candidate) = resolution.candidate else {
            stats.unmatched += 1;
            return Ok(None);
        };
        stats.matched += 1;

        if rating_filter && !self.policy.accepts(&candidate) {
            stats.rejected_by_rating += 1;
            debug!(
                name = record.name,
                rating = candidate.rating,
                ratings = candidate.user_ratings_total,
                "rejected by rating filter"
            );
            return Ok(None);
        }

        info!(name = record.name, "hidden gem");
        Ok(Some(record.with_enrichment(candidate)))
    }

    /// Event searches get the requested range widened on both sides.
    fn date_window(&self, params: &SearchParams) -> Option<(NaiveDate, NaiveDate)> {
        if !params.includes_events() {
            return None;
        }
        match (params.start_date, params.end_date) {
            (Some(start), Some(end)) => Some((start - self.date_buffer, end + self.date_buffer)),
            (Some(start), None) => Some((start - self.date_buffer, start + self.date_buffer)),
            (None, Some(end)) => Some((end - self.date_buffer, end + self.date_buffer)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::cache::{PlaceCache, SqliteCache};
    use crate::matcher::PlaceMatcher;
    use crate::models::{AttractionAddress, AttractionLocation, Geometry, LatLng};
    use crate::places::ResolverOptions;

    use super::*;

    struct PagedSource {
        pages: Mutex<Vec<Vec<AttractionRecord>>>,
        queries: Mutex<Vec<SearchQuery>>,
    }

    impl PagedSource {
        fn new(mut pages: Vec<Vec<AttractionRecord>>) -> Arc<Self> {
            pages.reverse();
            Arc::new(Self {
                pages: Mutex::new(pages),
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DatasetSource for PagedSource {
        async fn search(&self, query: &SearchQuery) -> AppResult<Vec<AttractionRecord>> {
            self.queries.lock().push(query.clone());
            Ok(self.pages.lock().pop().unwrap_or_default())
        }

        async fn dataset_names(&self) -> AppResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn record(name: &str, block: &str, street: &str, lat: f64, lng: f64) -> AttractionRecord {
        AttractionRecord {
            name: name.into(),
            address: AttractionAddress {
                block: block.into(),
                street_name: street.into(),
                postal_code: "000000".into(),
            },
            location: AttractionLocation {
                latitude: lat,
                longitude: lng,
            },
            ..Default::default()
        }
    }

    fn place(reference: &str, name: &str, address: &str, lat: f64, lng: f64, rating: f64, count: u64) -> PlacesCandidate {
        PlacesCandidate {
            reference: reference.into(),
            name: name.into(),
            formatted_address: address.into(),
            geometry: Geometry {
                location: LatLng { lat, lng },
            },
            rating,
            user_ratings_total: count,
            business_status: Some("OPERATIONAL".into()),
            ..Default::default()
        }
    }

    /// Resolver backed only by pre-seeded cache entries.
    fn cached_resolver(seed: &[PlacesCandidate]) -> Arc<PlacesResolver> {
        let mut cache = SqliteCache::in_memory(1.0).unwrap();
        cache.load().unwrap();
        cache.upsert(seed).unwrap();
        Arc::new(
            PlacesResolver::new(
                Box::new(cache),
                None,
                PlaceMatcher::default(),
                ResolverOptions::default(),
            )
            .unwrap(),
        )
    }

    fn search(source: Arc<PagedSource>, resolver: Arc<PlacesResolver>) -> HiddenGemSearch {
        HiddenGemSearch::new(source, resolver, RatingPolicy::default(), DEFAULT_DATE_BUFFER_DAYS)
    }

    #[test]
    fn rating_policy_boundaries() {
        let policy = RatingPolicy::default();
        let base = place("r", "N", "1 A Road", 1.3, 103.8, 3.0, 499);
        assert!(policy.accepts(&base));

        let low = PlacesCandidate { rating: 2.9, ..base.clone() };
        assert!(!policy.accepts(&low));

        let popular = PlacesCandidate {
            rating: 5.0,
            user_ratings_total: 501,
            ..base.clone()
        };
        assert!(!policy.accepts(&popular));

        let unknown = PlacesCandidate {
            rating: 1.0,
            user_ratings_total: 10,
            business_status: None,
            ..base.clone()
        };
        assert!(policy.accepts(&unknown));

        let closed = PlacesCandidate {
            business_status: Some("CLOSED_PERMANENTLY".into()),
            ..base
        };
        assert!(!policy.accepts(&closed));
    }

    #[test]
    fn rateable_and_event_detection() {
        let params = SearchParams::new(vec!["Attractions".into()], vec![]);
        assert!(params.requires_rating());
        assert!(!params.includes_events());

        let params = SearchParams::new(vec!["events".into(), "tours".into()], vec![]);
        assert!(!params.requires_rating());
        assert!(params.includes_events());
    }

    #[tokio::test]
    async fn stops_on_short_page_even_below_target() {
        let source = PagedSource::new(vec![
            vec![
                record("A", "", "", 0.0, 0.0),
                record("B", "", "", 0.0, 0.0),
            ],
            vec![record("C", "", "", 0.0, 0.0)],
            vec![record("never fetched", "", "", 0.0, 0.0)],
        ]);
        let runner = search(source.clone(), cached_resolver(&[]));
        let mut params = SearchParams::new(vec!["attractions".into()], vec!["museum".into()]);
        params.page_size = 2;
        params.target_count = 25;

        let outcome = runner.search(&params).await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stats.pages_fetched, 2);
        assert_eq!(outcome.stats.invalid_locations, 3);

        let offsets: Vec<_> = source.queries.lock().iter().map(|q| q.offset).collect();
        assert_eq!(offsets, vec![0, 2]);
    }

    #[tokio::test]
    async fn quality_filter_keeps_only_hidden_gem() {
        let resolver = cached_resolver(&[
            place("gem", "Quiet Garden", "12 Bukit Road, Singapore", 1.3000, 103.8000, 4.5, 50),
            place("busy", "Crowded Mall", "99 Orchard Road, Singapore", 1.3040, 103.8320, 2.0, 1000),
        ]);
        let source = PagedSource::new(vec![vec![
            record("Quiet Garden", "12", "Bukit Road", 1.3001, 103.8001),
            record("Nowhere", "1", "Lost Lane", 0.0, 0.0),
            record("Crowded Mall", "99", "Orchard Road", 1.3041, 103.8321),
        ]]);
        let runner = search(source, resolver);
        let params = SearchParams::new(vec!["attractions".into()], vec![]);

        let outcome = runner.search(&params).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        let kept = &outcome.records[0];
        assert_eq!(kept.name, "Quiet Garden");
        assert_eq!(kept.enrichment.as_ref().map(|c| c.reference.as_str()), Some("gem"));
        assert_eq!(outcome.stats.invalid_locations, 1);
        assert_eq!(outcome.stats.rejected_by_rating, 1);
        assert_eq!(outcome.stats.cache_hits, 2);
    }

    #[tokio::test]
    async fn unrated_categories_keep_any_match() {
        let resolver = cached_resolver(&[place(
            "busy",
            "Crowded Mall",
            "99 Orchard Road, Singapore",
            1.3040,
            103.8320,
            2.0,
            1000,
        )]);
        let source = PagedSource::new(vec![vec![
            record("Crowded Mall", "99", "Orchard Road", 1.3041, 103.8321),
            record("Unknown Venue", "5", "Nowhere Street", 1.3041, 103.8321),
        ]]);
        let runner = search(source, resolver);
        let params = SearchParams::new(vec!["tours".into()], vec![]);

        let outcome = runner.search(&params).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].name, "Crowded Mall");
        assert_eq!(outcome.stats.unmatched, 1);
    }

    #[tokio::test]
    async fn truncates_at_target_count() {
        let seed: Vec<_> = (0..4)
            .map(|i| {
                place(
                    &format!("ref-{i}"),
                    &format!("Stall {i}"),
                    &format!("{} Market Street, Singapore", 10 + i),
                    1.2800,
                    103.8500,
                    4.0,
                    20,
                )
            })
            .collect();
        let page: Vec<_> = (0..4)
            .map(|i| record(&format!("Stall {i}"), &format!("{}", 10 + i), "Market Street", 1.2800, 103.8500))
            .collect();
        let runner = search(PagedSource::new(vec![page]), cached_resolver(&seed));
        let mut params = SearchParams::new(vec!["food_beverages".into()], vec![]);
        params.page_size = 4;
        params.target_count = 2;

        let outcome = runner.search(&params).await.unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.stats.records_inspected, 2);
        assert_eq!(outcome.stats.pages_fetched, 1);
    }

    #[tokio::test]
    async fn widens_dates_for_events_only() {
        let source = PagedSource::new(vec![]);
        let runner = search(source.clone(), cached_resolver(&[]));
        let mut params = SearchParams::new(vec!["events".into()], vec![]);
        params.start_date = NaiveDate::from_ymd_opt(2024, 6, 10);
        params.end_date = NaiveDate::from_ymd_opt(2024, 6, 12);
        runner.search(&params).await.unwrap();

        params.datasets = vec!["attractions".into()];
        runner.search(&params).await.unwrap();

        let queries = source.queries.lock();
        assert_eq!(
            queries[0].date_window,
            Some((
                NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 17).unwrap(),
            ))
        );
        assert_eq!(queries[1].date_window, None);
    }

    #[tokio::test]
    async fn oversized_date_buffer_is_clamped() {
        let source = PagedSource::new(vec![]);
        let runner = HiddenGemSearch::new(
            source.clone(),
            cached_resolver(&[]),
            RatingPolicy::default(),
            i64::MAX,
        );
        let mut params = SearchParams::new(vec!["events".into()], vec![]);
        params.start_date = NaiveDate::from_ymd_opt(2024, 6, 10);
        params.end_date = NaiveDate::from_ymd_opt(2024, 6, 10);
        runner.search(&params).await.unwrap();

        let queries = source.queries.lock();
        assert_eq!(
            queries[0].date_window,
            Some((
                NaiveDate::from_ymd_opt(2023, 6, 11).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            ))
        );
    }

    #[tokio::test]
    async fn zero_target_fetches_nothing() {
        let source = PagedSource::new(vec![vec![record("A", "", "", 1.3, 103.8)]]);
        let runner = search(source.clone(), cached_resolver(&[]));
        let mut params = SearchParams::new(vec!["shops".into()], vec![]);
        params.target_count = 0;

        let outcome = runner.search(&params).await.unwrap();
        assert!(outcome.records.is_empty());
        assert!(source.queries.lock().is_empty());
    }
}
