//! Decides whether a places-lookup candidate describes the same venue as an
//! attraction record.
//!
//! The two sources format addresses differently: the provider packs block,
//! street and locality into one string and abbreviates heavily ("Orchard Rd",
//! "ECP"), while the dataset keeps block and street apart and spells words
//! out. Candidates are checked in provider order and the first one passing the
//! block, name and street filters wins.

use serde::Serialize;
use tracing::trace;

use crate::models::{AttractionRecord, PlacesCandidate};

pub const DEFAULT_NAME_THRESHOLD: f64 = 0.5;
pub const DEFAULT_STREET_THRESHOLD: f64 = 0.8;

const STREET_ABBREVIATIONS: &[(&str, &str)] = &[("st", "street"), ("rd", "road")];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchThresholds {
    pub name: f64,
    pub street: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME_THRESHOLD,
            street: DEFAULT_STREET_THRESHOLD,
        }
    }
}

/// Identity fields of the record being resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchTarget {
    pub name: String,
    pub block: String,
    pub street: String,
}

impl MatchTarget {
    pub fn new(name: impl Into<String>, block: impl Into<String>, street: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block: block.into(),
            street: street.into(),
        }
    }
}

impl From<&AttractionRecord> for MatchTarget {
    fn from(record: &AttractionRecord) -> Self {
        let (block, street) = record.block_and_street();
        Self {
            name: record.name.clone(),
            block,
            street,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Block,
    Name,
    Street,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceMatcher {
    thresholds: MatchThresholds,
}

impl PlaceMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    /// First candidate passing every filter, or `None`.
    pub fn find_match<'a>(
        &self,
        target: &MatchTarget,
        candidates: &'a [PlacesCandidate],
    ) -> Option<&'a PlacesCandidate> {
        candidates.iter().find(|candidate| match self.check(target, candidate) {
            Ok(()) => true,
            Err(rejection) => {
                trace!(
                    reference = candidate.reference,
                    candidate = candidate.name,
                    target = target.name,
                    ?rejection,
                    "candidate rejected"
                );
                false
            }
        })
    }

    pub fn check(&self, target: &MatchTarget, candidate: &PlacesCandidate) -> Result<(), Rejection> {
        if !block_matches(&target.block, candidate.address_block()) {
            return Err(Rejection::Block);
        }
        if !self.name_matches(&target.name, &candidate.name) {
            return Err(Rejection::Name);
        }
        if !self.street_matches(&target.street, candidate.address_street()) {
            return Err(Rejection::Street);
        }
        Ok(())
    }

    pub fn name_matches(&self, attraction_name: &str, candidate_name: &str) -> bool {
        let attraction = attraction_name.trim().to_lowercase();
        let candidate = candidate_name.trim().to_lowercase();
        // The provider often returns only the venue part of a longer dataset
        // name, e.g. "the landing point" for "the landing point, the fullerton
        // bay hotel singapore".
        if attraction == candidate || attraction.contains(&candidate) || candidate.contains(&attraction) {
            return true;
        }
        similarity_ratio(&attraction, &candidate) >= self.thresholds.name
    }

    pub fn street_matches(&self, attraction_street: &str, candidate_street: &str) -> bool {
        let attraction = normalize_street(attraction_street);
        let candidate = normalize_street(candidate_street);
        if attraction == candidate || street_acronym(&attraction) == candidate {
            return true;
        }
        similarity_ratio(&attraction, &candidate) >= self.thresholds.street
    }
}

/// An empty attraction block carries no information and never rejects.
pub fn block_matches(attraction_block: &str, candidate_block: &str) -> bool {
    let attraction = attraction_block.trim();
    attraction.is_empty() || attraction == candidate_block.trim()
}

/// Lowercases and expands `st`/`rd`. A leading word is never expanded, so
/// "St Andrew's Road" keeps its "st" (Saint).
fn normalize_street(street: &str) -> String {
    street
        .trim()
        .to_lowercase()
        .split_whitespace()
        .enumerate()
        .map(|(position, word)| {
            if position == 0 {
                return word;
            }
            STREET_ABBREVIATIONS
                .iter()
                .find(|(short, _)| *short == word)
                .map(|(_, long)| *long)
                .unwrap_or(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// "east coast parkway" -> "ecp"
fn street_acronym(normalized: &str) -> String {
    normalized
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .collect()
}

/// `2 * LCS / (len_a + len_b)` over characters, in `[0, 1]`.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut prev = vec![0_usize; b.len() + 1];
    let mut curr = vec![0_usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    (2 * lcs) as f64 / total as f64
}
