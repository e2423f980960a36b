use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timestamp layout used for `cachedAt` in every persisted cache file.
pub const CACHED_AT_FORMAT: &str = "%d-%m-%y %H:%M:%S";

const OPERATIONAL: &str = "OPERATIONAL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttractionAddress {
    #[serde(default)]
    pub block: String,
    #[serde(default)]
    pub street_name: String,
    #[serde(default)]
    pub postal_code: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttractionLocation {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl AttractionLocation {
    /// The dataset API reports unknown positions as 0/0.
    pub fn is_valid(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// A point of interest as returned by the tourism dataset API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttractionRecord {
    pub name: String,
    #[serde(default)]
    pub address: AttractionAddress,
    #[serde(default)]
    pub location: AttractionLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<PlacesCandidate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttractionRecord {
    /// Block and street used for matching.
    ///
    /// Some records leave `block` empty and prefix the street with the house
    /// number instead ("10 Bayfront Avenue"); the numeric token is promoted to
    /// the block in that case.
    pub fn block_and_street(&self) -> (String, String) {
        let block = self.address.block.trim();
        let street = self.address.street_name.trim();
        if block.is_empty() {
            if let Some((first, rest)) = street.split_once(' ') {
                if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
                    return (first.to_string(), rest.trim().to_string());
                }
            }
        }
        (block.to_string(), street.to_string())
    }

    pub fn text_field(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn with_enrichment(mut self, candidate: PlacesCandidate) -> Self {
        self.enrichment = Some(candidate);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
}

/// A place returned by the places-lookup provider, as stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacesCandidate {
    pub reference: String,
    pub name: String,
    #[serde(default)]
    pub formatted_address: String,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub user_ratings_total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_status: Option<String>,
    #[serde(rename = "cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlacesCandidate {
    pub fn lat(&self) -> f64 {
        self.geometry.location.lat
    }

    pub fn lng(&self) -> f64 {
        self.geometry.location.lng
    }

    pub fn is_operational(&self) -> bool {
        self.business_status.as_deref() == Some(OPERATIONAL)
    }

    /// First whitespace-delimited token of the formatted address.
    pub fn address_block(&self) -> &str {
        self.formatted_address
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or("")
    }

    /// Remainder of the formatted address after the block, up to the first comma.
    pub fn address_street(&self) -> &str {
        let trimmed = self.formatted_address.trim();
        let rest = trimmed
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest)
            .unwrap_or("");
        rest.split(',').next().unwrap_or("").trim()
    }
}
