use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::AttractionRecord;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<.*?>").unwrap());
static NON_ASCII: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\x00-\x7F]").unwrap());

/// Plain-text rendering of a record for downstream text consumers.
///
/// Name, description and body are flattened to one line each with markup and
/// non-ASCII characters removed. Website, provider rating and dataset rating
/// lines only appear when the record carries them.
pub fn summary_text(record: &AttractionRecord) -> String {
    let mut lines = vec![
        clean_text(&record.name),
        clean_text(record.text_field("description").unwrap_or_default()),
        clean_text(record.text_field("body").unwrap_or_default()),
    ];

    if let Some(website) = record.text_field("officialWebsite").filter(|w| !w.trim().is_empty()) {
        lines.push(format!("Website: {}", website.trim()));
    }

    let address = &record.address;
    lines.push(format!(
        "Address: {} {}, Singapore {}",
        address.block, address.street_name, address.postal_code
    ));

    if let Some(rating) = record.extra.get("rating").and_then(numeric).filter(|r| *r > 1.0) {
        lines.push(format!("Rating: {rating}"));
    }

    if let Some(place) = &record.enrichment {
        lines.push(format!(
            "Google rating: {} ({} reviews)",
            place.rating, place.user_ratings_total
        ));
    }

    lines.join("\n")
}

pub fn clean_text(raw: &str) -> String {
    let flattened = raw.replace('\n', " ");
    let without_tags = HTML_TAG.replace_all(&flattened, "");
    NON_ASCII.replace_all(&without_tags, "").into_owned()
}

// The dataset API is inconsistent about sending ratings as numbers or strings.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> AttractionRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn strips_markup_newlines_and_non_ascii() {
        assert_eq!(
            clean_text("<p>Caf\u{e9}\nby the <b>bay</b></p>"),
            "Caf by the bay"
        );
    }

    #[test]
    fn full_summary() {
        let record = record(json!({
            "name": "Hawker\nHeritage",
            "description": "<em>Local</em> food",
            "body": "Open daily",
            "officialWebsite": "https://example.sg",
            "rating": 4.2,
            "address": {"block": "18", "streetName": "Raffles Quay", "postalCode": "048582"},
            "location": {"latitude": 1.28, "longitude": 103.85}
        }));
        assert_eq!(
            summary_text(&record),
            "Hawker Heritage\nLocal food\nOpen daily\nWebsite: https://example.sg\n\
             Address: 18 Raffles Quay, Singapore 048582\nRating: 4.2"
        );
    }

    #[test]
    fn low_or_missing_rating_and_website_are_omitted() {
        let record = record(json!({
            "name": "Quiet Spot",
            "description": "",
            "body": "",
            "rating": "0.5",
            "address": {"block": "", "streetName": "Jalan Besar", "postalCode": "208000"}
        }));
        let text = summary_text(&record);
        assert!(!text.contains("Website:"));
        assert!(!text.contains("Rating:"));
        assert!(text.ends_with("Address:  Jalan Besar, Singapore 208000"));
    }

    #[test]
    fn enrichment_adds_provider_rating() {
        let record = record(json!({
            "name": "Quiet Spot",
            "enrichment": {
                "reference": "ref",
                "name": "Quiet Spot",
                "rating": 4.6,
                "user_ratings_total": 8
            }
        }));
        assert!(summary_text(&record).ends_with("Google rating: 4.6 (8 reviews)"));
    }
}
