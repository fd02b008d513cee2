//! Turning raw harvested payloads into [`NormalizedRecord`]s.
//!
//! The [`Normalizer`] trait is the seam between a harvesting transport and
//! the reconciliation engine. [`JsonNormalizer`] handles payloads that
//! already carry the canonical field names, as produced by the dump
//! exporter; it only fills in what the header knows and what can be
//! derived (fingerprints, aggregation identifiers, absolute URIs).

use serde_json::{Map, Value};

use mycorrhiza_core::error::{CatalogError, Result};
use mycorrhiza_core::fingerprint::{name_fingerprint, record_fingerprint};
use mycorrhiza_core::models::NormalizedRecord;

use crate::harvest::RawRecord;

/// Converts one raw record into the canonical field set.
///
/// `hostname` is the host of the source the record came from, used to
/// qualify site-relative values.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &RawRecord, hostname: Option<&str>) -> Result<NormalizedRecord>;
}

/// Normalizer for payloads shaped like [`NormalizedRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonNormalizer;

impl Normalizer for JsonNormalizer {
    fn normalize(&self, raw: &RawRecord, hostname: Option<&str>) -> Result<NormalizedRecord> {
        if raw.deleted {
            // deleted records carry a header only; keep whatever metadata
            // survived so authors and languages are still registered
            let mut record = parse_payload(raw, hostname).unwrap_or_default();
            record.identifier = raw.identifier.clone();
            record.deleted = true;
            record.aggregations.clear();
            return Ok(record);
        }

        let mut record = parse_payload(raw, hostname).map_err(|e| CatalogError::Validation {
            identifier: raw.identifier.clone(),
            reason: format!("unreadable payload: {}", e),
        })?;
        record.identifier = raw.identifier.clone();
        record.deleted = false;
        if record.full_data.is_null() {
            record.full_data = raw.payload.clone();
        }
        if let (Some(host), Some(uri)) = (hostname, record.uri.as_mut()) {
            if uri.starts_with('/') {
                *uri = format!("https://{}{}", host, uri);
            }
        }
        if record.checksum.as_deref().map_or(true, str::is_empty) {
            record.checksum = Some(record_fingerprint(&record));
        }
        Ok(record)
    }
}

fn parse_payload(
    raw: &RawRecord,
    hostname: Option<&str>,
) -> std::result::Result<NormalizedRecord, serde_json::Error> {
    let mut object = match &raw.payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return serde_json::from_value::<NormalizedRecord>(other.clone());
        }
    };
    object.insert("identifier".into(), Value::String(raw.identifier.clone()));
    object.remove("deleted");

    if let Some(Value::Array(aggregations)) = object.get_mut("aggregations") {
        for agg in aggregations.iter_mut() {
            if let Value::Object(agg) = agg {
                fill_aggregation(agg, hostname);
            }
        }
    }

    serde_json::from_value(Value::Object(object))
}

/// Derive a missing aggregation checksum and identifier from its name.
fn fill_aggregation(agg: &mut Map<String, Value>, hostname: Option<&str>) {
    let name = agg
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        return;
    }
    let missing = |agg: &Map<String, Value>, key: &str| {
        agg.get(key)
            .and_then(Value::as_str)
            .map_or(true, |s| s.trim().is_empty())
    };
    if missing(agg, "checksum") {
        agg.insert("checksum".into(), Value::String(name_fingerprint(&name)));
    }
    if missing(agg, "identifier") {
        let identifier = format!("aggregation:{}:{}", hostname.unwrap_or("local"), name);
        agg.insert("identifier".into(), Value::String(identifier));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(deleted: bool, payload: Value) -> RawRecord {
        RawRecord {
            identifier: "oai:site.org:pizza".into(),
            deleted,
            datestamp: None,
            sets: Vec::new(),
            payload,
        }
    }

    #[test]
    fn test_fingerprint_is_computed_when_absent() {
        let rec = JsonNormalizer
            .normalize(
                &raw(false, json!({ "title": "Pizza", "authors": ["Pinco"] })),
                Some("site.org"),
            )
            .unwrap();
        assert_eq!(rec.identifier, "oai:site.org:pizza");
        assert_eq!(rec.checksum.as_deref(), Some(record_fingerprint(&rec).as_str()));
        assert_eq!(rec.full_data["title"], json!("Pizza"));
    }

    #[test]
    fn test_supplied_fingerprint_is_kept() {
        let rec = JsonNormalizer
            .normalize(&raw(false, json!({ "title": "Pizza", "checksum": "abc" })), None)
            .unwrap();
        assert_eq!(rec.checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_relative_uri_is_qualified() {
        let rec = JsonNormalizer
            .normalize(
                &raw(false, json!({ "title": "Pizza", "uri": "/library/pizza" })),
                Some("site.org"),
            )
            .unwrap();
        assert_eq!(rec.uri.as_deref(), Some("https://site.org/library/pizza"));
    }

    #[test]
    fn test_aggregation_defaults_from_name() {
        let rec = JsonNormalizer
            .normalize(
                &raw(
                    false,
                    json!({
                        "title": "Article",
                        "aggregations": [{ "name": "Issue 1", "order": "2" }]
                    }),
                ),
                Some("site.org"),
            )
            .unwrap();
        let agg = &rec.aggregations[0];
        assert_eq!(agg.checksum, name_fingerprint("Issue 1"));
        assert_eq!(agg.identifier, "aggregation:site.org:Issue 1");
        assert_eq!(agg.sorting_pos(), Some(2));
    }

    #[test]
    fn test_unreadable_payload_is_a_validation_error() {
        let err = JsonNormalizer
            .normalize(&raw(false, json!({ "authors": "not a list" })), None)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_deleted_header_only() {
        let rec = JsonNormalizer.normalize(&raw(true, Value::Null), None).unwrap();
        assert!(rec.deleted);
        assert!(rec.checksum.is_none());
        assert_eq!(rec.identifier, "oai:site.org:pizza");
    }
}
