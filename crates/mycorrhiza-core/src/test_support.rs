//! Fixtures shared by the engine tests.

use chrono::Utc;
use serde_json::json;

use crate::fingerprint::record_fingerprint;
use crate::models::{AggregationRef, Library, NewLibrary, NewSource, NormalizedRecord, Source};
use crate::registry::AliasTable;
use crate::store::memory::InMemoryStore;
use crate::store::Store;

pub async fn library(store: &InMemoryStore, name: &str, public: bool) -> Library {
    store
        .upsert_library(&NewLibrary {
            name: name.into(),
            url: None,
            public,
            active: true,
        })
        .await
        .unwrap()
}

pub async fn source(store: &InMemoryStore, library: &Library, name: &str) -> Source {
    store
        .upsert_source(&NewSource {
            library_id: library.id,
            name: name.into(),
            url: format!("https://{}.org/oai-pmh", name),
            active: true,
            harvest_set: None,
        })
        .await
        .unwrap()
}

/// A record with a computed fingerprint.
pub fn record(identifier: &str, title: &str, authors: &[&str]) -> NormalizedRecord {
    let mut rec = NormalizedRecord {
        identifier: identifier.into(),
        title: Some(title.into()),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        languages: vec!["en".into()],
        year_edition: Some(2022),
        uri: Some(format!("https://example.org/{}", identifier)),
        uri_label: Some("Landing page".into()),
        content_type: Some("text/html".into()),
        full_data: json!({ "identifier": identifier }),
        ..Default::default()
    };
    rec.checksum = Some(record_fingerprint(&rec));
    rec
}

/// The article-in-two-issues record.
pub fn article_with_issues() -> NormalizedRecord {
    let mut rec = record(
        "oai:staging.amusewiki.org:pizza-pizza",
        "The Text::Amuse markup manual",
        &["Pinco Pallino", "Marco Pessotto", "Tizio Caio Sempronio"],
    );
    rec.subtitle = Some("The writer’s guide".into());
    rec.description = Some("Everything you have to know about the Text::Amuse markup.".into());
    rec.shelf_location_code = Some("SLC-123".into());
    rec.checksum = Some(record_fingerprint(&rec));
    rec.aggregations = vec![
        AggregationRef {
            identifier: "aggregation:staging.amusewiki.org:test-1".into(),
            checksum: "agg-checksum-1".into(),
            name: "First Test, 2".into(),
            linkage: Some("https://staging.amusewiki.org/aggregation/test-1".into()),
            order: Some(json!("1")),
            full_data: json!({ "item_identifier": "test-1" }),
        },
        AggregationRef {
            identifier: "aggregation:staging.amusewiki.org:test-2".into(),
            checksum: "agg-checksum-2".into(),
            name: "Second Test, 2".into(),
            linkage: Some("https://staging.amusewiki.org/aggregation/test-2".into()),
            order: Some(json!("1")),
            full_data: json!({ "item_identifier": "test-2" }),
        },
    ];
    rec
}

pub async fn ingest(store: &InMemoryStore, source: &Source, rec: NormalizedRecord) -> Vec<i64> {
    crate::reconcile::reconcile(
        store,
        source,
        rec,
        &AliasTable::new(),
        Utc::now(),
        &Default::default(),
    )
    .await
    .unwrap()
    .entries
    .iter()
    .map(|e| e.id)
    .collect()
}
