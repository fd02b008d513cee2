//! Catalog data model.
//!
//! Rows are identified by plain `i64` ids assigned by the store. The
//! sentinel `0` is never a valid id, which is what lets
//! [`Document::unique_source`](crate::projection::Document::unique_source)
//! use it for "no single library".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type LibraryId = i64;
pub type SourceId = i64;
pub type AgentId = i64;
pub type EntryId = i64;
pub type RecordId = i64;
pub type LinkId = i64;

/// Administrative grouping of sources. Its two flags jointly gate the
/// visibility of every record beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub url: Option<String>,
    pub public: bool,
    pub active: bool,
}

impl Library {
    /// Records of this library are visible to anonymous users.
    pub fn is_visible(&self) -> bool {
        self.active && self.public
    }
}

#[derive(Debug, Clone)]
pub struct NewLibrary {
    pub name: String,
    pub url: Option<String>,
    pub public: bool,
    pub active: bool,
}

/// One harvested origin site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: SourceId,
    pub library_id: LibraryId,
    pub name: String,
    pub url: String,
    pub active: bool,
    /// Cursor of the last successful incremental harvest.
    pub last_harvested: Option<DateTime<Utc>>,
    /// Standing sub-selection filter applied to every harvest.
    pub harvest_set: Option<String>,
}

impl Source {
    /// Host part of the source URL, without scheme, credentials or port.
    pub fn hostname(&self) -> Option<String> {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        if host.is_empty() {
            None
        } else {
            Some(host.to_lowercase())
        }
    }

    /// Cursor formatted the way harvesting endpoints expect it.
    pub fn last_harvested_zulu(&self) -> Option<String> {
        self.last_harvested
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub library_id: LibraryId,
    pub name: String,
    pub url: String,
    pub active: bool,
    pub harvest_set: Option<String>,
}

/// A real-world author or contributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub canonical_agent: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Language {
    pub code: String,
}

/// Canonical catalog record for one work or one aggregation of works.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub title: String,
    pub subtitle: Option<String>,
    pub checksum: String,
    pub is_aggregation: bool,
    pub canonical_entry: Option<EntryId>,
    pub original_entry: Option<EntryId>,
    pub indexed_data: Option<serde_json::Value>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub title: String,
    pub subtitle: Option<String>,
    pub checksum: String,
    pub is_aggregation: bool,
}

/// Mutable descriptive attributes of a source record, overwritten in
/// place on every sighting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFields {
    pub full_data: serde_json::Value,
    pub description: Option<String>,
    pub year_edition: Option<i32>,
    pub year_first_edition: Option<i32>,
    pub uri: Option<String>,
    pub uri_label: Option<String>,
    pub content_type: Option<String>,
    pub material_description: Option<String>,
    pub shelf_location_code: Option<String>,
}

/// One site's sighting of an entry, unique on `(source_id, identifier)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: RecordId,
    pub source_id: SourceId,
    pub identifier: String,
    pub entry_id: Option<EntryId>,
    pub is_aggregation: bool,
    pub datetime: DateTime<Utc>,
    pub fields: RecordFields,
}

#[derive(Debug, Clone)]
pub struct NewSourceRecord {
    pub source_id: SourceId,
    pub identifier: String,
    pub is_aggregation: bool,
    pub entry_id: Option<EntryId>,
    pub datetime: DateTime<Utc>,
    pub fields: RecordFields,
}

/// "Aggregation entry contains aggregated entry."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationMembership {
    pub id: LinkId,
    pub aggregation: EntryId,
    pub aggregated: EntryId,
}

/// Per-source counterpart of [`AggregationMembership`], with ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSourceLink {
    pub id: LinkId,
    pub aggregation: RecordId,
    pub aggregated: RecordId,
    pub sorting_pos: Option<i64>,
}

/// Per-user filter applied at the search boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub id: i64,
    pub user_id: i64,
    pub target: ExclusionTarget,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionTarget {
    Library(LibraryId),
    Agent(AgentId),
    Entry(EntryId),
}

impl Exclusion {
    /// The `(field, id)` pair the search index filters on.
    pub fn as_index_filter(&self) -> (&'static str, i64) {
        match self.target {
            ExclusionTarget::Library(id) => ("library", id),
            ExclusionTarget::Agent(id) => ("creator", id),
            ExclusionTarget::Entry(id) => ("entry", id),
        }
    }
}

/// Row counts across the catalog, used by tests and `myco stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub libraries: i64,
    pub sources: i64,
    pub agents: i64,
    pub languages: i64,
    pub entries: i64,
    pub aggregation_entries: i64,
    pub records: i64,
    pub aggregation_records: i64,
    pub memberships: i64,
    pub links: i64,
}

// ── Normalized input ────────────────────────────────────────────────

/// Canonical field set produced by the normalizer for one harvested record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub identifier: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub year_edition: Option<i32>,
    #[serde(default)]
    pub year_first_edition: Option<i32>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub uri_label: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub material_description: Option<String>,
    #[serde(default)]
    pub shelf_location_code: Option<String>,
    #[serde(default)]
    pub full_data: serde_json::Value,
    #[serde(default)]
    pub aggregations: Vec<AggregationRef>,
}

impl NormalizedRecord {
    pub(crate) fn record_fields(&self) -> RecordFields {
        RecordFields {
            full_data: self.full_data.clone(),
            description: self.description.clone(),
            year_edition: self.year_edition,
            year_first_edition: self.year_first_edition,
            uri: self.uri.clone(),
            uri_label: self.uri_label.clone(),
            content_type: self.content_type.clone(),
            material_description: self.material_description.clone(),
            shelf_location_code: self.shelf_location_code.clone(),
        }
    }
}

/// A record's membership in an aggregation (e.g. the issue an article
/// appeared in).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationRef {
    pub identifier: String,
    pub checksum: String,
    /// Display name of the aggregation, issue number included.
    pub name: String,
    #[serde(default)]
    pub linkage: Option<String>,
    /// Position inside the aggregation, as supplied upstream.
    #[serde(default)]
    pub order: Option<serde_json::Value>,
    #[serde(default)]
    pub full_data: serde_json::Value,
}

impl AggregationRef {
    /// `order` as an integer, or `None` when absent or non-numeric.
    pub fn sorting_pos(&self) -> Option<i64> {
        match self.order.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether upstream supplied an order at all (even an unusable one).
    pub fn has_order(&self) -> bool {
        match &self.order {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(url: &str) -> Source {
        Source {
            id: 1,
            library_id: 1,
            name: "test".into(),
            url: url.into(),
            active: true,
            last_harvested: None,
            harvest_set: None,
        }
    }

    #[test]
    fn test_hostname() {
        assert_eq!(
            source("https://staging.amusewiki.org/oai-pmh").hostname().as_deref(),
            Some("staging.amusewiki.org")
        );
        assert_eq!(
            source("http://user@Example.ORG:8080").hostname().as_deref(),
            Some("example.org")
        );
        assert_eq!(source("").hostname(), None);
    }

    #[test]
    fn test_sorting_pos_numeric_and_not() {
        let mut agg = AggregationRef::default();
        assert_eq!(agg.sorting_pos(), None);
        assert!(!agg.has_order());

        agg.order = Some(json!("3"));
        assert_eq!(agg.sorting_pos(), Some(3));

        agg.order = Some(json!(7));
        assert_eq!(agg.sorting_pos(), Some(7));

        agg.order = Some(json!("third"));
        assert!(agg.has_order());
        assert_eq!(agg.sorting_pos(), None);
    }

    #[test]
    fn test_exclusion_filters() {
        let ex = Exclusion {
            id: 1,
            user_id: 9,
            target: ExclusionTarget::Agent(4),
            comment: String::new(),
        };
        assert_eq!(ex.as_index_filter(), ("creator", 4));
    }

    #[test]
    fn test_library_visibility_needs_both_flags() {
        let mut lib = Library {
            id: 1,
            name: "l".into(),
            url: None,
            public: true,
            active: true,
        };
        assert!(lib.is_visible());
        lib.active = false;
        assert!(!lib.is_visible());
        lib.active = true;
        lib.public = false;
        assert!(!lib.is_visible());
    }

    #[test]
    fn test_normalized_record_defaults() {
        let rec: NormalizedRecord =
            serde_json::from_value(json!({ "identifier": "oai:x:1" })).unwrap();
        assert!(!rec.deleted);
        assert!(rec.authors.is_empty());
        assert!(rec.checksum.is_none());
    }
}
