//! Content fingerprints used as the deduplication key for entries.
//!
//! A fingerprint is the lowercase hex SHA-256 of a record's identifying
//! fields. Field values are trimmed and case-folded, authors and languages
//! are sorted, and every field is followed by a `0x1f` unit separator so
//! that `("ab", "c")` and `("a", "bc")` never collide.

use sha2::{Digest, Sha256};

use crate::models::{EntryId, NormalizedRecord, SourceId};

const SEPARATOR: u8 = 0x1f;

/// Fingerprint of a normalized record's title, subtitle, authors and
/// languages.
pub fn record_fingerprint(record: &NormalizedRecord) -> String {
    let mut authors: Vec<String> = record.authors.iter().map(|a| fold(a)).collect();
    authors.sort();
    let mut languages: Vec<String> = record.languages.iter().map(|l| fold(l)).collect();
    languages.sort();

    let mut hasher = Sha256::new();
    for field in [
        record.title.as_deref().unwrap_or(""),
        record.subtitle.as_deref().unwrap_or(""),
    ] {
        hasher.update(fold(field).as_bytes());
        hasher.update([SEPARATOR]);
    }
    for group in [&authors, &languages] {
        for value in group {
            hasher.update(value.as_bytes());
            hasher.update([SEPARATOR]);
        }
        hasher.update([SEPARATOR]);
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of an aggregation known only by name.
pub fn name_fingerprint(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic identifier for a virtual record anchoring `aggregation`
/// under `source`. Stable across reruns so synthesis stays idempotent.
pub fn virtual_identifier(source: SourceId, aggregation: EntryId) -> String {
    format!("virtual:site-{}:aggregation-{}", source, aggregation)
}

fn fold(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
