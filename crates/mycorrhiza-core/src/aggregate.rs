//! Operator-driven aggregation: "this issue contains these articles".
//!
//! Harvested records carry their own aggregation memberships (see
//! [`crate::reconcile`]); this module handles the curated case, where an
//! operator attaches existing entries to an aggregation after the fact.
//!
//! Entry-level membership alone is not enough for display, which works per
//! source: for every source an aggregated entry was seen on, the
//! aggregation needs a record on that same source to hang the ordered link
//! from. When the source never published one, a *virtual* record is
//! synthesized under a deterministic identifier, so reruns find it again
//! instead of duplicating it.

use serde_json::json;

use crate::error::{Outcome, StoreResult};
use crate::fingerprint::{name_fingerprint, virtual_identifier};
use crate::models::{Entry, EntryId, NewEntry, NewSourceRecord, RecordFields, SourceRecord};
use crate::store::Store;
use crate::upsert::get_or_create;

pub const NOT_AN_AGGREGATION: &str = "First item is not an aggregation";
pub const NOTHING_TO_DO: &str = "Nothing to do. Expecting an aggregation and normal entries";

/// Result of [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub outcome: Outcome,
    /// The aggregation followed by every valid aggregated entry.
    pub reindex: Vec<EntryId>,
}

impl AggregateResult {
    fn rejected(message: &str) -> Self {
        Self {
            outcome: Outcome::Error(message.to_string()),
            reindex: Vec::new(),
        }
    }
}

/// Attach `aggregated` entries to the aggregation entry `aggregation`.
///
/// Ids that do not resolve, and ids of other aggregations, are skipped.
/// Nothing is written unless the first id is an aggregation and at least
/// one member is valid. `attempts` bounds each get-or-create.
pub async fn aggregate<S: Store + ?Sized>(
    store: &S,
    aggregation: EntryId,
    aggregated: &[EntryId],
    attempts: usize,
) -> StoreResult<AggregateResult> {
    let parent = match store.get_entry(aggregation).await? {
        Some(entry) if entry.is_aggregation => entry,
        _ => return Ok(AggregateResult::rejected(NOT_AN_AGGREGATION)),
    };

    let mut members: Vec<Entry> = Vec::new();
    for &id in aggregated {
        if members.iter().any(|m| m.id == id) {
            continue;
        }
        match store.get_entry(id).await? {
            Some(entry) if !entry.is_aggregation => members.push(entry),
            Some(_) => tracing::debug!("aggregate: entry {} is itself an aggregation", id),
            None => tracing::debug!("aggregate: entry {} not found", id),
        }
    }
    if members.is_empty() {
        return Ok(AggregateResult::rejected(NOTHING_TO_DO));
    }

    let mut reindex = vec![parent.id];
    let mut member_records: Vec<SourceRecord> = Vec::new();
    for member in &members {
        reindex.push(member.id);
        member_records.extend(store.records_for_entry(member.id).await?);
        let membership = get_or_create(
            "aggregation membership",
            attempts,
            || store.find_membership(parent.id, member.id),
            || store.insert_membership(parent.id, member.id),
        )
        .await?;
        if membership.created {
            tracing::info!("created aggregation membership {}", membership.value.id);
        }
    }

    for record in &member_records {
        let mut anchors: Vec<SourceRecord> = store
            .records_for_entry(parent.id)
            .await?
            .into_iter()
            .filter(|r| r.source_id == record.source_id)
            .collect();
        if anchors.is_empty() {
            tracing::info!("creating virtual record for {}", record.identifier);
            anchors.push(virtual_record(store, &parent, record.source_id, attempts).await?);
        } else {
            tracing::debug!("{} already has an aggregation record", record.identifier);
        }

        for anchor in &anchors {
            let link = get_or_create(
                "aggregation source link",
                attempts,
                || store.find_link(anchor.id, record.id),
                || store.insert_link(anchor.id, record.id),
            )
            .await?;
            if link.created {
                tracing::info!("created aggregation source link {}", link.value.id);
            }
        }
    }

    Ok(AggregateResult {
        outcome: Outcome::Success(format!("Reindexed {} items", reindex.len())),
        reindex,
    })
}

async fn virtual_record<S: Store + ?Sized>(
    store: &S,
    aggregation: &Entry,
    source: i64,
    attempts: usize,
) -> StoreResult<SourceRecord> {
    let identifier = virtual_identifier(source, aggregation.id);
    let new = NewSourceRecord {
        source_id: source,
        identifier: identifier.clone(),
        is_aggregation: true,
        entry_id: Some(aggregation.id),
        datetime: aggregation.last_modified,
        fields: RecordFields {
            full_data: json!({}),
            ..Default::default()
        },
    };
    let upserted = get_or_create(
        "virtual record",
        attempts,
        || store.find_record(source, &identifier),
        || store.insert_record(&new),
    )
    .await?;
    Ok(upserted.value)
}

/// Fetch or create an aggregation entry known only by its name.
///
/// Its fingerprint is the SHA-256 of the name. Returns `None` for an empty
/// name.
pub async fn create_virtual_aggregation<S: Store + ?Sized>(
    store: &S,
    name: &str,
) -> StoreResult<Option<Entry>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let checksum = name_fingerprint(name);
    let mut found: Vec<Entry> = store
        .find_entries_by_checksum(&checksum, true)
        .await?
        .into_iter()
        .filter(|e| e.title == name)
        .collect();
    if found.len() > 1 {
        tracing::warn!(
            "{} aggregations named '{}', using entry {}",
            found.len(),
            name,
            found[0].id
        );
    }
    if !found.is_empty() {
        return Ok(Some(found.swap_remove(0)));
    }
    let entry = store
        .insert_entry(&NewEntry {
            title: name.to_string(),
            subtitle: None,
            checksum,
            is_aggregation: true,
        })
        .await?;
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::test_support::{ingest, library, record, source};
    use crate::upsert::DEFAULT_ATTEMPTS;

    #[tokio::test]
    async fn test_first_item_must_be_aggregation() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let ids = ingest(&store, &site, record("oai:a:1", "Pizza", &[])).await;

        let res = aggregate(&store, ids[0], &ids, DEFAULT_ATTEMPTS).await.unwrap();
        assert_eq!(res.outcome, Outcome::Error(NOT_AN_AGGREGATION.into()));
        let res = aggregate(&store, 999, &ids, DEFAULT_ATTEMPTS).await.unwrap();
        assert_eq!(res.outcome, Outcome::Error(NOT_AN_AGGREGATION.into()));
    }

    #[tokio::test]
    async fn test_no_valid_members_mutates_nothing() {
        let store = InMemoryStore::new();
        let issue = create_virtual_aggregation(&store, "Issue 1").await.unwrap().unwrap();
        let other = create_virtual_aggregation(&store, "Issue 2").await.unwrap().unwrap();
        let before = store.counts().await.unwrap();

        let res = aggregate(&store, issue.id, &[other.id, 12345], DEFAULT_ATTEMPTS).await.unwrap();
        assert_eq!(res.outcome, Outcome::Error(NOTHING_TO_DO.into()));
        assert_eq!(store.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_virtual_records_are_created_once() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let a = source(&store, &lib, "a").await;
        let b = source(&store, &lib, "b").await;
        let first = ingest(&store, &a, record("oai:a:1", "One", &[])).await[0];
        let second = ingest(&store, &b, record("oai:b:2", "Two", &[])).await[0];
        let issue = create_virtual_aggregation(&store, "Issue 1").await.unwrap().unwrap();

        let res = aggregate(&store, issue.id, &[first, second], DEFAULT_ATTEMPTS).await.unwrap();
        assert_eq!(res.outcome, Outcome::Success("Reindexed 3 items".into()));
        assert_eq!(res.reindex, vec![issue.id, first, second]);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.memberships, 2);
        assert_eq!(counts.links, 2);
        assert_eq!(counts.aggregation_records, 2, "one virtual record per source");

        let anchor = store
            .find_record(a.id, &virtual_identifier(a.id, issue.id))
            .await
            .unwrap()
            .unwrap();
        assert!(anchor.is_aggregation);
        assert_eq!(anchor.entry_id, Some(issue.id));

        aggregate(&store, issue.id, &[first, second], DEFAULT_ATTEMPTS).await.unwrap();
        assert_eq!(store.counts().await.unwrap(), counts);
    }

    #[tokio::test]
    async fn test_existing_aggregation_record_is_reused() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let article = ingest(&store, &site, record("oai:a:1", "One", &[])).await[0];

        let issue = create_virtual_aggregation(&store, "Issue").await.unwrap().unwrap();
        let issue_record = store
            .insert_record(&NewSourceRecord {
                source_id: site.id,
                identifier: "oai:a:issue".into(),
                is_aggregation: true,
                entry_id: Some(issue.id),
                datetime: issue.last_modified,
                fields: RecordFields::default(),
            })
            .await
            .unwrap();

        aggregate(&store, issue.id, &[article], DEFAULT_ATTEMPTS).await.unwrap();
        let links = store.links_from(issue_record.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert!(store
            .find_record(site.id, &virtual_identifier(site.id, issue.id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_virtual_aggregation_by_name() {
        let store = InMemoryStore::new();
        assert!(create_virtual_aggregation(&store, "  ").await.unwrap().is_none());
        let a = create_virtual_aggregation(&store, "Anarchy Now!").await.unwrap().unwrap();
        let b = create_virtual_aggregation(&store, "Anarchy Now!").await.unwrap().unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.is_aggregation);
        assert_eq!(a.checksum, name_fingerprint("Anarchy Now!"));
    }

    #[tokio::test]
    async fn test_same_named_aggregations_resolve_to_lowest() {
        let store = InMemoryStore::new();
        let mut twins = Vec::new();
        for _ in 0..2 {
            let entry = store
                .insert_entry(&NewEntry {
                    title: "Issue 7".into(),
                    subtitle: None,
                    checksum: name_fingerprint("Issue 7"),
                    is_aggregation: true,
                })
                .await
                .unwrap();
            twins.push(entry.id);
        }

        let found = create_virtual_aggregation(&store, "Issue 7").await.unwrap().unwrap();
        assert_eq!(found.id, twins[0]);
        assert_eq!(store.counts().await.unwrap().entries, 2);
    }
}
