//! Reconciliation: the central write path.
//!
//! [`reconcile`] takes one normalized record from one source and brings
//! the catalog in line with it:
//!
//! 1. Author names and language codes are resolved through the source's
//!    alias table, and an [`Agent`] / [`Language`](crate::models::Language)
//!    is fetched or created for each.
//! 2. The [`SourceRecord`] keyed by `(source, identifier)` is created or
//!    overwritten in place.
//! 3. A deleted record is removed; its entry survives and is reported as
//!    [`ReconcileOutcome::severed`].
//! 4. An unattached record is attached to the entry carrying the same
//!    fingerprint and aggregation flag, or to a new one.
//! 5. The entry's display fields and its author/language sets are updated
//!    per [`AssociationPolicy`].
//! 6. Every nested aggregation becomes an aggregation-flagged child record
//!    reconciled through the same path, joined to the parent by a
//!    membership edge and an ordered source link.
//!
//! Every step is a get-or-create or an in-place overwrite, so running the
//! same record twice leaves the catalog exactly as running it once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::models::{
    AgentId, AggregationRef, Entry, EntryId, NewEntry, NewSourceRecord, NormalizedRecord,
    RecordFields, Source, SourceRecord,
};
use crate::registry::{language_key, AliasField, AliasTable};
use crate::store::Store;
use crate::upsert::{get_or_create, DEFAULT_ATTEMPTS};

/// Titles and subtitles longer than this are cut and marked with `...`.
pub const MAX_TITLE_CHARS: usize = 250;

/// How an entry's author and language sets react to a new sighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationPolicy {
    /// The sets become exactly what this sighting carries.
    #[default]
    Replace,
    /// This sighting's values are appended to the existing sets.
    Merge,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub associations: AssociationPolicy,
    /// Rounds of the get-or-create loop before giving up.
    pub upsert_attempts: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            associations: AssociationPolicy::Replace,
            upsert_attempts: DEFAULT_ATTEMPTS,
        }
    }
}

/// What one reconciliation touched.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// The record's entry followed by its aggregation entries. Empty for
    /// deleted records.
    pub entries: Vec<Entry>,
    /// Entry a deleted record used to point at.
    pub severed: Option<EntryId>,
}

impl ReconcileOutcome {
    /// Entry ids that need re-projection.
    pub fn affected(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.id).chain(self.severed).collect()
    }
}

/// Reconcile one normalized record from `source`.
///
/// Fails with [`CatalogError::Validation`] when a non-deleted record has
/// no fingerprint; nothing is written in that case.
pub async fn reconcile<S: Store + ?Sized>(
    store: &S,
    source: &Source,
    mut record: NormalizedRecord,
    aliases: &AliasTable,
    now: DateTime<Utc>,
    options: &ReconcileOptions,
) -> Result<ReconcileOutcome> {
    if record.deleted {
        resolve_authors(store, &record.authors, aliases, options).await?;
        resolve_languages(store, &record.languages, aliases, options).await?;
        return remove_record(store, source, &record.identifier).await;
    }

    let aggregations = std::mem::take(&mut record.aggregations);
    let (entry, parent) = reconcile_single(store, source, &record, false, aliases, now, options).await?;

    let mut entries = vec![entry.clone()];
    for agg in &aggregations {
        let child = aggregation_record(agg, &parent.fields);
        let (agg_entry, agg_record) =
            reconcile_single(store, source, &child, true, aliases, now, options).await?;
        link_aggregation(store, &agg_entry, &entry, &agg_record, &parent, agg, options).await?;
        entries.push(agg_entry);
    }

    Ok(ReconcileOutcome {
        entries,
        severed: None,
    })
}

async fn remove_record<S: Store + ?Sized>(
    store: &S,
    source: &Source,
    identifier: &str,
) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();
    if let Some(existing) = store.find_record(source.id, identifier).await? {
        tracing::debug!("{}: deleting record {}", source.name, identifier);
        store.delete_record(existing.id).await?;
        outcome.severed = existing.entry_id;
    }
    Ok(outcome)
}

/// Steps 1 to 5 for a single record, without its nested aggregations.
async fn reconcile_single<S: Store + ?Sized>(
    store: &S,
    source: &Source,
    record: &NormalizedRecord,
    is_aggregation: bool,
    aliases: &AliasTable,
    now: DateTime<Utc>,
    options: &ReconcileOptions,
) -> Result<(Entry, SourceRecord)> {
    let checksum = match record.checksum.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => {
            return Err(CatalogError::Validation {
                identifier: record.identifier.clone(),
                reason: "a non-deleted record must carry a checksum".into(),
            })
        }
    };

    let authors = resolve_authors(store, &record.authors, aliases, options).await?;
    let languages = resolve_languages(store, &record.languages, aliases, options).await?;

    let mut source_record = upsert_record(store, source, record, is_aggregation, now, options).await?;

    let title = display_value(record.title.as_deref(), AliasField::Title, aliases)
        .unwrap_or_default();
    let subtitle = display_value(record.subtitle.as_deref(), AliasField::Subtitle, aliases);

    let attached = match source_record.entry_id {
        Some(id) => store.get_entry(id).await?,
        None => None,
    };
    let entry = match attached {
        Some(entry) => entry,
        None => {
            let entry = find_or_create_entry(store, &checksum, is_aggregation, &title, subtitle.as_deref())
                .await?;
            store.set_record_entry(source_record.id, Some(entry.id)).await?;
            source_record.entry_id = Some(entry.id);
            entry
        }
    };

    store
        .update_entry_display(entry.id, &title, subtitle.as_deref())
        .await?;

    match options.associations {
        AssociationPolicy::Replace => {
            store.set_entry_authors(entry.id, &authors).await?;
            store.set_entry_languages(entry.id, &languages).await?;
        }
        AssociationPolicy::Merge => {
            let mut all_authors: Vec<AgentId> =
                store.entry_authors(entry.id).await?.iter().map(|a| a.id).collect();
            extend_unique(&mut all_authors, authors);
            store.set_entry_authors(entry.id, &all_authors).await?;

            let mut all_languages: Vec<String> = store
                .entry_languages(entry.id)
                .await?
                .into_iter()
                .map(|l| l.code)
                .collect();
            extend_unique(&mut all_languages, languages);
            store.set_entry_languages(entry.id, &all_languages).await?;
        }
    }

    let entry = store
        .get_entry(entry.id)
        .await?
        .ok_or(CatalogError::NotFound {
            kind: "entry",
            id: entry.id,
        })?;
    Ok((entry, source_record))
}

async fn resolve_authors<S: Store + ?Sized>(
    store: &S,
    names: &[String],
    aliases: &AliasTable,
    options: &ReconcileOptions,
) -> Result<Vec<AgentId>> {
    let mut ids = Vec::with_capacity(names.len());
    for raw in names {
        let name = aliases.resolve(AliasField::Author, raw.trim()).trim();
        if name.is_empty() {
            continue;
        }
        let agent = get_or_create(
            "agent",
            options.upsert_attempts,
            || store.find_agent_by_name(name),
            || store.insert_agent(name),
        )
        .await?;
        if agent.created {
            tracing::debug!("created agent {} '{}'", agent.value.id, name);
        }
        if !ids.contains(&agent.value.id) {
            ids.push(agent.value.id);
        }
    }
    Ok(ids)
}

async fn resolve_languages<S: Store + ?Sized>(
    store: &S,
    codes: &[String],
    aliases: &AliasTable,
    options: &ReconcileOptions,
) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(codes.len());
    for raw in codes {
        let key = language_key(raw);
        let code = aliases.resolve(AliasField::Language, &key).trim().to_string();
        if code.is_empty() {
            continue;
        }
        let language = get_or_create(
            "language",
            options.upsert_attempts,
            || store.find_language(&code),
            || store.insert_language(&code),
        )
        .await?;
        if !out.contains(&language.value.code) {
            out.push(language.value.code);
        }
    }
    Ok(out)
}

async fn upsert_record<S: Store + ?Sized>(
    store: &S,
    source: &Source,
    record: &NormalizedRecord,
    is_aggregation: bool,
    now: DateTime<Utc>,
    options: &ReconcileOptions,
) -> Result<SourceRecord> {
    let fields = record.record_fields();
    let new = NewSourceRecord {
        source_id: source.id,
        identifier: record.identifier.clone(),
        is_aggregation,
        entry_id: None,
        datetime: now,
        fields: fields.clone(),
    };
    let upserted = get_or_create(
        "source record",
        options.upsert_attempts,
        || store.find_record(source.id, &record.identifier),
        || store.insert_record(&new),
    )
    .await?;

    let mut row = upserted.value;
    if !upserted.created {
        store.update_record_fields(row.id, now, &fields).await?;
        row.datetime = now;
        row.fields = fields;
    }
    Ok(row)
}

async fn find_or_create_entry<S: Store + ?Sized>(
    store: &S,
    checksum: &str,
    is_aggregation: bool,
    title: &str,
    subtitle: Option<&str>,
) -> Result<Entry> {
    let mut found = store.find_entries_by_checksum(checksum, is_aggregation).await?;
    if found.len() > 1 {
        tracing::warn!(
            "{} entries share checksum {}, using entry {}",
            found.len(),
            checksum,
            found[0].id
        );
    }
    if !found.is_empty() {
        return Ok(found.swap_remove(0));
    }
    let entry = store
        .insert_entry(&NewEntry {
            title: title.to_string(),
            subtitle: subtitle.map(str::to_string),
            checksum: checksum.to_string(),
            is_aggregation,
        })
        .await?;
    tracing::debug!("created entry {} '{}'", entry.id, entry.title);
    Ok(entry)
}

/// Create the membership and source link between an aggregation and its
/// member, then apply the supplied position.
async fn link_aggregation<S: Store + ?Sized>(
    store: &S,
    aggregation: &Entry,
    aggregated: &Entry,
    aggregation_record: &SourceRecord,
    aggregated_record: &SourceRecord,
    agg: &AggregationRef,
    options: &ReconcileOptions,
) -> Result<()> {
    let membership = get_or_create(
        "aggregation membership",
        options.upsert_attempts,
        || store.find_membership(aggregation.id, aggregated.id),
        || store.insert_membership(aggregation.id, aggregated.id),
    )
    .await?;
    if membership.created {
        tracing::debug!(
            "entry {} now aggregates entry {}",
            aggregation.id,
            aggregated.id
        );
    }

    let link = get_or_create(
        "aggregation source link",
        options.upsert_attempts,
        || store.find_link(aggregation_record.id, aggregated_record.id),
        || store.insert_link(aggregation_record.id, aggregated_record.id),
    )
    .await?
    .value;

    if agg.has_order() {
        let pos = agg.sorting_pos();
        if pos.is_none() {
            tracing::debug!(
                "ignoring non-numeric order {:?} in {}",
                agg.order,
                agg.identifier
            );
        }
        if link.sorting_pos != pos {
            store.set_link_sorting_pos(link.id, pos).await?;
        }
    }
    Ok(())
}

/// The synthetic record standing for one aggregation a record belongs to.
/// Edition and location details are inherited from the member's record.
fn aggregation_record(agg: &AggregationRef, parent: &RecordFields) -> NormalizedRecord {
    NormalizedRecord {
        identifier: agg.identifier.clone(),
        deleted: false,
        checksum: Some(agg.checksum.clone()),
        title: Some(agg.name.clone()),
        uri: agg.linkage.clone(),
        uri_label: parent.uri_label.clone(),
        year_edition: parent.year_edition,
        year_first_edition: parent.year_first_edition,
        content_type: parent.content_type.clone(),
        full_data: agg.full_data.clone(),
        ..Default::default()
    }
}

/// Truncate, then alias. Empty values become `None`.
fn display_value(raw: Option<&str>, field: AliasField, aliases: &AliasTable) -> Option<String> {
    let raw = raw?;
    if raw.is_empty() {
        return None;
    }
    let value = truncate_title(raw);
    Some(aliases.resolve(field, &value).to_string())
}

/// Cut `value` to [`MAX_TITLE_CHARS`] characters plus `...` when longer.
pub fn truncate_title(value: &str) -> String {
    match value.char_indices().nth(MAX_TITLE_CHARS) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}

fn extend_unique<T: PartialEq>(into: &mut Vec<T>, values: Vec<T>) {
    for value in values {
        if !into.contains(&value) {
            into.push(value);
        }
    }
}
