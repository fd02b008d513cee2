//! Storage abstraction for the catalog.
//!
//! The [`Store`] trait defines every relational operation the engines
//! need, so the same reconciliation, canonicalization, aggregation and
//! projection code runs against SQLite in production and against
//! [`memory::InMemoryStore`] in tests.
//!
//! Uniqueness constraints are part of the contract: inserts that would
//! violate one must fail with [`StoreError::Conflict`](crate::error::StoreError::Conflict)
//! rather than overwrite, because the engines' get-or-create loop
//! ([`crate::upsert`]) depends on that signal.
//!
//! | Row | Unique on |
//! |-----|-----------|
//! | library, source | name |
//! | agent | name |
//! | language | code |
//! | source record | (source, identifier) |
//! | aggregation membership | (aggregation entry, aggregated entry) |
//! | aggregation source link | (aggregation record, aggregated record) |
//!
//! Entry fingerprints are deliberately *not* unique; see
//! [`Store::find_entries_by_checksum`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{
    Agent, AgentId, AggregationMembership, AggregationSourceLink, CatalogCounts, Entry, EntryId,
    Language, Library, LibraryId, LinkId, NewEntry, NewLibrary, NewSource, NewSourceRecord,
    RecordFields, RecordId, Source, SourceId, SourceRecord,
};
use crate::registry::NameAlias;

/// Abstract storage backend for the catalog.
///
/// All list-returning methods return rows ordered by id ascending unless
/// stated otherwise, which keeps projections deterministic.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Source registry ─────────────────────────────────────────────

    /// Insert a library, or update url and flags of the one with this name.
    async fn upsert_library(&self, library: &NewLibrary) -> StoreResult<Library>;

    async fn get_library(&self, id: LibraryId) -> StoreResult<Option<Library>>;

    async fn set_library_flags(&self, id: LibraryId, public: bool, active: bool)
        -> StoreResult<()>;

    /// Insert a source, or update the one with this name. The harvest
    /// cursor is preserved.
    async fn upsert_source(&self, source: &NewSource) -> StoreResult<Source>;

    async fn get_source(&self, id: SourceId) -> StoreResult<Option<Source>>;

    async fn list_sources(&self) -> StoreResult<Vec<Source>>;

    async fn set_last_harvested(&self, id: SourceId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Replace the whole alias table of a source.
    async fn replace_aliases(&self, source: SourceId, aliases: &[NameAlias]) -> StoreResult<()>;

    async fn aliases(&self, source: SourceId) -> StoreResult<Vec<NameAlias>>;

    /// Append a harvest log row.
    async fn record_harvest(
        &self,
        source: SourceId,
        at: DateTime<Utc>,
        logs: &str,
    ) -> StoreResult<()>;

    // ── Agents and languages ────────────────────────────────────────

    async fn find_agent_by_name(&self, name: &str) -> StoreResult<Option<Agent>>;

    /// Fails with `Conflict` when the name is taken.
    async fn insert_agent(&self, name: &str) -> StoreResult<Agent>;

    async fn get_agent(&self, id: AgentId) -> StoreResult<Option<Agent>>;

    async fn set_agent_canonical(&self, id: AgentId, canonical: Option<AgentId>)
        -> StoreResult<()>;

    /// Agents whose canonical pointer is `id`.
    async fn agent_variants(&self, id: AgentId) -> StoreResult<Vec<Agent>>;

    /// Clear every agent canonical pointer. Returns the number cleared.
    async fn clear_agent_canonicals(&self) -> StoreResult<u64>;

    async fn find_language(&self, code: &str) -> StoreResult<Option<Language>>;

    /// Fails with `Conflict` when the code exists.
    async fn insert_language(&self, code: &str) -> StoreResult<Language>;

    // ── Entries ─────────────────────────────────────────────────────

    /// Entries with this fingerprint and aggregation flag, oldest first.
    /// More than one row is possible under concurrent writers; callers
    /// take the first.
    async fn find_entries_by_checksum(
        &self,
        checksum: &str,
        is_aggregation: bool,
    ) -> StoreResult<Vec<Entry>>;

    async fn insert_entry(&self, entry: &NewEntry) -> StoreResult<Entry>;

    async fn get_entry(&self, id: EntryId) -> StoreResult<Option<Entry>>;

    async fn entry_ids(&self) -> StoreResult<Vec<EntryId>>;

    async fn update_entry_display(
        &self,
        id: EntryId,
        title: &str,
        subtitle: Option<&str>,
    ) -> StoreResult<()>;

    /// Authors in the order they were assigned.
    async fn entry_authors(&self, id: EntryId) -> StoreResult<Vec<Agent>>;

    /// Replace the author set, preserving the given order.
    async fn set_entry_authors(&self, id: EntryId, authors: &[AgentId]) -> StoreResult<()>;

    /// Languages in the order they were assigned.
    async fn entry_languages(&self, id: EntryId) -> StoreResult<Vec<Language>>;

    async fn set_entry_languages(&self, id: EntryId, codes: &[String]) -> StoreResult<()>;

    /// Entries authored by `agent`.
    async fn entries_authored_by(&self, agent: AgentId) -> StoreResult<Vec<EntryId>>;

    async fn set_entry_canonical(&self, id: EntryId, canonical: Option<EntryId>)
        -> StoreResult<()>;

    /// Entries whose canonical pointer is `id`.
    async fn entry_variants(&self, id: EntryId) -> StoreResult<Vec<Entry>>;

    /// Clear every entry canonical pointer. Returns the number cleared.
    async fn clear_entry_canonicals(&self) -> StoreResult<u64>;

    async fn set_entry_original(&self, id: EntryId, original: Option<EntryId>)
        -> StoreResult<()>;

    /// Entries whose original pointer is `id`.
    async fn entry_translations(&self, id: EntryId) -> StoreResult<Vec<Entry>>;

    /// Repoint every translation edge that targets one of `from` to `to`.
    /// Returns the ids of the entries whose edge moved.
    async fn repoint_translations(&self, from: &[EntryId], to: EntryId)
        -> StoreResult<Vec<EntryId>>;

    /// Cache the projected document on the entry.
    async fn save_indexed_data(&self, id: EntryId, data: &serde_json::Value) -> StoreResult<()>;

    // ── Source records ──────────────────────────────────────────────

    async fn find_record(&self, source: SourceId, identifier: &str)
        -> StoreResult<Option<SourceRecord>>;

    /// Fails with `Conflict` when `(source, identifier)` exists.
    async fn insert_record(&self, record: &NewSourceRecord) -> StoreResult<SourceRecord>;

    async fn get_record(&self, id: RecordId) -> StoreResult<Option<SourceRecord>>;

    async fn update_record_fields(
        &self,
        id: RecordId,
        datetime: DateTime<Utc>,
        fields: &RecordFields,
    ) -> StoreResult<()>;

    async fn set_record_entry(&self, id: RecordId, entry: Option<EntryId>) -> StoreResult<()>;

    /// Delete a record and every aggregation link touching it. The entry
    /// it pointed to is left alone.
    async fn delete_record(&self, id: RecordId) -> StoreResult<()>;

    async fn records_for_entry(&self, entry: EntryId) -> StoreResult<Vec<SourceRecord>>;

    /// Distinct entries the records of a source are attached to.
    async fn source_entry_ids(&self, source: SourceId) -> StoreResult<Vec<EntryId>>;

    /// Delete every record of a source. Returns the distinct entries they
    /// were attached to.
    async fn delete_records_for_source(&self, source: SourceId) -> StoreResult<Vec<EntryId>>;

    // ── Aggregation edges ───────────────────────────────────────────

    async fn find_membership(
        &self,
        aggregation: EntryId,
        aggregated: EntryId,
    ) -> StoreResult<Option<AggregationMembership>>;

    /// Fails with `Conflict` when the pair exists.
    async fn insert_membership(
        &self,
        aggregation: EntryId,
        aggregated: EntryId,
    ) -> StoreResult<AggregationMembership>;

    /// Entries contained in aggregation `id`.
    async fn aggregated_entries(&self, id: EntryId) -> StoreResult<Vec<EntryId>>;

    /// Aggregations containing entry `id`.
    async fn aggregation_entries(&self, id: EntryId) -> StoreResult<Vec<EntryId>>;

    async fn find_link(
        &self,
        aggregation: RecordId,
        aggregated: RecordId,
    ) -> StoreResult<Option<AggregationSourceLink>>;

    /// Fails with `Conflict` when the pair exists.
    async fn insert_link(
        &self,
        aggregation: RecordId,
        aggregated: RecordId,
    ) -> StoreResult<AggregationSourceLink>;

    async fn set_link_sorting_pos(&self, id: LinkId, sorting_pos: Option<i64>) -> StoreResult<()>;

    /// Links where `record` is the aggregation, ordered by `sorting_pos`
    /// with unset positions last, then by id.
    async fn links_from(&self, record: RecordId) -> StoreResult<Vec<AggregationSourceLink>>;

    /// Links where `record` is the aggregated item, same ordering as
    /// [`links_from`](Store::links_from).
    async fn links_to(&self, record: RecordId) -> StoreResult<Vec<AggregationSourceLink>>;

    // ── Reporting ───────────────────────────────────────────────────

    async fn counts(&self) -> StoreResult<CatalogCounts>;
}
