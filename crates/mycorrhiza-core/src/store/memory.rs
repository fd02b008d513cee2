//! In-memory [`Store`] implementation for tests.
//!
//! All tables live in one [`Tables`] value behind a `std::sync::RwLock`, so
//! every trait call observes and mutates a consistent snapshot. Uniqueness
//! constraints are enforced exactly like the SQLite schema enforces them:
//! a duplicate insert returns [`StoreError::Conflict`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::models::{
    Agent, AgentId, AggregationMembership, AggregationSourceLink, CatalogCounts, Entry, EntryId,
    Language, Library, LibraryId, LinkId, NewEntry, NewLibrary, NewSource, NewSourceRecord,
    RecordFields, RecordId, Source, SourceId, SourceRecord,
};
use crate::registry::NameAlias;

use super::Store;

/// One harvest log row.
#[derive(Debug, Clone)]
pub struct HarvestLog {
    pub source_id: SourceId,
    pub datetime: DateTime<Utc>,
    pub logs: String,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    libraries: BTreeMap<LibraryId, Library>,
    sources: BTreeMap<SourceId, Source>,
    aliases: HashMap<SourceId, Vec<NameAlias>>,
    harvests: Vec<HarvestLog>,
    agents: BTreeMap<AgentId, Agent>,
    languages: BTreeSet<String>,
    entries: BTreeMap<EntryId, Entry>,
    entry_authors: HashMap<EntryId, Vec<AgentId>>,
    entry_languages: HashMap<EntryId, Vec<String>>,
    records: BTreeMap<RecordId, SourceRecord>,
    memberships: BTreeMap<LinkId, AggregationMembership>,
    links: BTreeMap<LinkId, AggregationSourceLink>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn entry_mut(&mut self, id: EntryId) -> StoreResult<&mut Entry> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("entry {}", id)))
    }

    fn record_mut(&mut self, id: RecordId) -> StoreResult<&mut SourceRecord> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("record {}", id)))
    }

    fn ordered_links<F>(&self, keep: F) -> Vec<AggregationSourceLink>
    where
        F: Fn(&AggregationSourceLink) -> bool,
    {
        let mut out: Vec<AggregationSourceLink> =
            self.links.values().filter(|l| keep(l)).cloned().collect();
        out.sort_by_key(|l| (l.sorting_pos.is_none(), l.sorting_pos, l.id));
        out
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Harvest log rows written so far, oldest first.
    pub fn harvest_logs(&self) -> Vec<HarvestLog> {
        self.read().harvests.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_library(&self, library: &NewLibrary) -> StoreResult<Library> {
        let mut t = self.write();
        if let Some(existing) = t.libraries.values_mut().find(|l| l.name == library.name) {
            existing.url = library.url.clone();
            existing.public = library.public;
            existing.active = library.active;
            return Ok(existing.clone());
        }
        let id = t.next_id();
        let row = Library {
            id,
            name: library.name.clone(),
            url: library.url.clone(),
            public: library.public,
            active: library.active,
        };
        t.libraries.insert(id, row.clone());
        Ok(row)
    }

    async fn get_library(&self, id: LibraryId) -> StoreResult<Option<Library>> {
        Ok(self.read().libraries.get(&id).cloned())
    }

    async fn set_library_flags(
        &self,
        id: LibraryId,
        public: bool,
        active: bool,
    ) -> StoreResult<()> {
        let mut t = self.write();
        let lib = t
            .libraries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("library {}", id)))?;
        lib.public = public;
        lib.active = active;
        Ok(())
    }

    async fn upsert_source(&self, source: &NewSource) -> StoreResult<Source> {
        let mut t = self.write();
        if !t.libraries.contains_key(&source.library_id) {
            return Err(StoreError::NotFound(format!("library {}", source.library_id)));
        }
        if let Some(existing) = t.sources.values_mut().find(|s| s.name == source.name) {
            existing.library_id = source.library_id;
            existing.url = source.url.clone();
            existing.active = source.active;
            existing.harvest_set = source.harvest_set.clone();
            return Ok(existing.clone());
        }
        let id = t.next_id();
        let row = Source {
            id,
            library_id: source.library_id,
            name: source.name.clone(),
            url: source.url.clone(),
            active: source.active,
            last_harvested: None,
            harvest_set: source.harvest_set.clone(),
        };
        t.sources.insert(id, row.clone());
        Ok(row)
    }

    async fn get_source(&self, id: SourceId) -> StoreResult<Option<Source>> {
        Ok(self.read().sources.get(&id).cloned())
    }

    async fn list_sources(&self) -> StoreResult<Vec<Source>> {
        Ok(self.read().sources.values().cloned().collect())
    }

    async fn set_last_harvested(&self, id: SourceId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.write();
        let source = t
            .sources
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("source {}", id)))?;
        source.last_harvested = Some(at);
        Ok(())
    }

    async fn replace_aliases(&self, source: SourceId, aliases: &[NameAlias]) -> StoreResult<()> {
        let mut rows: Vec<NameAlias> = Vec::with_capacity(aliases.len());
        for alias in aliases {
            if rows
                .iter()
                .any(|r| r.field == alias.field && r.value == alias.value)
            {
                return Err(StoreError::Conflict(format!(
                    "alias {}:{} for source {}",
                    alias.field, alias.value, source
                )));
            }
            rows.push(NameAlias {
                source_id: source,
                ..alias.clone()
            });
        }
        self.write().aliases.insert(source, rows);
        Ok(())
    }

    async fn aliases(&self, source: SourceId) -> StoreResult<Vec<NameAlias>> {
        Ok(self.read().aliases.get(&source).cloned().unwrap_or_default())
    }

    async fn record_harvest(
        &self,
        source: SourceId,
        at: DateTime<Utc>,
        logs: &str,
    ) -> StoreResult<()> {
        self.write().harvests.push(HarvestLog {
            source_id: source,
            datetime: at,
            logs: logs.to_string(),
        });
        Ok(())
    }

    async fn find_agent_by_name(&self, name: &str) -> StoreResult<Option<Agent>> {
        Ok(self.read().agents.values().find(|a| a.name == name).cloned())
    }

    async fn insert_agent(&self, name: &str) -> StoreResult<Agent> {
        let mut t = self.write();
        if t.agents.values().any(|a| a.name == name) {
            return Err(StoreError::Conflict(format!("agent '{}'", name)));
        }
        let id = t.next_id();
        let agent = Agent {
            id,
            name: name.to_string(),
            canonical_agent: None,
        };
        t.agents.insert(id, agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: AgentId) -> StoreResult<Option<Agent>> {
        Ok(self.read().agents.get(&id).cloned())
    }

    async fn set_agent_canonical(
        &self,
        id: AgentId,
        canonical: Option<AgentId>,
    ) -> StoreResult<()> {
        let mut t = self.write();
        let agent = t
            .agents
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("agent {}", id)))?;
        agent.canonical_agent = canonical;
        Ok(())
    }

    async fn agent_variants(&self, id: AgentId) -> StoreResult<Vec<Agent>> {
        Ok(self
            .read()
            .agents
            .values()
            .filter(|a| a.canonical_agent == Some(id))
            .cloned()
            .collect())
    }

    async fn clear_agent_canonicals(&self) -> StoreResult<u64> {
        let mut t = self.write();
        let mut cleared = 0;
        for agent in t.agents.values_mut() {
            if agent.canonical_agent.take().is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn find_language(&self, code: &str) -> StoreResult<Option<Language>> {
        Ok(self.read().languages.get(code).map(|c| Language { code: c.clone() }))
    }

    async fn insert_language(&self, code: &str) -> StoreResult<Language> {
        if !self.write().languages.insert(code.to_string()) {
            return Err(StoreError::Conflict(format!("language '{}'", code)));
        }
        Ok(Language {
            code: code.to_string(),
        })
    }

    async fn find_entries_by_checksum(
        &self,
        checksum: &str,
        is_aggregation: bool,
    ) -> StoreResult<Vec<Entry>> {
        Ok(self
            .read()
            .entries
            .values()
            .filter(|e| e.checksum == checksum && e.is_aggregation == is_aggregation)
            .cloned()
            .collect())
    }

    async fn insert_entry(&self, entry: &NewEntry) -> StoreResult<Entry> {
        let mut t = self.write();
        let id = t.next_id();
        let now = Utc::now();
        let row = Entry {
            id,
            title: entry.title.clone(),
            subtitle: entry.subtitle.clone(),
            checksum: entry.checksum.clone(),
            is_aggregation: entry.is_aggregation,
            canonical_entry: None,
            original_entry: None,
            indexed_data: None,
            created: now,
            last_modified: now,
        };
        t.entries.insert(id, row.clone());
        Ok(row)
    }

    async fn get_entry(&self, id: EntryId) -> StoreResult<Option<Entry>> {
        Ok(self.read().entries.get(&id).cloned())
    }

    async fn entry_ids(&self) -> StoreResult<Vec<EntryId>> {
        Ok(self.read().entries.keys().copied().collect())
    }

    async fn update_entry_display(
        &self,
        id: EntryId,
        title: &str,
        subtitle: Option<&str>,
    ) -> StoreResult<()> {
        let mut t = self.write();
        let entry = t.entry_mut(id)?;
        entry.title = title.to_string();
        entry.subtitle = subtitle.map(str::to_string);
        entry.last_modified = Utc::now();
        Ok(())
    }

    async fn entry_authors(&self, id: EntryId) -> StoreResult<Vec<Agent>> {
        let t = self.read();
        Ok(t.entry_authors
            .get(&id)
            .map(|ids| ids.iter().filter_map(|a| t.agents.get(a).cloned()).collect())
            .unwrap_or_default())
    }

    async fn set_entry_authors(&self, id: EntryId, authors: &[AgentId]) -> StoreResult<()> {
        let mut t = self.write();
        t.entry_mut(id)?;
        let mut ids: Vec<AgentId> = Vec::with_capacity(authors.len());
        for agent in authors {
            if !t.agents.contains_key(agent) {
                return Err(StoreError::NotFound(format!("agent {}", agent)));
            }
            if !ids.contains(agent) {
                ids.push(*agent);
            }
        }
        t.entry_authors.insert(id, ids);
        Ok(())
    }

    async fn entry_languages(&self, id: EntryId) -> StoreResult<Vec<Language>> {
        Ok(self
            .read()
            .entry_languages
            .get(&id)
            .map(|codes| {
                codes
                    .iter()
                    .map(|c| Language { code: c.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_entry_languages(&self, id: EntryId, codes: &[String]) -> StoreResult<()> {
        let mut t = self.write();
        t.entry_mut(id)?;
        let mut kept: Vec<String> = Vec::with_capacity(codes.len());
        for code in codes {
            if !t.languages.contains(code) {
                return Err(StoreError::NotFound(format!("language '{}'", code)));
            }
            if !kept.contains(code) {
                kept.push(code.clone());
            }
        }
        t.entry_languages.insert(id, kept);
        Ok(())
    }

    async fn entries_authored_by(&self, agent: AgentId) -> StoreResult<Vec<EntryId>> {
        let t = self.read();
        let mut ids: Vec<EntryId> = t
            .entry_authors
            .iter()
            .filter(|(_, authors)| authors.contains(&agent))
            .map(|(entry, _)| *entry)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn set_entry_canonical(
        &self,
        id: EntryId,
        canonical: Option<EntryId>,
    ) -> StoreResult<()> {
        let mut t = self.write();
        let entry = t.entry_mut(id)?;
        entry.canonical_entry = canonical;
        entry.last_modified = Utc::now();
        Ok(())
    }

    async fn entry_variants(&self, id: EntryId) -> StoreResult<Vec<Entry>> {
        Ok(self
            .read()
            .entries
            .values()
            .filter(|e| e.canonical_entry == Some(id))
            .cloned()
            .collect())
    }

    async fn clear_entry_canonicals(&self) -> StoreResult<u64> {
        let mut t = self.write();
        let mut cleared = 0;
        for entry in t.entries.values_mut() {
            if entry.canonical_entry.take().is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn set_entry_original(
        &self,
        id: EntryId,
        original: Option<EntryId>,
    ) -> StoreResult<()> {
        let mut t = self.write();
        let entry = t.entry_mut(id)?;
        entry.original_entry = original;
        entry.last_modified = Utc::now();
        Ok(())
    }

    async fn entry_translations(&self, id: EntryId) -> StoreResult<Vec<Entry>> {
        Ok(self
            .read()
            .entries
            .values()
            .filter(|e| e.original_entry == Some(id))
            .cloned()
            .collect())
    }

    async fn repoint_translations(
        &self,
        from: &[EntryId],
        to: EntryId,
    ) -> StoreResult<Vec<EntryId>> {
        let mut t = self.write();
        let mut moved = Vec::new();
        for entry in t.entries.values_mut() {
            if let Some(original) = entry.original_entry {
                if from.contains(&original) && entry.id != to {
                    entry.original_entry = Some(to);
                    moved.push(entry.id);
                }
            }
        }
        Ok(moved)
    }

    async fn save_indexed_data(&self, id: EntryId, data: &serde_json::Value) -> StoreResult<()> {
        let mut t = self.write();
        t.entry_mut(id)?.indexed_data = Some(data.clone());
        Ok(())
    }

    async fn find_record(
        &self,
        source: SourceId,
        identifier: &str,
    ) -> StoreResult<Option<SourceRecord>> {
        Ok(self
            .read()
            .records
            .values()
            .find(|r| r.source_id == source && r.identifier == identifier)
            .cloned())
    }

    async fn insert_record(&self, record: &NewSourceRecord) -> StoreResult<SourceRecord> {
        let mut t = self.write();
        if !t.sources.contains_key(&record.source_id) {
            return Err(StoreError::NotFound(format!("source {}", record.source_id)));
        }
        if t
            .records
            .values()
            .any(|r| r.source_id == record.source_id && r.identifier == record.identifier)
        {
            return Err(StoreError::Conflict(format!(
                "record {} of source {}",
                record.identifier, record.source_id
            )));
        }
        let id = t.next_id();
        let row = SourceRecord {
            id,
            source_id: record.source_id,
            identifier: record.identifier.clone(),
            entry_id: record.entry_id,
            is_aggregation: record.is_aggregation,
            datetime: record.datetime,
            fields: record.fields.clone(),
        };
        t.records.insert(id, row.clone());
        Ok(row)
    }

    async fn get_record(&self, id: RecordId) -> StoreResult<Option<SourceRecord>> {
        Ok(self.read().records.get(&id).cloned())
    }

    async fn update_record_fields(
        &self,
        id: RecordId,
        datetime: DateTime<Utc>,
        fields: &RecordFields,
    ) -> StoreResult<()> {
        let mut t = self.write();
        let record = t.record_mut(id)?;
        record.datetime = datetime;
        record.fields = fields.clone();
        Ok(())
    }

    async fn set_record_entry(&self, id: RecordId, entry: Option<EntryId>) -> StoreResult<()> {
        let mut t = self.write();
        t.record_mut(id)?.entry_id = entry;
        Ok(())
    }

    async fn delete_record(&self, id: RecordId) -> StoreResult<()> {
        let mut t = self.write();
        t.records.remove(&id);
        t.links
            .retain(|_, l| l.aggregation != id && l.aggregated != id);
        Ok(())
    }

    async fn records_for_entry(&self, entry: EntryId) -> StoreResult<Vec<SourceRecord>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|r| r.entry_id == Some(entry))
            .cloned()
            .collect())
    }

    async fn source_entry_ids(&self, source: SourceId) -> StoreResult<Vec<EntryId>> {
        let entries: BTreeSet<EntryId> = self
            .read()
            .records
            .values()
            .filter(|r| r.source_id == source)
            .filter_map(|r| r.entry_id)
            .collect();
        Ok(entries.into_iter().collect())
    }

    async fn delete_records_for_source(&self, source: SourceId) -> StoreResult<Vec<EntryId>> {
        let mut t = self.write();
        let doomed: Vec<RecordId> = t
            .records
            .values()
            .filter(|r| r.source_id == source)
            .map(|r| r.id)
            .collect();
        let mut entries = BTreeSet::new();
        for id in &doomed {
            if let Some(record) = t.records.remove(id) {
                entries.extend(record.entry_id);
            }
        }
        t.links
            .retain(|_, l| !doomed.contains(&l.aggregation) && !doomed.contains(&l.aggregated));
        Ok(entries.into_iter().collect())
    }

    async fn find_membership(
        &self,
        aggregation: EntryId,
        aggregated: EntryId,
    ) -> StoreResult<Option<AggregationMembership>> {
        Ok(self
            .read()
            .memberships
            .values()
            .find(|m| m.aggregation == aggregation && m.aggregated == aggregated)
            .cloned())
    }

    async fn insert_membership(
        &self,
        aggregation: EntryId,
        aggregated: EntryId,
    ) -> StoreResult<AggregationMembership> {
        let mut t = self.write();
        if t
            .memberships
            .values()
            .any(|m| m.aggregation == aggregation && m.aggregated == aggregated)
        {
            return Err(StoreError::Conflict(format!(
                "membership {} -> {}",
                aggregation, aggregated
            )));
        }
        let id = t.next_id();
        let row = AggregationMembership {
            id,
            aggregation,
            aggregated,
        };
        t.memberships.insert(id, row.clone());
        Ok(row)
    }

    async fn aggregated_entries(&self, id: EntryId) -> StoreResult<Vec<EntryId>> {
        let mut out: Vec<EntryId> = self
            .read()
            .memberships
            .values()
            .filter(|m| m.aggregation == id)
            .map(|m| m.aggregated)
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    async fn aggregation_entries(&self, id: EntryId) -> StoreResult<Vec<EntryId>> {
        let mut out: Vec<EntryId> = self
            .read()
            .memberships
            .values()
            .filter(|m| m.aggregated == id)
            .map(|m| m.aggregation)
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    async fn find_link(
        &self,
        aggregation: RecordId,
        aggregated: RecordId,
    ) -> StoreResult<Option<AggregationSourceLink>> {
        Ok(self
            .read()
            .links
            .values()
            .find(|l| l.aggregation == aggregation && l.aggregated == aggregated)
            .cloned())
    }

    async fn insert_link(
        &self,
        aggregation: RecordId,
        aggregated: RecordId,
    ) -> StoreResult<AggregationSourceLink> {
        let mut t = self.write();
        if t
            .links
            .values()
            .any(|l| l.aggregation == aggregation && l.aggregated == aggregated)
        {
            return Err(StoreError::Conflict(format!(
                "link {} -> {}",
                aggregation, aggregated
            )));
        }
        let id = t.next_id();
        let row = AggregationSourceLink {
            id,
            aggregation,
            aggregated,
            sorting_pos: None,
        };
        t.links.insert(id, row.clone());
        Ok(row)
    }

    async fn set_link_sorting_pos(&self, id: LinkId, sorting_pos: Option<i64>) -> StoreResult<()> {
        let mut t = self.write();
        let link = t
            .links
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("link {}", id)))?;
        link.sorting_pos = sorting_pos;
        Ok(())
    }

    async fn links_from(&self, record: RecordId) -> StoreResult<Vec<AggregationSourceLink>> {
        Ok(self.read().ordered_links(|l| l.aggregation == record))
    }

    async fn links_to(&self, record: RecordId) -> StoreResult<Vec<AggregationSourceLink>> {
        Ok(self.read().ordered_links(|l| l.aggregated == record))
    }

    async fn counts(&self) -> StoreResult<CatalogCounts> {
        let t = self.read();
        let n = |len: usize| len as i64;
        Ok(CatalogCounts {
            libraries: n(t.libraries.len()),
            sources: n(t.sources.len()),
            agents: n(t.agents.len()),
            languages: n(t.languages.len()),
            entries: n(t.entries.len()),
            aggregation_entries: n(t.entries.values().filter(|e| e.is_aggregation).count()),
            records: n(t.records.len()),
            aggregation_records: n(t.records.values().filter(|r| r.is_aggregation).count()),
            memberships: n(t.memberships.len()),
            links: n(t.links.len()),
        })
    }
}
