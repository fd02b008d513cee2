//! Index projection: one denormalized document per entry.
//!
//! [`project`] compiles an entry, the records of every source that saw it,
//! its authors, languages and aggregation neighbours into a [`Document`]
//! the search index consumes as-is. Derived fields:
//!
//! | Field | Rule |
//! |-------|------|
//! | `creator` | authors resolved to their canonical agent, de-duplicated |
//! | `data_sources[].public` | the record's library is active **and** public |
//! | `public` | any contributing record is public |
//! | `library` | distinct libraries of the contributing records |
//! | `unique_source` | that library's id when there is exactly one, else `0` |
//! | `date` | sorted distinct edition years |
//! | `aggregate` | `aggregation` when it has members, `aggregated` when it has parents |
//!
//! An entry merged into another contributes no records of its own; its
//! records surface through the canonical entry instead. The finished
//! document is cached on the entry as a side effect.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::canonical::resolve_agent_root;
use crate::error::{CatalogError, Result, StoreError};
use crate::models::{
    AgentId, Entry, EntryId, Library, LibraryId, RecordId, Source, SourceId, SourceRecord,
};
use crate::store::Store;

/// Timestamp format used throughout the index.
pub const ZULU: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Facet value: an id the index filters on and the label it displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdValue<I, V = String> {
    pub id: I,
    pub value: V,
}

impl<I, V> IdValue<I, V> {
    pub fn new(id: I, value: V) -> Self {
        Self { id, value }
    }
}

/// One source's view of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDocument {
    pub data_source_id: RecordId,
    pub identifier: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: Vec<String>,
    pub languages: Vec<String>,
    pub uri: Option<String>,
    pub uri_label: Option<String>,
    pub content_type: Option<String>,
    pub shelf_location_code: Option<String>,
    pub public: bool,
    pub site_name: String,
    pub site_id: SourceId,
    pub library_id: LibraryId,
    pub library_name: String,
    pub description: Option<String>,
    pub year_edition: Option<i32>,
    pub year_first_edition: Option<i32>,
    pub material_description: Option<String>,
    pub entry_id: EntryId,
    /// Records of the aggregations this record belongs to.
    #[serde(default)]
    pub aggregations: Vec<RecordDocument>,
    /// Records this record aggregates.
    #[serde(default)]
    pub aggregated: Vec<RecordDocument>,
}

/// The search document for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub entry_id: EntryId,
    /// Title and subtitle, the latter as `""` when absent.
    pub title: Vec<IdValue<EntryId>>,
    pub creator: Vec<IdValue<AgentId>>,
    pub date: Vec<IdValue<i32, i32>>,
    pub language: Vec<IdValue<String>>,
    pub library: Vec<IdValue<LibraryId>>,
    pub description: Vec<IdValue<String>>,
    pub data_sources: Vec<RecordDocument>,
    pub public: bool,
    pub last_modified: String,
    pub created: String,
    pub unique_source: LibraryId,
    pub aggregations: Vec<IdValue<EntryId>>,
    pub aggregated: Vec<IdValue<EntryId>>,
    pub is_aggregation: bool,
    pub aggregate: Vec<IdValue<String>>,
}

impl Document {
    /// No source contributes to this entry any longer.
    pub fn is_empty(&self) -> bool {
        self.data_sources.is_empty()
    }

    /// Flat text for full-text indexing.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.title.iter().map(|t| t.value.as_str()));
        parts.extend(self.creator.iter().map(|c| c.value.as_str()));
        parts.extend(self.description.iter().map(|d| d.value.as_str()));
        parts.retain(|p| !p.is_empty());
        parts.join("\n")
    }
}

/// Per-call lookup cache so a document with many records does not fetch
/// the same source or entry twice.
struct Lookups<'a, S: Store + ?Sized> {
    store: &'a S,
    sources: HashMap<SourceId, (Source, Library)>,
    entries: HashMap<EntryId, (Entry, Vec<String>, Vec<String>)>,
}

impl<'a, S: Store + ?Sized> Lookups<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            sources: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    async fn source(&mut self, id: SourceId) -> Result<(Source, Library)> {
        if let Some(hit) = self.sources.get(&id) {
            return Ok(hit.clone());
        }
        let source = self
            .store
            .get_source(id)
            .await?
            .ok_or(CatalogError::NotFound { kind: "source", id })?;
        let library = self
            .store
            .get_library(source.library_id)
            .await?
            .ok_or(CatalogError::NotFound {
                kind: "library",
                id: source.library_id,
            })?;
        self.sources.insert(id, (source.clone(), library.clone()));
        Ok((source, library))
    }

    /// The entry with its canonical author names and language codes.
    async fn entry(&mut self, id: EntryId) -> Result<Option<(Entry, Vec<String>, Vec<String>)>> {
        if let Some(hit) = self.entries.get(&id) {
            return Ok(Some(hit.clone()));
        }
        let Some(entry) = self.store.get_entry(id).await? else {
            return Ok(None);
        };
        let authors = canonical_authors(self.store, id)
            .await?
            .into_iter()
            .map(|a| a.value)
            .collect();
        let languages = self
            .store
            .entry_languages(id)
            .await?
            .into_iter()
            .map(|l| l.code)
            .collect();
        let hit = (entry, authors, languages);
        self.entries.insert(id, hit.clone());
        Ok(Some(hit))
    }

    async fn record_document(&mut self, record: &SourceRecord) -> Result<Option<RecordDocument>> {
        let Some(entry_id) = record.entry_id else {
            return Ok(None);
        };
        let Some((entry, authors, languages)) = self.entry(entry_id).await? else {
            return Ok(None);
        };
        let (source, library) = self.source(record.source_id).await?;
        Ok(Some(RecordDocument {
            data_source_id: record.id,
            identifier: record.identifier.clone(),
            title: entry.title,
            subtitle: entry.subtitle,
            authors,
            languages,
            uri: record.fields.uri.clone(),
            uri_label: record.fields.uri_label.clone(),
            content_type: record.fields.content_type.clone(),
            shelf_location_code: record.fields.shelf_location_code.clone(),
            public: library.is_visible(),
            site_name: source.name,
            site_id: source.id,
            library_id: library.id,
            library_name: library.name,
            description: record.fields.description.clone(),
            year_edition: record.fields.year_edition,
            year_first_edition: record.fields.year_first_edition,
            material_description: record.fields.material_description.clone(),
            entry_id,
            aggregations: Vec::new(),
            aggregated: Vec::new(),
        }))
    }

    async fn linked_documents(&mut self, ids: Vec<RecordId>) -> Result<Vec<RecordDocument>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = self.store.get_record(id).await? else {
                continue;
            };
            if let Some(doc) = self.record_document(&record).await? {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

/// Authors of `entry` as their canonical agents, first-seen order, no
/// repeats.
pub async fn canonical_authors<S: Store + ?Sized>(
    store: &S,
    entry: EntryId,
) -> Result<Vec<IdValue<AgentId>>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for author in store.entry_authors(entry).await? {
        let root = resolve_agent_root(store, author).await?;
        if seen.insert(root.id) {
            out.push(IdValue::new(root.id, root.name));
        }
    }
    Ok(out)
}

/// Records contributing to `entry`: its own plus those of every entry
/// merged into it. Empty when `entry` itself was merged away.
pub async fn contributing_records<S: Store + ?Sized>(
    store: &S,
    entry: &Entry,
) -> Result<Vec<SourceRecord>> {
    if entry.canonical_entry.is_some() {
        return Ok(Vec::new());
    }
    let mut records = store.records_for_entry(entry.id).await?;
    let mut seen = HashSet::from([entry.id]);
    let mut stack = vec![entry.id];
    while let Some(current) = stack.pop() {
        for variant in store.entry_variants(current).await? {
            if seen.insert(variant.id) {
                records.extend(store.records_for_entry(variant.id).await?);
                stack.push(variant.id);
            }
        }
    }
    Ok(records)
}

/// Build the document for `entry` and cache it on the entry.
pub async fn project<S: Store + ?Sized>(store: &S, entry: &Entry) -> Result<Document> {
    let records = contributing_records(store, entry).await?;
    let mut lookups = Lookups::new(store);

    let mut data_sources = Vec::with_capacity(records.len());
    let mut libraries: Vec<IdValue<LibraryId>> = Vec::new();
    let mut description = Vec::new();
    let mut dates = BTreeSet::new();
    for record in &records {
        let Some(mut doc) = lookups.record_document(record).await? else {
            continue;
        };
        let parents = store.links_to(record.id).await?;
        doc.aggregations = lookups
            .linked_documents(parents.iter().map(|l| l.aggregation).collect())
            .await?;
        let children = store.links_from(record.id).await?;
        doc.aggregated = lookups
            .linked_documents(children.iter().map(|l| l.aggregated).collect())
            .await?;

        if !libraries.iter().any(|l| l.id == doc.library_id) {
            libraries.push(IdValue::new(doc.library_id, doc.library_name.clone()));
        }
        if let Some(text) = record.fields.description.as_deref().filter(|d| !d.is_empty()) {
            description.push(IdValue::new(format!("d{}", record.id), text.to_string()));
        }
        dates.extend(record.fields.year_edition);
        dates.extend(record.fields.year_first_edition);
        data_sources.push(doc);
    }

    let public = data_sources.iter().any(|d| d.public);
    let unique_source = match libraries.as_slice() {
        [only] => only.id,
        _ => 0,
    };

    let mut aggregations = Vec::new();
    for id in store.aggregation_entries(entry.id).await? {
        if let Some(parent) = store.get_entry(id).await? {
            aggregations.push(IdValue::new(parent.id, parent.title));
        }
    }
    let mut aggregated = Vec::new();
    for id in store.aggregated_entries(entry.id).await? {
        if let Some(child) = store.get_entry(id).await? {
            aggregated.push(IdValue::new(child.id, child.title));
        }
    }
    let mut aggregate = Vec::new();
    if !aggregated.is_empty() {
        aggregate.push(IdValue::new("aggregation".to_string(), "Aggregation".to_string()));
    }
    if !aggregations.is_empty() {
        aggregate.push(IdValue::new("aggregated".to_string(), "Aggregated".to_string()));
    }

    let document = Document {
        entry_id: entry.id,
        title: vec![
            IdValue::new(entry.id, entry.title.clone()),
            IdValue::new(entry.id, entry.subtitle.clone().unwrap_or_default()),
        ],
        creator: canonical_authors(store, entry.id).await?,
        date: dates.into_iter().map(|y| IdValue::new(y, y)).collect(),
        language: store
            .entry_languages(entry.id)
            .await?
            .into_iter()
            .map(|l| IdValue::new(l.code.clone(), l.code))
            .collect(),
        library: libraries,
        description,
        data_sources,
        public,
        last_modified: entry.last_modified.format(ZULU).to_string(),
        created: entry.created.format(ZULU).to_string(),
        unique_source,
        aggregations,
        aggregated,
        is_aggregation: entry.is_aggregation,
        aggregate,
    };

    let cached = serde_json::to_value(&document).map_err(StoreError::backend)?;
    store.save_indexed_data(entry.id, &cached).await?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{merge, MergeTarget};
    use crate::models::NewSource;
    use crate::store::memory::InMemoryStore;
    use crate::test_support::{article_with_issues, ingest, library, record, source};

    async fn project_id(store: &InMemoryStore, id: EntryId) -> Document {
        let entry = store.get_entry(id).await.unwrap().unwrap();
        project(store, &entry).await.unwrap()
    }

    #[tokio::test]
    async fn test_projection_basic_fields() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let mut rec = record("oai:a:1", "Pizza", &["Pinco Pallino"]);
        rec.year_first_edition = Some(1999);
        rec.description = Some("A book".into());
        let id = ingest(&store, &site, rec).await[0];

        let doc = project_id(&store, id).await;
        assert_eq!(doc.entry_id, id);
        assert_eq!(doc.title[0].value, "Pizza");
        assert_eq!(doc.title[1].value, "");
        assert_eq!(doc.creator[0].value, "Pinco Pallino");
        assert_eq!(doc.date.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1999, 2022]);
        assert_eq!(doc.language[0].id, "en");
        assert_eq!(doc.description[0].id, format!("d{}", doc.data_sources[0].data_source_id));
        assert!(doc.public);
        assert_eq!(doc.unique_source, lib.id);
        assert!(doc.aggregate.is_empty());
        assert_eq!(doc.last_modified.len(), 20);

        let cached = store.get_entry(id).await.unwrap().unwrap().indexed_data.unwrap();
        assert_eq!(cached["entry_id"], serde_json::json!(id));
    }

    #[tokio::test]
    async fn test_canonical_author_resolution() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let id = ingest(&store, &site, record("oai:a:1", "Pizza", &["P. Pallino"])).await[0];
        let real = store.insert_agent("Pinco Pallino").await.unwrap();
        let alias = store.find_agent_by_name("P. Pallino").await.unwrap().unwrap();
        store.set_agent_canonical(alias.id, Some(real.id)).await.unwrap();

        let doc = project_id(&store, id).await;
        assert_eq!(doc.creator, vec![IdValue::new(real.id, "Pinco Pallino".to_string())]);
        assert_eq!(doc.data_sources[0].authors, vec!["Pinco Pallino"]);
    }

    #[tokio::test]
    async fn test_visibility_is_or_across_libraries() {
        let store = InMemoryStore::new();
        let open = library(&store, "Open", true).await;
        let closed = library(&store, "Closed", false).await;
        let a = source(&store, &open, "a").await;
        let b = source(&store, &closed, "b").await;
        let rec = record("oai:x:1", "Pizza", &[]);
        let mut other = rec.clone();
        other.identifier = "oai:y:1".into();
        let id = ingest(&store, &a, rec).await[0];
        ingest(&store, &b, other).await;

        let doc = project_id(&store, id).await;
        assert!(doc.public);
        assert_eq!(doc.unique_source, 0);
        assert_eq!(doc.library.len(), 2);

        store.set_library_flags(open.id, true, false).await.unwrap();
        assert!(!project_id(&store, id).await.public);

        store.set_library_flags(open.id, true, true).await.unwrap();
        assert!(project_id(&store, id).await.public);
    }

    #[tokio::test]
    async fn test_unique_source_with_two_sources_same_library() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let a = source(&store, &lib, "a").await;
        let b = store
            .upsert_source(&NewSource {
                library_id: lib.id,
                name: "b".into(),
                url: "https://b.org".into(),
                active: true,
                harvest_set: None,
            })
            .await
            .unwrap();
        let rec = record("oai:x:1", "Pizza", &[]);
        let mut other = rec.clone();
        other.identifier = "oai:y:1".into();
        let id = ingest(&store, &a, rec).await[0];
        ingest(&store, &b, other).await;

        let doc = project_id(&store, id).await;
        assert_eq!(doc.data_sources.len(), 2);
        assert_eq!(doc.unique_source, lib.id);
    }

    #[tokio::test]
    async fn test_merged_entry_projects_through_canonical() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let keep = ingest(&store, &site, record("oai:a:1", "Pizza", &[])).await[0];
        let dup = ingest(&store, &site, record("oai:a:2", "Pizza (dup)", &[])).await[0];

        merge(&store, MergeTarget::Entry, keep, &[dup]).await.unwrap();

        let merged = project_id(&store, dup).await;
        assert!(merged.is_empty());
        assert!(!merged.public);
        let canonical = project_id(&store, keep).await;
        assert_eq!(canonical.data_sources.len(), 2);
    }

    #[tokio::test]
    async fn test_aggregation_tags_and_nested_records() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let ids = ingest(&store, &site, article_with_issues()).await;

        let article = project_id(&store, ids[0]).await;
        assert_eq!(article.aggregations.len(), 2);
        assert!(article.aggregated.is_empty());
        assert_eq!(article.aggregate, vec![IdValue::new("aggregated".to_string(), "Aggregated".to_string())]);
        assert_eq!(article.data_sources[0].aggregations.len(), 2);
        assert_eq!(article.data_sources[0].aggregations[0].title, "First Test, 2");

        let issue = project_id(&store, ids[1]).await;
        assert!(issue.is_aggregation);
        assert_eq!(issue.aggregated[0].id, ids[0]);
        assert_eq!(issue.aggregate[0].id, "aggregation");
        assert_eq!(issue.data_sources[0].aggregated[0].entry_id, ids[0]);
    }

    #[tokio::test]
    async fn test_projection_is_deterministic() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let ids = ingest(&store, &site, article_with_issues()).await;
        let first = project_id(&store, ids[0]).await;
        let second = project_id(&store, ids[0]).await;
        assert_eq!(first, second);
    }
}
