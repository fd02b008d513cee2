//! Library-filtered display of an entry and its relatives.
//!
//! Works from the projection cached on each entry by
//! [`project`](crate::projection::project). A relative is shown only if at
//! least one of its records belongs to one of the caller's libraries;
//! without such a record it does not exist for that caller.

use serde::Serialize;

use crate::error::Result;
use crate::models::{AgentId, Entry, EntryId, LibraryId};
use crate::projection::{Document, IdValue, RecordDocument};
use crate::store::Store;

/// One entry as seen through a set of libraries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub id: EntryId,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: Vec<IdValue<AgentId>>,
    pub languages: Vec<IdValue<String>>,
    pub data_sources: Vec<RecordDocument>,
}

impl EntryView {
    pub fn is_visible(&self) -> bool {
        !self.data_sources.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayData {
    #[serde(flatten)]
    pub entry: EntryView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_entry: Option<EntryView>,
    pub translations: Vec<EntryView>,
    pub aggregated: Vec<EntryView>,
    pub aggregations: Vec<EntryView>,
}

/// Restrict `entry`'s cached projection to `libraries`.
pub fn entry_view(entry: &Entry, libraries: &[LibraryId]) -> EntryView {
    let cached: Option<Document> = entry
        .indexed_data
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok());
    let (authors, languages, data_sources) = match cached {
        Some(doc) => (
            doc.creator,
            doc.language,
            doc.data_sources
                .into_iter()
                .filter(|ds| libraries.contains(&ds.library_id))
                .collect(),
        ),
        None => (Vec::new(), Vec::new(), Vec::new()),
    };
    EntryView {
        id: entry.id,
        title: entry.title.clone(),
        subtitle: entry.subtitle.clone(),
        authors,
        languages,
        data_sources,
    }
}

async fn visible_view<S: Store + ?Sized>(
    store: &S,
    id: EntryId,
    libraries: &[LibraryId],
) -> Result<Option<EntryView>> {
    Ok(store
        .get_entry(id)
        .await?
        .map(|e| entry_view(&e, libraries))
        .filter(EntryView::is_visible))
}

/// Build the display of entry `id` for a caller limited to `libraries`.
///
/// Translations and aggregation neighbours are taken from the original
/// when `id` is itself a translation.
pub async fn display<S: Store + ?Sized>(
    store: &S,
    id: EntryId,
    libraries: &[LibraryId],
) -> Result<Option<DisplayData>> {
    let Some(entry) = store.get_entry(id).await? else {
        return Ok(None);
    };
    let view = entry_view(&entry, libraries);

    let mut original_entry = None;
    let mut anchor = entry.id;
    if let Some(original_id) = entry.original_entry {
        if let Some(original) = store.get_entry(original_id).await? {
            anchor = original.id;
            original_entry = Some(entry_view(&original, libraries)).filter(EntryView::is_visible);
        }
    }

    let mut translations = Vec::new();
    for tr in store.entry_translations(anchor).await? {
        if tr.id == entry.id {
            continue;
        }
        let tr_view = entry_view(&tr, libraries);
        if tr_view.is_visible() {
            translations.push(tr_view);
        }
    }

    let mut aggregated = Vec::new();
    for child in store.aggregated_entries(anchor).await? {
        aggregated.extend(visible_view(store, child, libraries).await?);
    }
    let mut aggregations = Vec::new();
    for parent in store.aggregation_entries(anchor).await? {
        aggregations.extend(visible_view(store, parent, libraries).await?);
    }

    Ok(Some(DisplayData {
        entry: view,
        original_entry,
        translations,
        aggregated,
        aggregations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::mark_translation;
    use crate::index::{MemoryIndex, ReindexQueue};
    use crate::store::memory::InMemoryStore;
    use crate::test_support::{article_with_issues, ingest, library, record, source};

    #[tokio::test]
    async fn test_display_filters_by_library() {
        let store = InMemoryStore::new();
        let mine = library(&store, "Mine", true).await;
        let theirs = library(&store, "Theirs", true).await;
        let a = source(&store, &mine, "a").await;
        let b = source(&store, &theirs, "b").await;

        let original = ingest(&store, &a, record("oai:a:1", "Pizza", &["Pinco"])).await[0];
        let translation = ingest(&store, &b, record("oai:b:1", "Pizza (it)", &["Pinco"])).await[0];
        let sibling = ingest(&store, &a, record("oai:a:2", "Pizza (de)", &["Pinco"])).await[0];
        mark_translation(&store, translation, original).await.unwrap();
        mark_translation(&store, sibling, original).await.unwrap();

        let mut queue = ReindexQueue::new();
        queue.extend([original, translation, sibling]);
        queue.flush(&store, &MemoryIndex::new()).await.unwrap();

        let shown = display(&store, translation, &[mine.id]).await.unwrap().unwrap();
        assert!(!shown.entry.is_visible(), "its only record is in another library");
        assert_eq!(shown.original_entry.as_ref().map(|o| o.id), Some(original));
        assert_eq!(shown.translations.iter().map(|t| t.id).collect::<Vec<_>>(), vec![sibling]);

        let shown = display(&store, original, &[theirs.id]).await.unwrap().unwrap();
        assert!(shown.original_entry.is_none());
        assert_eq!(shown.translations.len(), 1);
        assert_eq!(shown.translations[0].id, translation);
    }

    #[tokio::test]
    async fn test_display_aggregation_neighbours() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let ids = ingest(&store, &site, article_with_issues()).await;
        let mut queue = ReindexQueue::new();
        queue.extend(ids.clone());
        queue.flush(&store, &MemoryIndex::new()).await.unwrap();

        let shown = display(&store, ids[0], &[lib.id]).await.unwrap().unwrap();
        assert_eq!(shown.aggregations.len(), 2);
        assert!(shown.aggregated.is_empty());
        assert_eq!(shown.entry.authors.len(), 3);

        let json = serde_json::to_value(&shown).unwrap();
        assert_eq!(json["id"], serde_json::json!(ids[0]));
        assert!(json.get("original_entry").is_none());

        assert!(display(&store, 9999, &[lib.id]).await.unwrap().is_none());
    }
}
