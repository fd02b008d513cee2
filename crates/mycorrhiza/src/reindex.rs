//! Rebuilding index documents from the catalog.
//!
//! `myco reindex` re-projects every entry; `myco reindex --entry <id>`
//! projects one entry, writes it and prints the document.

use anyhow::{bail, Result};

use mycorrhiza_core::index::{FlushReport, IndexSink, ReindexQueue};
use mycorrhiza_core::models::EntryId;
use mycorrhiza_core::projection::{project, Document};
use mycorrhiza_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

/// Entries flushed per batch during a full reindex.
const BATCH_SIZE: usize = 500;

/// Re-project every entry in batches.
pub async fn reindex_all<S, I>(store: &S, index: &I, progress_every: usize) -> Result<FlushReport>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
{
    let ids = store.entry_ids().await?;
    let total = ids.len();
    let mut report = FlushReport::default();
    let mut done = 0usize;

    for chunk in ids.chunks(BATCH_SIZE) {
        let mut queue = ReindexQueue::new();
        queue.extend(chunk.iter().copied());
        let batch = queue.flush(store, index).await?;
        report.indexed += batch.indexed;
        report.removed += batch.removed;
        report.missing += batch.missing;

        let before = done;
        done += chunk.len();
        if done / progress_every > before / progress_every || done == total {
            tracing::info!("reindexed {}/{} entries", done, total);
        }
    }
    Ok(report)
}

/// Project one entry and write it. Returns `None` when the entry has no
/// contributing record and was removed from the index instead.
pub async fn reindex_entry<S, I>(store: &S, index: &I, id: EntryId) -> Result<Option<Document>>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
{
    let Some(entry) = store.get_entry(id).await? else {
        bail!("entry {} not found", id);
    };
    let document = project(store, &entry).await?;
    if document.is_empty() {
        index.remove_entry(id).await?;
        return Ok(None);
    }
    index.index_document(&document).await?;
    Ok(Some(document))
}

/// Run the reindex command.
pub async fn run_reindex(config: &Config, entry: Option<EntryId>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let index = SqliteIndex::new(pool.clone());

    match entry {
        Some(id) => match reindex_entry(&store, &index, id).await? {
            Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
            None => println!("Entry {} has no records left; removed from the index.", id),
        },
        None => {
            let report = reindex_all(&store, &index, config.harvest.progress_every).await?;
            println!(
                "Reindex complete: {} indexed, {} removed, {} missing",
                report.indexed, report.removed, report.missing
            );
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycorrhiza_core::index::MemoryIndex;
    use mycorrhiza_core::models::{NewEntry, NewLibrary, NewSource, NewSourceRecord, RecordFields};
    use mycorrhiza_core::store::memory::InMemoryStore;

    async fn seeded() -> (InMemoryStore, EntryId, EntryId) {
        let store = InMemoryStore::new();
        let lib = store
            .upsert_library(&NewLibrary {
                name: "Lib".into(),
                url: None,
                public: true,
                active: true,
            })
            .await
            .unwrap();
        let source = store
            .upsert_source(&NewSource {
                library_id: lib.id,
                name: "site".into(),
                url: "https://site.org".into(),
                active: true,
                harvest_set: None,
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for title in ["Pizza", "Pasta"] {
            let entry = store
                .insert_entry(&NewEntry {
                    title: title.into(),
                    subtitle: None,
                    checksum: title.to_lowercase(),
                    is_aggregation: false,
                })
                .await
                .unwrap();
            ids.push(entry.id);
        }
        store
            .insert_record(&NewSourceRecord {
                source_id: source.id,
                identifier: "oai:site:1".into(),
                is_aggregation: false,
                entry_id: Some(ids[0]),
                datetime: chrono::Utc::now(),
                fields: RecordFields::default(),
            })
            .await
            .unwrap();
        (store, ids[0], ids[1])
    }

    #[tokio::test]
    async fn test_reindex_all_indexes_and_removes() {
        let (store, with_record, orphan) = seeded().await;
        let index = MemoryIndex::new();
        let report = reindex_all(&store, &index, 1).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.removed, 1);
        assert!(index.get(with_record).is_some());
        assert!(index.get(orphan).is_none());
    }

    #[tokio::test]
    async fn test_reindex_single_entry() {
        let (store, with_record, orphan) = seeded().await;
        let index = MemoryIndex::new();

        let doc = reindex_entry(&store, &index, with_record).await.unwrap().unwrap();
        assert_eq!(doc.entry_id, with_record);
        assert!(store.get_entry(with_record).await.unwrap().unwrap().indexed_data.is_some());

        assert!(reindex_entry(&store, &index, orphan).await.unwrap().is_none());
        assert!(reindex_entry(&store, &index, 9999).await.is_err());
    }
}
