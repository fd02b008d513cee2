//! Search index boundary and batched re-projection.
//!
//! The index is reached only through an [`IndexSink`] handed to whoever
//! needs it; nothing in the catalog holds a global writer. Writes are
//! batched: engines report the entries they touched, a [`ReindexQueue`]
//! collects them without repeats, and [`ReindexQueue::flush`] projects each
//! one exactly once after the batch's relational writes are done.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, StoreResult};
use crate::models::EntryId;
use crate::projection::{project, Document};
use crate::store::Store;

/// Write side of the external search index.
///
/// Writing the same entry twice must be harmless: the last write wins.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn index_document(&self, document: &Document) -> StoreResult<()>;

    /// Drop an entry that no longer has anything to show.
    async fn remove_entry(&self, entry: EntryId) -> StoreResult<()>;

    /// Drop every document. Returns how many were removed.
    async fn clear(&self) -> StoreResult<u64>;
}

/// Index kept in memory, for tests.
#[derive(Default)]
pub struct MemoryIndex {
    documents: RwLock<BTreeMap<EntryId, Document>>,
    writes: RwLock<Vec<EntryId>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry: EntryId) -> Option<Document> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry ids in the order they were written or removed.
    pub fn writes(&self) -> Vec<EntryId> {
        self.writes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl IndexSink for MemoryIndex {
    async fn index_document(&self, document: &Document) -> StoreResult<()> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.entry_id, document.clone());
        self.writes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(document.entry_id);
        Ok(())
    }

    async fn remove_entry(&self, entry: EntryId) -> StoreResult<()> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entry);
        self.writes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<u64> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let removed = documents.len() as u64;
        documents.clear();
        Ok(removed)
    }
}

/// What a flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub indexed: usize,
    /// Entries with no contributing record, taken out of the index.
    pub removed: usize,
    /// Queued ids that no longer resolve to an entry.
    pub missing: usize,
}

impl FlushReport {
    /// Entries whose index state was written.
    pub fn touched(&self) -> usize {
        self.indexed + self.removed
    }
}

/// Set of entries awaiting re-projection.
#[derive(Debug, Clone, Default)]
pub struct ReindexQueue {
    pending: BTreeSet<EntryId>,
}

impl ReindexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: EntryId) {
        self.pending.insert(entry);
    }

    pub fn extend<I: IntoIterator<Item = EntryId>>(&mut self, entries: I) {
        self.pending.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, entry: EntryId) -> bool {
        self.pending.contains(&entry)
    }

    /// Project every queued entry once, in id order, and hand the result to
    /// `index`. The queue is empty afterwards.
    pub async fn flush<S, I>(&mut self, store: &S, index: &I) -> Result<FlushReport>
    where
        S: Store + ?Sized,
        I: IndexSink + ?Sized,
    {
        let mut report = FlushReport::default();
        let pending = std::mem::take(&mut self.pending);
        for id in pending {
            let Some(entry) = store.get_entry(id).await? else {
                tracing::debug!("entry {} vanished before reindexing", id);
                index.remove_entry(id).await?;
                report.missing += 1;
                continue;
            };
            let document = project(store, &entry).await?;
            if document.is_empty() {
                index.remove_entry(id).await?;
                report.removed += 1;
            } else {
                index.index_document(&document).await?;
                report.indexed += 1;
            }
        }
        tracing::debug!(
            "flushed index: {} indexed, {} removed, {} missing",
            report.indexed,
            report.removed,
            report.missing
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{merge, MergeTarget};
    use crate::store::memory::InMemoryStore;
    use crate::test_support::{article_with_issues, ingest, library, record, source};

    #[tokio::test]
    async fn test_queue_deduplicates_before_flush() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let index = MemoryIndex::new();
        let mut queue = ReindexQueue::new();

        let first = ingest(&store, &site, article_with_issues()).await;
        let second = ingest(&store, &site, article_with_issues()).await;
        queue.extend(first);
        queue.extend(second);
        assert_eq!(queue.len(), 3);

        let report = queue.flush(&store, &index).await.unwrap();
        assert_eq!(report.indexed, 3);
        assert!(queue.is_empty());
        let mut writes = index.writes();
        writes.sort_unstable();
        writes.dedup();
        assert_eq!(writes.len(), index.writes().len(), "no entry written twice");
    }

    #[tokio::test]
    async fn test_merged_away_entry_is_removed() {
        let store = InMemoryStore::new();
        let lib = library(&store, "Lib", true).await;
        let site = source(&store, &lib, "a").await;
        let index = MemoryIndex::new();
        let keep = ingest(&store, &site, record("oai:a:1", "Pizza", &[])).await[0];
        let dup = ingest(&store, &site, record("oai:a:2", "Pizza!", &[])).await[0];

        let mut queue = ReindexQueue::new();
        queue.extend([keep, dup]);
        queue.flush(&store, &index).await.unwrap();
        assert_eq!(index.len(), 2);

        let res = merge(&store, MergeTarget::Entry, keep, &[dup]).await.unwrap();
        queue.extend(res.reindex);
        let report = queue.flush(&store, &index).await.unwrap();
        assert_eq!(report, FlushReport { indexed: 1, removed: 1, missing: 0 });
        assert!(index.get(dup).is_none());
        assert_eq!(index.get(keep).unwrap().data_sources.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_entries_are_counted() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let mut queue = ReindexQueue::new();
        queue.push(42);
        let report = queue.flush(&store, &index).await.unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.touched(), 0);
    }
}
