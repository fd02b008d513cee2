//! SQLite-backed [`IndexSink`].
//!
//! Documents are stored whole as JSON in `index_documents`, keyed by entry
//! id, with the two flags the search boundary filters on (`public`,
//! `unique_source`) lifted into columns. `index_fts` holds the flat text of
//! each document for FTS5 keyword matching. Both tables are rewritten in
//! one transaction per document, so the last write for an entry wins.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use mycorrhiza_core::error::{StoreError, StoreResult};
use mycorrhiza_core::index::IndexSink;
use mycorrhiza_core::models::EntryId;
use mycorrhiza_core::projection::Document;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The stored document for `entry`, if indexed.
    pub async fn document(&self, entry: EntryId) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT document FROM index_documents WHERE entry_id = ?")
            .bind(entry)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        match row {
            Some(row) => {
                let text: String = row.get("document");
                let doc = serde_json::from_str(&text).map_err(StoreError::backend)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Number of indexed documents.
    pub async fn count(&self) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM index_documents")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    /// All documents, ordered by entry id.
    pub async fn documents(&self) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query("SELECT document FROM index_documents ORDER BY entry_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let text: String = row.get("document");
            match serde_json::from_str(&text) {
                Ok(doc) => documents.push(doc),
                Err(e) => tracing::warn!("skipping unreadable index document: {}", e),
            }
        }
        Ok(documents)
    }

    /// Entry ids whose text matches an FTS5 query, best match first.
    pub async fn search(&self, query: &str, public_only: bool, limit: i64) -> StoreResult<Vec<EntryId>> {
        sqlx::query_scalar(
            r#"
            SELECT f.entry_id
            FROM index_fts f
            JOIN index_documents d ON d.entry_id = f.entry_id
            WHERE index_fts MATCH ? AND (d.public = 1 OR ? = 0)
            ORDER BY bm25(index_fts)
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(public_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)
    }
}

#[async_trait]
impl IndexSink for SqliteIndex {
    async fn index_document(&self, document: &Document) -> StoreResult<()> {
        let json = serde_json::to_string(document).map_err(StoreError::backend)?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        sqlx::query(
            r#"
            INSERT INTO index_documents (entry_id, public, unique_source, document, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entry_id) DO UPDATE SET
                public = excluded.public,
                unique_source = excluded.unique_source,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document.entry_id)
        .bind(document.public)
        .bind(document.unique_source)
        .bind(&json)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        sqlx::query("DELETE FROM index_fts WHERE entry_id = ?")
            .bind(document.entry_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        sqlx::query("INSERT INTO index_fts (entry_id, text) VALUES (?, ?)")
            .bind(document.entry_id)
            .bind(document.search_text())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn remove_entry(&self, entry: EntryId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        sqlx::query("DELETE FROM index_fts WHERE entry_id = ?")
            .bind(entry)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        sqlx::query("DELETE FROM index_documents WHERE entry_id = ?")
            .bind(entry)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        sqlx::query("DELETE FROM index_fts")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        let removed = sqlx::query("DELETE FROM index_documents")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?
            .rows_affected();
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(removed)
    }
}
