//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`crate::migrate`]. Uniqueness violations reported by SQLite surface as
//! [`StoreError::Conflict`], which is what the engines' get-or-create loop
//! reacts to; every other driver failure is wrapped as
//! [`StoreError::Backend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Row, SqlitePool};

use mycorrhiza_core::error::{StoreError, StoreResult};
use mycorrhiza_core::models::{
    Agent, AgentId, AggregationMembership, AggregationSourceLink, CatalogCounts, Entry, EntryId,
    Language, Library, LibraryId, LinkId, NewEntry, NewLibrary, NewSource, NewSourceRecord,
    RecordFields, RecordId, Source, SourceId, SourceRecord,
};
use mycorrhiza_core::registry::{AliasField, NameAlias};
use mycorrhiza_core::store::Store;

const LIBRARY_COLUMNS: &str = "id, name, url, public, active";
const SOURCE_COLUMNS: &str = "id, library_id, name, url, active, last_harvested, harvest_set";
const AGENT_COLUMNS: &str = "id, name, canonical_agent";
const ENTRY_COLUMNS: &str = "id, title, subtitle, checksum, is_aggregation, canonical_entry, \
    original_entry, indexed_data, created, last_modified";
const RECORD_COLUMNS: &str = "id, source_id, identifier, entry_id, is_aggregation, datetime, \
    full_data, description, year_edition, year_first_edition, uri, uri_label, content_type, \
    material_description, shelf_location_code";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::backend(err)
}

/// Whether `err` is SQLite rejecting a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn insert_error(err: sqlx::Error, what: String) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(what)
    } else {
        backend(err)
    }
}

fn require_row(result: SqliteQueryResult, what: String) -> StoreResult<()> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(what));
    }
    Ok(())
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn library_from_row(row: &SqliteRow) -> Library {
    Library {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        public: row.get("public"),
        active: row.get("active"),
    }
}

fn source_from_row(row: &SqliteRow) -> Source {
    Source {
        id: row.get("id"),
        library_id: row.get("library_id"),
        name: row.get("name"),
        url: row.get("url"),
        active: row.get("active"),
        last_harvested: row.get::<Option<i64>, _>("last_harvested").map(from_ts),
        harvest_set: row.get("harvest_set"),
    }
}

fn agent_from_row(row: &SqliteRow) -> Agent {
    Agent {
        id: row.get("id"),
        name: row.get("name"),
        canonical_agent: row.get("canonical_agent"),
    }
}

fn entry_from_row(row: &SqliteRow) -> Entry {
    let indexed_data: Option<String> = row.get("indexed_data");
    Entry {
        id: row.get("id"),
        title: row.get("title"),
        subtitle: row.get("subtitle"),
        checksum: row.get("checksum"),
        is_aggregation: row.get("is_aggregation"),
        canonical_entry: row.get("canonical_entry"),
        original_entry: row.get("original_entry"),
        indexed_data: indexed_data.and_then(|s| serde_json::from_str(&s).ok()),
        created: from_ts(row.get("created")),
        last_modified: from_ts(row.get("last_modified")),
    }
}

fn record_from_row(row: &SqliteRow) -> SourceRecord {
    let full_data: String = row.get("full_data");
    SourceRecord {
        id: row.get("id"),
        source_id: row.get("source_id"),
        identifier: row.get("identifier"),
        entry_id: row.get("entry_id"),
        is_aggregation: row.get("is_aggregation"),
        datetime: from_ts(row.get("datetime")),
        fields: RecordFields {
            full_data: serde_json::from_str(&full_data).unwrap_or(serde_json::Value::Null),
            description: row.get("description"),
            year_edition: row.get("year_edition"),
            year_first_edition: row.get("year_first_edition"),
            uri: row.get("uri"),
            uri_label: row.get("uri_label"),
            content_type: row.get("content_type"),
            material_description: row.get("material_description"),
            shelf_location_code: row.get("shelf_location_code"),
        },
    }
}

fn membership_from_row(row: &SqliteRow) -> AggregationMembership {
    AggregationMembership {
        id: row.get("id"),
        aggregation: row.get("aggregation_id"),
        aggregated: row.get("aggregated_id"),
    }
}

fn link_from_row(row: &SqliteRow) -> AggregationSourceLink {
    AggregationSourceLink {
        id: row.get("id"),
        aggregation: row.get("aggregation_id"),
        aggregated: row.get("aggregated_id"),
        sorting_pos: row.get("sorting_pos"),
    }
}

fn full_data_text(fields: &RecordFields) -> StoreResult<String> {
    serde_json::to_string(&fields.full_data).map_err(StoreError::backend)
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_library(&self, library: &NewLibrary) -> StoreResult<Library> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO libraries (name, url, public, active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                url = excluded.url,
                public = excluded.public,
                active = excluded.active
            RETURNING {}
            "#,
            LIBRARY_COLUMNS
        ))
        .bind(&library.name)
        .bind(&library.url)
        .bind(library.public)
        .bind(library.active)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(library_from_row(&row))
    }

    async fn get_library(&self, id: LibraryId) -> StoreResult<Option<Library>> {
        let row = sqlx::query(&format!("SELECT {} FROM libraries WHERE id = ?", LIBRARY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.as_ref().map(library_from_row))
    }

    async fn set_library_flags(
        &self,
        id: LibraryId,
        public: bool,
        active: bool,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE libraries SET public = ?, active = ? WHERE id = ?")
            .bind(public)
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result, format!("library {}", id))
    }

    async fn upsert_source(&self, source: &NewSource) -> StoreResult<Source> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sources (library_id, name, url, active, harvest_set)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                library_id = excluded.library_id,
                url = excluded.url,
                active = excluded.active,
                harvest_set = excluded.harvest_set
            RETURNING {}
            "#,
            SOURCE_COLUMNS
        ))
        .bind(source.library_id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.active)
        .bind(&source.harvest_set)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(source_from_row(&row))
    }

    async fn get_source(&self, id: SourceId) -> StoreResult<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.as_ref().map(source_from_row))
    }

    async fn list_sources(&self) -> StoreResult<Vec<Source>> {
        let rows = sqlx::query(&format!("SELECT {} FROM sources ORDER BY id", SOURCE_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    async fn set_last_harvested(&self, id: SourceId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sources SET last_harvested = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result, format!("source {}", id))
    }

    async fn replace_aliases(&self, source: SourceId, aliases: &[NameAlias]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM name_aliases WHERE source_id = ?")
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for alias in aliases {
            sqlx::query(
                "INSERT INTO name_aliases (source_id, field, value, canonical) VALUES (?, ?, ?, ?)",
            )
            .bind(source)
            .bind(alias.field.as_str())
            .bind(&alias.value)
            .bind(&alias.canonical)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                insert_error(
                    e,
                    format!("alias {}:{} for source {}", alias.field, alias.value, source),
                )
            })?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn aliases(&self, source: SourceId) -> StoreResult<Vec<NameAlias>> {
        let rows = sqlx::query(
            "SELECT field, value, canonical FROM name_aliases WHERE source_id = ? ORDER BY id",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let field: String = row.get("field");
            let Ok(field) = field.parse::<AliasField>() else {
                tracing::warn!("ignoring alias with unknown field '{}' on source {}", field, source);
                continue;
            };
            out.push(NameAlias {
                source_id: source,
                field,
                value: row.get("value"),
                canonical: row.get("canonical"),
            });
        }
        Ok(out)
    }

    async fn record_harvest(
        &self,
        source: SourceId,
        at: DateTime<Utc>,
        logs: &str,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO harvests (id, source_id, datetime, logs) VALUES (?, ?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(source)
            .bind(at.timestamp())
            .bind(logs)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn find_agent_by_name(&self, name: &str) -> StoreResult<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE name = ?", AGENT_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.as_ref().map(agent_from_row))
    }

    async fn insert_agent(&self, name: &str) -> StoreResult<Agent> {
        let row = sqlx::query(&format!(
            "INSERT INTO agents (name) VALUES (?) RETURNING {}",
            AGENT_COLUMNS
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("agent '{}'", name)))?;
        Ok(agent_from_row(&row))
    }

    async fn get_agent(&self, id: AgentId) -> StoreResult<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = ?", AGENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.as_ref().map(agent_from_row))
    }

    async fn set_agent_canonical(
        &self,
        id: AgentId,
        canonical: Option<AgentId>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE agents SET canonical_agent = ? WHERE id = ?")
            .bind(canonical)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result, format!("agent {}", id))
    }

    async fn agent_variants(&self, id: AgentId) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agents WHERE canonical_agent = ? ORDER BY id",
            AGENT_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn clear_agent_canonicals(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE agents SET canonical_agent = NULL WHERE canonical_agent IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn find_language(&self, code: &str) -> StoreResult<Option<Language>> {
        let row = sqlx::query("SELECT code FROM languages WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|r| Language { code: r.get("code") }))
    }

    async fn insert_language(&self, code: &str) -> StoreResult<Language> {
        sqlx::query("INSERT INTO languages (code) VALUES (?)")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error(e, format!("language '{}'", code)))?;
        Ok(Language {
            code: code.to_string(),
        })
    }

    async fn find_entries_by_checksum(
        &self,
        checksum: &str,
        is_aggregation: bool,
    ) -> StoreResult<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE checksum = ? AND is_aggregation = ? ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(checksum)
        .bind(is_aggregation)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn insert_entry(&self, entry: &NewEntry) -> StoreResult<Entry> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO entries (title, subtitle, checksum, is_aggregation, created, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(&entry.title)
        .bind(&entry.subtitle)
        .bind(&entry.checksum)
        .bind(entry.is_aggregation)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(entry_from_row(&row))
    }

    async fn get_entry(&self, id: EntryId) -> StoreResult<Option<Entry>> {
        let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.as_ref().map(entry_from_row))
    }

    async fn entry_ids(&self) -> StoreResult<Vec<EntryId>> {
        sqlx::query_scalar("SELECT id FROM entries ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn update_entry_display(
        &self,
        id: EntryId,
        title: &str,
        subtitle: Option<&str>,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE entries SET title = ?, subtitle = ?, last_modified = ? WHERE id = ?")
                .bind(title)
                .bind(subtitle)
                .bind(Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        require_row(result, format!("entry {}", id))
    }

    async fn entry_authors(&self, id: EntryId) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.name, a.canonical_agent
            FROM entry_authors ea
            JOIN agents a ON a.id = ea.agent_id
            WHERE ea.entry_id = ?
            ORDER BY ea.position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn set_entry_authors(&self, id: EntryId, authors: &[AgentId]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM entries WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        if !exists {
            return Err(StoreError::NotFound(format!("entry {}", id)));
        }

        sqlx::query("DELETE FROM entry_authors WHERE entry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let mut seen: Vec<AgentId> = Vec::with_capacity(authors.len());
        for agent in authors {
            if seen.contains(agent) {
                continue;
            }
            sqlx::query("INSERT INTO entry_authors (entry_id, agent_id, position) VALUES (?, ?, ?)")
                .bind(id)
                .bind(agent)
                .bind(seen.len() as i64)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            seen.push(*agent);
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn entry_languages(&self, id: EntryId) -> StoreResult<Vec<Language>> {
        let rows = sqlx::query(
            "SELECT language_code FROM entry_languages WHERE entry_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows
            .iter()
            .map(|r| Language {
                code: r.get("language_code"),
            })
            .collect())
    }

    async fn set_entry_languages(&self, id: EntryId, codes: &[String]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM entries WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        if !exists {
            return Err(StoreError::NotFound(format!("entry {}", id)));
        }

        sqlx::query("DELETE FROM entry_languages WHERE entry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let mut seen: Vec<&String> = Vec::with_capacity(codes.len());
        for code in codes {
            if seen.contains(&code) {
                continue;
            }
            sqlx::query(
                "INSERT INTO entry_languages (entry_id, language_code, position) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(code)
            .bind(seen.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
            seen.push(code);
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn entries_authored_by(&self, agent: AgentId) -> StoreResult<Vec<EntryId>> {
        sqlx::query_scalar("SELECT entry_id FROM entry_authors WHERE agent_id = ? ORDER BY entry_id")
            .bind(agent)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn set_entry_canonical(
        &self,
        id: EntryId,
        canonical: Option<EntryId>,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE entries SET canonical_entry = ?, last_modified = ? WHERE id = ?")
                .bind(canonical)
                .bind(Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        require_row(result, format!("entry {}", id))
    }

    async fn entry_variants(&self, id: EntryId) -> StoreResult<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE canonical_entry = ? ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn clear_entry_canonicals(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE entries SET canonical_entry = NULL WHERE canonical_entry IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn set_entry_original(
        &self,
        id: EntryId,
        original: Option<EntryId>,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE entries SET original_entry = ?, last_modified = ? WHERE id = ?")
                .bind(original)
                .bind(Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        require_row(result, format!("entry {}", id))
    }

    async fn entry_translations(&self, id: EntryId) -> StoreResult<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries WHERE original_entry = ? ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn repoint_translations(
        &self,
        from: &[EntryId],
        to: EntryId,
    ) -> StoreResult<Vec<EntryId>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut moved: Vec<EntryId> = Vec::new();

        for old in from {
            let ids: Vec<EntryId> =
                sqlx::query_scalar("SELECT id FROM entries WHERE original_entry = ? AND id != ?")
                    .bind(old)
                    .bind(to)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(backend)?;
            if ids.is_empty() {
                continue;
            }
            sqlx::query("UPDATE entries SET original_entry = ? WHERE original_entry = ? AND id != ?")
                .bind(to)
                .bind(old)
                .bind(to)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            moved.extend(ids);
        }

        tx.commit().await.map_err(backend)?;
        moved.sort_unstable();
        moved.dedup();
        Ok(moved)
    }

    async fn save_indexed_data(&self, id: EntryId, data: &serde_json::Value) -> StoreResult<()> {
        let text = serde_json::to_string(data).map_err(StoreError::backend)?;
        let result = sqlx::query("UPDATE entries SET indexed_data = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result, format!("entry {}", id))
    }

    async fn find_record(
        &self,
        source: SourceId,
        identifier: &str,
    ) -> StoreResult<Option<SourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM source_records WHERE source_id = ? AND identifier = ?",
            RECORD_COLUMNS
        ))
        .bind(source)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn insert_record(&self, record: &NewSourceRecord) -> StoreResult<SourceRecord> {
        let fields = &record.fields;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO source_records (source_id, identifier, entry_id, is_aggregation, datetime,
                                        full_data, description, year_edition, year_first_edition,
                                        uri, uri_label, content_type, material_description,
                                        shelf_location_code)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(record.source_id)
        .bind(&record.identifier)
        .bind(record.entry_id)
        .bind(record.is_aggregation)
        .bind(record.datetime.timestamp())
        .bind(full_data_text(fields)?)
        .bind(&fields.description)
        .bind(fields.year_edition)
        .bind(fields.year_first_edition)
        .bind(&fields.uri)
        .bind(&fields.uri_label)
        .bind(&fields.content_type)
        .bind(&fields.material_description)
        .bind(&fields.shelf_location_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            insert_error(
                e,
                format!("record {} of source {}", record.identifier, record.source_id),
            )
        })?;
        Ok(record_from_row(&row))
    }

    async fn get_record(&self, id: RecordId) -> StoreResult<Option<SourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM source_records WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn update_record_fields(
        &self,
        id: RecordId,
        datetime: DateTime<Utc>,
        fields: &RecordFields,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE source_records SET
                datetime = ?,
                full_data = ?,
                description = ?,
                year_edition = ?,
                year_first_edition = ?,
                uri = ?,
                uri_label = ?,
                content_type = ?,
                material_description = ?,
                shelf_location_code = ?
            WHERE id = ?
            "#,
        )
        .bind(datetime.timestamp())
        .bind(full_data_text(fields)?)
        .bind(&fields.description)
        .bind(fields.year_edition)
        .bind(fields.year_first_edition)
        .bind(&fields.uri)
        .bind(&fields.uri_label)
        .bind(&fields.content_type)
        .bind(&fields.material_description)
        .bind(&fields.shelf_location_code)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        require_row(result, format!("record {}", id))
    }

    async fn set_record_entry(&self, id: RecordId, entry: Option<EntryId>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE source_records SET entry_id = ? WHERE id = ?")
            .bind(entry)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result, format!("record {}", id))
    }

    async fn delete_record(&self, id: RecordId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM aggregation_records WHERE aggregation_id = ? OR aggregated_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query("DELETE FROM source_records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn records_for_entry(&self, entry: EntryId) -> StoreResult<Vec<SourceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM source_records WHERE entry_id = ? ORDER BY id",
            RECORD_COLUMNS
        ))
        .bind(entry)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn source_entry_ids(&self, source: SourceId) -> StoreResult<Vec<EntryId>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT entry_id FROM source_records
            WHERE source_id = ? AND entry_id IS NOT NULL
            ORDER BY entry_id
            "#,
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }

    async fn delete_records_for_source(&self, source: SourceId) -> StoreResult<Vec<EntryId>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let entries: Vec<EntryId> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT entry_id FROM source_records
            WHERE source_id = ? AND entry_id IS NOT NULL
            ORDER BY entry_id
            "#,
        )
        .bind(source)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            DELETE FROM aggregation_records
            WHERE aggregation_id IN (SELECT id FROM source_records WHERE source_id = ?)
               OR aggregated_id IN (SELECT id FROM source_records WHERE source_id = ?)
            "#,
        )
        .bind(source)
        .bind(source)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM source_records WHERE source_id = ?")
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(entries)
    }

    async fn find_membership(
        &self,
        aggregation: EntryId,
        aggregated: EntryId,
    ) -> StoreResult<Option<AggregationMembership>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregation_id, aggregated_id FROM aggregation_entries
            WHERE aggregation_id = ? AND aggregated_id = ?
            "#,
        )
        .bind(aggregation)
        .bind(aggregated)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.as_ref().map(membership_from_row))
    }

    async fn insert_membership(
        &self,
        aggregation: EntryId,
        aggregated: EntryId,
    ) -> StoreResult<AggregationMembership> {
        let row = sqlx::query(
            r#"
            INSERT INTO aggregation_entries (aggregation_id, aggregated_id)
            VALUES (?, ?)
            RETURNING id, aggregation_id, aggregated_id
            "#,
        )
        .bind(aggregation)
        .bind(aggregated)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("membership {} -> {}", aggregation, aggregated)))?;
        Ok(membership_from_row(&row))
    }

    async fn aggregated_entries(&self, id: EntryId) -> StoreResult<Vec<EntryId>> {
        sqlx::query_scalar(
            "SELECT aggregated_id FROM aggregation_entries WHERE aggregation_id = ? ORDER BY aggregated_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }

    async fn aggregation_entries(&self, id: EntryId) -> StoreResult<Vec<EntryId>> {
        sqlx::query_scalar(
            "SELECT aggregation_id FROM aggregation_entries WHERE aggregated_id = ? ORDER BY aggregation_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }

    async fn find_link(
        &self,
        aggregation: RecordId,
        aggregated: RecordId,
    ) -> StoreResult<Option<AggregationSourceLink>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregation_id, aggregated_id, sorting_pos FROM aggregation_records
            WHERE aggregation_id = ? AND aggregated_id = ?
            "#,
        )
        .bind(aggregation)
        .bind(aggregated)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.as_ref().map(link_from_row))
    }

    async fn insert_link(
        &self,
        aggregation: RecordId,
        aggregated: RecordId,
    ) -> StoreResult<AggregationSourceLink> {
        let row = sqlx::query(
            r#"
            INSERT INTO aggregation_records (aggregation_id, aggregated_id)
            VALUES (?, ?)
            RETURNING id, aggregation_id, aggregated_id, sorting_pos
            "#,
        )
        .bind(aggregation)
        .bind(aggregated)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("link {} -> {}", aggregation, aggregated)))?;
        Ok(link_from_row(&row))
    }

    async fn set_link_sorting_pos(&self, id: LinkId, sorting_pos: Option<i64>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE aggregation_records SET sorting_pos = ? WHERE id = ?")
            .bind(sorting_pos)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        require_row(result, format!("link {}", id))
    }

    async fn links_from(&self, record: RecordId) -> StoreResult<Vec<AggregationSourceLink>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregation_id, aggregated_id, sorting_pos FROM aggregation_records
            WHERE aggregation_id = ?
            ORDER BY sorting_pos IS NULL, sorting_pos, id
            "#,
        )
        .bind(record)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(link_from_row).collect())
    }

    async fn links_to(&self, record: RecordId) -> StoreResult<Vec<AggregationSourceLink>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregation_id, aggregated_id, sorting_pos FROM aggregation_records
            WHERE aggregated_id = ?
            ORDER BY sorting_pos IS NULL, sorting_pos, id
            "#,
        )
        .bind(record)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(link_from_row).collect())
    }

    async fn counts(&self) -> StoreResult<CatalogCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM libraries) AS libraries,
                (SELECT COUNT(*) FROM sources) AS sources,
                (SELECT COUNT(*) FROM agents) AS agents,
                (SELECT COUNT(*) FROM languages) AS languages,
                (SELECT COUNT(*) FROM entries) AS entries,
                (SELECT COUNT(*) FROM entries WHERE is_aggregation = 1) AS aggregation_entries,
                (SELECT COUNT(*) FROM source_records) AS records,
                (SELECT COUNT(*) FROM source_records WHERE is_aggregation = 1) AS aggregation_records,
                (SELECT COUNT(*) FROM aggregation_entries) AS memberships,
                (SELECT COUNT(*) FROM aggregation_records) AS links
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(CatalogCounts {
            libraries: row.get("libraries"),
            sources: row.get("sources"),
            agents: row.get("agents"),
            languages: row.get("languages"),
            entries: row.get("entries"),
            aggregation_entries: row.get("aggregation_entries"),
            records: row.get("records"),
            aggregation_records: row.get("aggregation_records"),
            memberships: row.get("memberships"),
            links: row.get("links"),
        })
    }
}
