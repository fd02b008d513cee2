//! Idempotent schema migrations.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so `myco init` can run
//! any number of times. Timestamps are unix seconds, JSON payloads TEXT.
//! Entry fingerprints carry no uniqueness constraint: two concurrent
//! harvesters may both create an entry for the same fingerprint, and
//! readers take the oldest.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const TABLES: &[&str] = &[
    // Source registry
    r#"
    CREATE TABLE IF NOT EXISTS libraries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        url TEXT,
        public INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        library_id INTEGER NOT NULL,
        name TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        last_harvested INTEGER,
        harvest_set TEXT,
        FOREIGN KEY (library_id) REFERENCES libraries(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS name_aliases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        canonical TEXT NOT NULL,
        UNIQUE(source_id, field, value),
        FOREIGN KEY (source_id) REFERENCES sources(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS harvests (
        id TEXT PRIMARY KEY,
        source_id INTEGER NOT NULL,
        datetime INTEGER NOT NULL,
        logs TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (source_id) REFERENCES sources(id)
    )
    "#,
    // Catalog
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        canonical_agent INTEGER,
        FOREIGN KEY (canonical_agent) REFERENCES agents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS languages (
        code TEXT PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        subtitle TEXT,
        checksum TEXT NOT NULL,
        is_aggregation INTEGER NOT NULL DEFAULT 0,
        canonical_entry INTEGER,
        original_entry INTEGER,
        indexed_data TEXT,
        created INTEGER NOT NULL,
        last_modified INTEGER NOT NULL,
        FOREIGN KEY (canonical_entry) REFERENCES entries(id),
        FOREIGN KEY (original_entry) REFERENCES entries(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entry_authors (
        entry_id INTEGER NOT NULL,
        agent_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (entry_id, agent_id),
        FOREIGN KEY (entry_id) REFERENCES entries(id),
        FOREIGN KEY (agent_id) REFERENCES agents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entry_languages (
        entry_id INTEGER NOT NULL,
        language_code TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (entry_id, language_code),
        FOREIGN KEY (entry_id) REFERENCES entries(id),
        FOREIGN KEY (language_code) REFERENCES languages(code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        identifier TEXT NOT NULL,
        entry_id INTEGER,
        is_aggregation INTEGER NOT NULL DEFAULT 0,
        datetime INTEGER NOT NULL,
        full_data TEXT NOT NULL DEFAULT 'null',
        description TEXT,
        year_edition INTEGER,
        year_first_edition INTEGER,
        uri TEXT,
        uri_label TEXT,
        content_type TEXT,
        material_description TEXT,
        shelf_location_code TEXT,
        UNIQUE(source_id, identifier),
        FOREIGN KEY (source_id) REFERENCES sources(id),
        FOREIGN KEY (entry_id) REFERENCES entries(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS aggregation_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        aggregation_id INTEGER NOT NULL,
        aggregated_id INTEGER NOT NULL,
        UNIQUE(aggregation_id, aggregated_id),
        FOREIGN KEY (aggregation_id) REFERENCES entries(id),
        FOREIGN KEY (aggregated_id) REFERENCES entries(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS aggregation_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        aggregation_id INTEGER NOT NULL,
        aggregated_id INTEGER NOT NULL,
        sorting_pos INTEGER,
        UNIQUE(aggregation_id, aggregated_id),
        FOREIGN KEY (aggregation_id) REFERENCES source_records(id),
        FOREIGN KEY (aggregated_id) REFERENCES source_records(id)
    )
    "#,
    // Search index
    r#"
    CREATE TABLE IF NOT EXISTS index_documents (
        entry_id INTEGER PRIMARY KEY,
        public INTEGER NOT NULL,
        unique_source INTEGER NOT NULL,
        document TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sources_library ON sources(library_id)",
    "CREATE INDEX IF NOT EXISTS idx_entries_checksum ON entries(checksum, is_aggregation)",
    "CREATE INDEX IF NOT EXISTS idx_entries_canonical ON entries(canonical_entry)",
    "CREATE INDEX IF NOT EXISTS idx_entries_original ON entries(original_entry)",
    "CREATE INDEX IF NOT EXISTS idx_agents_canonical ON agents(canonical_agent)",
    "CREATE INDEX IF NOT EXISTS idx_entry_authors_agent ON entry_authors(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_source_records_entry ON source_records(entry_id)",
    "CREATE INDEX IF NOT EXISTS idx_aggregation_entries_aggregated ON aggregation_entries(aggregated_id)",
    "CREATE INDEX IF NOT EXISTS idx_aggregation_records_aggregated ON aggregation_records(aggregated_id)",
    "CREATE INDEX IF NOT EXISTS idx_index_documents_public ON index_documents(public)",
];

/// Open the configured database and bring its schema up to date.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for statement in TABLES {
        sqlx::query(statement).execute(pool).await?;
    }

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE index_fts USING fts5(
                entry_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
