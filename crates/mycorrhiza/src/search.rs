//! Keyword search over the local index.
//!
//! A convenience for checking what a harvest produced: matches the flat
//! text of each indexed document with FTS5 and prints one line per hit.
//! Unless `--all` is given only public documents are searched.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;

const DEFAULT_LIMIT: i64 = 20;

/// Quote each whitespace-separated term so FTS5 operators in user input
/// are matched literally.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn run_search(
    config: &Config,
    query: &str,
    all: bool,
    limit: Option<i64>,
) -> Result<()> {
    let fts = fts_query(query);
    if fts.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let index = SqliteIndex::new(pool.clone());
    let hits = index
        .search(&fts, !all, limit.unwrap_or(DEFAULT_LIMIT))
        .await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (rank, entry_id) in hits.iter().enumerate() {
        let Some(doc) = index.document(*entry_id).await? else {
            continue;
        };
        let title = doc
            .title
            .iter()
            .map(|t| t.value.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(": ");
        let creators = doc
            .creator
            .iter()
            .map(|c| c.value.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        println!(
            "{}. [{}] {}{}",
            rank + 1,
            entry_id,
            title,
            if creators.is_empty() {
                String::new()
            } else {
                format!(" / {}", creators)
            }
        );
    }

    pool.close().await;
    Ok(())
}
