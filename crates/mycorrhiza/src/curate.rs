//! Operator curation commands: merge, aggregate, translate, show.
//!
//! Each mutating command prints its [`Outcome`] as JSON on stdout and then
//! re-projects whatever entries it made stale. A rejected request prints
//! `{"error": ...}` and changes nothing.

use anyhow::Result;
use serde::Serialize;

use mycorrhiza_core::aggregate::aggregate;
use mycorrhiza_core::canonical::{mark_translation, merge, MergeTarget};
use mycorrhiza_core::display::{display, DisplayData};
use mycorrhiza_core::error::Outcome;
use mycorrhiza_core::index::{FlushReport, IndexSink, ReindexQueue};
use mycorrhiza_core::models::{EntryId, LibraryId};
use mycorrhiza_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

/// Result of a curation command, as printed.
#[derive(Debug, Clone, Serialize)]
pub struct CurationReport {
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip)]
    pub flush: FlushReport,
}

async fn finish<S, I>(
    store: &S,
    index: &I,
    outcome: Outcome,
    stale: Vec<EntryId>,
) -> Result<CurationReport>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
{
    let mut queue = ReindexQueue::new();
    if outcome.is_success() {
        queue.extend(stale);
    }
    let flush = queue.flush(store, index).await?;
    Ok(CurationReport { outcome, flush })
}

/// Merge `aliases` into `canonical` and re-project affected entries.
pub async fn merge_and_reindex<S, I>(
    store: &S,
    index: &I,
    target: MergeTarget,
    canonical: i64,
    aliases: &[i64],
) -> Result<CurationReport>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
{
    let result = merge(store, target, canonical, aliases).await?;
    finish(store, index, result.outcome, result.reindex).await
}

/// Attach `members` to `aggregation` and re-project affected entries.
pub async fn aggregate_and_reindex<S, I>(
    store: &S,
    index: &I,
    aggregation: EntryId,
    members: &[EntryId],
    attempts: usize,
) -> Result<CurationReport>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
{
    let result = aggregate(store, aggregation, members, attempts).await?;
    finish(store, index, result.outcome, result.reindex).await
}

/// Mark `entry` as a translation of `original` and re-project both.
pub async fn translate_and_reindex<S, I>(
    store: &S,
    index: &I,
    entry: EntryId,
    original: EntryId,
) -> Result<CurationReport>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
{
    let outcome = mark_translation(store, entry, original).await?;
    finish(store, index, outcome, vec![entry, original]).await
}

/// Libraries an anonymous reader may see: active, public, and owning at
/// least one source.
pub async fn visible_libraries<S: Store + ?Sized>(store: &S) -> Result<Vec<LibraryId>> {
    let mut ids: Vec<LibraryId> = Vec::new();
    for source in store.list_sources().await? {
        if ids.contains(&source.library_id) {
            continue;
        }
        if let Some(library) = store.get_library(source.library_id).await? {
            if library.is_visible() {
                ids.push(library.id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Display of `entry` through `libraries`, or through every visible
/// library when none are given.
pub async fn show<S: Store + ?Sized>(
    store: &S,
    entry: EntryId,
    libraries: &[LibraryId],
) -> Result<Option<DisplayData>> {
    let libraries = if libraries.is_empty() {
        visible_libraries(store).await?
    } else {
        libraries.to_vec()
    };
    Ok(display(store, entry, &libraries).await?)
}

/// A curation command as parsed from the command line.
#[derive(Debug, Clone)]
pub enum Curation {
    Merge {
        target: MergeTarget,
        canonical: i64,
        aliases: Vec<i64>,
    },
    Aggregate {
        aggregation: EntryId,
        members: Vec<EntryId>,
    },
    Translate {
        entry: EntryId,
        original: EntryId,
    },
}

/// Run a mutating curation command and print its outcome.
pub async fn run_curation(config: &Config, command: Curation) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let index = SqliteIndex::new(pool.clone());

    let report = match command {
        Curation::Merge {
            target,
            canonical,
            aliases,
        } => merge_and_reindex(&store, &index, target, canonical, &aliases).await?,
        Curation::Aggregate {
            aggregation,
            members,
        } => {
            aggregate_and_reindex(
                &store,
                &index,
                aggregation,
                &members,
                config.harvest.upsert_attempts,
            )
            .await?
        }
        Curation::Translate { entry, original } => {
            translate_and_reindex(&store, &index, entry, original).await?
        }
    };

    println!("{}", serde_json::to_string(&report)?);
    if report.flush.touched() > 0 {
        tracing::info!(
            "reindexed {} entries, removed {}",
            report.flush.indexed,
            report.flush.removed
        );
    }

    pool.close().await;
    Ok(())
}

/// Run the show command.
pub async fn run_show(config: &Config, entry: EntryId, libraries: &[LibraryId]) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    match show(&store, entry, libraries).await? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => {
            pool.close().await;
            anyhow::bail!("entry {} not found", entry);
        }
    }

    pool.close().await;
    Ok(())
}
