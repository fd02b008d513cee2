//! Canonicalization: merging duplicate entries or agents after the fact.
//!
//! A merge names one survivor and any number of aliases. The survivor's
//! own canonical pointer is cleared; every alias, and everything that
//! pointed at an alias however many hops down, is repointed straight at
//! the survivor. Pointer trees are therefore always one level deep after a
//! merge, and reads ([`resolve_agent_root`]) still walk to the root for
//! rows written before that invariant held.
//!
//! Translation edges (`original_entry`) live on the same graph machinery:
//! [`mark_translation`] refuses edges that would close a loop.

use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{Outcome, StoreResult};
use crate::graph::{CanonicalForest, EdgeKind, EntityGraph};
use crate::models::{Agent, AgentId, EntryId};
use crate::store::Store;

pub const MERGED: &str = "Merged!";
pub const MERGE_WITH_ITSELF: &str = "You can't merge an item with itself!";
pub const MERGE_BAD_ARGUMENTS: &str =
    "Bad arguments! Expecting valid canonical and a list of aliases!";

/// Which kind of row a merge operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTarget {
    Entry,
    Author,
}

impl FromStr for MergeTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(MergeTarget::Entry),
            "author" => Ok(MergeTarget::Author),
            other => Err(format!("unknown merge target '{}', expected entry or author", other)),
        }
    }
}

/// Result of [`merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub outcome: Outcome,
    /// Rows of the merged kind whose pointers were rewritten or that were
    /// named in the request.
    pub touched: Vec<i64>,
    /// Entries whose projection is now stale.
    pub reindex: Vec<EntryId>,
}

impl MergeResult {
    fn rejected(message: &str) -> Self {
        Self {
            outcome: Outcome::Error(message.to_string()),
            touched: Vec::new(),
            reindex: Vec::new(),
        }
    }
}

/// Merge `aliases` into `canonical`.
///
/// Ids that do not resolve are skipped. Fails with an error outcome, and
/// writes nothing, when the canonical does not resolve, no alias resolves,
/// or the canonical is among the aliases.
pub async fn merge<S: Store + ?Sized>(
    store: &S,
    target: MergeTarget,
    canonical: i64,
    aliases: &[i64],
) -> StoreResult<MergeResult> {
    if aliases.contains(&canonical) {
        return Ok(MergeResult::rejected(MERGE_WITH_ITSELF));
    }
    if !exists(store, target, canonical).await? {
        return Ok(MergeResult::rejected(MERGE_BAD_ARGUMENTS));
    }
    let mut valid = Vec::with_capacity(aliases.len());
    for &alias in aliases {
        if valid.contains(&alias) {
            continue;
        }
        if exists(store, target, alias).await? {
            valid.push(alias);
        } else {
            tracing::debug!("merge: ignoring unknown {:?} {}", target, alias);
        }
    }
    if valid.is_empty() {
        return Ok(MergeResult::rejected(MERGE_BAD_ARGUMENTS));
    }

    tracing::info!("merging {:?} {:?} into {}", target, valid, canonical);

    let graph = variant_graph(store, target, canonical, &valid).await?;
    let mut forest = CanonicalForest::new();
    for &alias in &valid {
        forest.union_into(canonical, alias);
        for variant in graph.descendants(alias, EdgeKind::CanonicalOf) {
            forest.union_into(canonical, variant);
        }
    }
    for variant in graph.descendants(canonical, EdgeKind::CanonicalOf) {
        forest.union_into(canonical, variant);
    }
    forest.promote(canonical);

    let mut touched: Vec<i64> = Vec::new();
    for (id, pointer) in forest.flatten() {
        let current = current_pointer(store, target, id).await?;
        if current != pointer {
            set_pointer(store, target, id, pointer).await?;
            touched.push(id);
        }
    }
    for id in valid.iter().copied().chain(std::iter::once(canonical)) {
        if !touched.contains(&id) {
            touched.push(id);
        }
    }
    touched.sort_unstable();

    let reindex = match target {
        MergeTarget::Entry => {
            let merged: Vec<EntryId> = touched.iter().copied().filter(|&id| id != canonical).collect();
            let moved = store.repoint_translations(&merged, canonical).await?;
            if !moved.is_empty() {
                tracing::debug!("repointed translations {:?} to entry {}", moved, canonical);
            }
            let mut reindex = touched.clone();
            reindex.extend(moved);
            dedup_sorted(reindex)
        }
        MergeTarget::Author => {
            let mut reindex = Vec::new();
            for agent in &touched {
                reindex.extend(store.entries_authored_by(*agent).await?);
            }
            dedup_sorted(reindex)
        }
    };

    Ok(MergeResult {
        outcome: Outcome::Success(MERGED.to_string()),
        touched,
        reindex,
    })
}

async fn exists<S: Store + ?Sized>(store: &S, target: MergeTarget, id: i64) -> StoreResult<bool> {
    Ok(match target {
        MergeTarget::Entry => store.get_entry(id).await?.is_some(),
        MergeTarget::Author => store.get_agent(id).await?.is_some(),
    })
}

async fn current_pointer<S: Store + ?Sized>(
    store: &S,
    target: MergeTarget,
    id: i64,
) -> StoreResult<Option<i64>> {
    Ok(match target {
        MergeTarget::Entry => store.get_entry(id).await?.and_then(|e| e.canonical_entry),
        MergeTarget::Author => store.get_agent(id).await?.and_then(|a| a.canonical_agent),
    })
}

async fn set_pointer<S: Store + ?Sized>(
    store: &S,
    target: MergeTarget,
    id: i64,
    pointer: Option<i64>,
) -> StoreResult<()> {
    match target {
        MergeTarget::Entry => store.set_entry_canonical(id, pointer).await,
        MergeTarget::Author => store.set_agent_canonical(id, pointer).await,
    }
}

async fn variants<S: Store + ?Sized>(
    store: &S,
    target: MergeTarget,
    id: i64,
) -> StoreResult<Vec<i64>> {
    Ok(match target {
        MergeTarget::Entry => store.entry_variants(id).await?.iter().map(|e| e.id).collect(),
        MergeTarget::Author => store.agent_variants(id).await?.iter().map(|a| a.id).collect(),
    })
}

/// Canonical-of edges reachable downward from the merge participants.
async fn variant_graph<S: Store + ?Sized>(
    store: &S,
    target: MergeTarget,
    canonical: i64,
    aliases: &[i64],
) -> StoreResult<EntityGraph> {
    let mut graph = EntityGraph::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<i64> = aliases.to_vec();
    stack.push(canonical);
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        graph.add_node(id);
        for variant in variants(store, target, id).await? {
            graph.add_edge(EdgeKind::CanonicalOf, variant, id);
            stack.push(variant);
        }
    }
    Ok(graph)
}

fn dedup_sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// The agent `id` finally resolves to.
///
/// Follows canonical pointers to the root. A pointer loop is reported and
/// resolved to the last agent reached before the loop closed.
pub async fn resolve_agent_root<S: Store + ?Sized>(
    store: &S,
    agent: Agent,
) -> StoreResult<Agent> {
    let mut seen: HashSet<AgentId> = HashSet::new();
    let mut current = agent;
    seen.insert(current.id);
    while let Some(next_id) = current.canonical_agent {
        if !seen.insert(next_id) {
            tracing::warn!("canonical agent loop through agent {}", next_id);
            break;
        }
        match store.get_agent(next_id).await? {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(current)
}

pub const TRANSLATION_MARKED: &str = "Translation marked";

/// Record `entry` as a translation of `original`.
///
/// Returns an error outcome when either id does not resolve, when they are
/// the same entry, or when the edge would close a translation loop.
pub async fn mark_translation<S: Store + ?Sized>(
    store: &S,
    entry: EntryId,
    original: EntryId,
) -> StoreResult<Outcome> {
    if entry == original {
        return Ok(Outcome::Error("An entry can't be a translation of itself".into()));
    }
    for id in [entry, original] {
        if store.get_entry(id).await?.is_none() {
            return Ok(Outcome::Error(format!("Entry {} not found", id)));
        }
    }

    // Walk the translation chain upward from the proposed original.
    let mut graph = EntityGraph::new();
    let mut current = original;
    let mut seen = HashSet::new();
    while seen.insert(current) {
        let next = match store.get_entry(current).await? {
            Some(e) => e.original_entry,
            None => None,
        };
        match next {
            Some(next) => {
                graph.add_edge(EdgeKind::TranslationOf, current, next);
                current = next;
            }
            None => break,
        }
    }
    if graph.would_cycle(EdgeKind::TranslationOf, entry, original) {
        return Ok(Outcome::Error(format!(
            "Entry {} is already an original of entry {}",
            entry, original
        )));
    }

    store.set_entry_original(entry, Some(original)).await?;
    tracing::info!("entry {} marked as translation of {}", entry, original);
    Ok(Outcome::Success(TRANSLATION_MARKED.to_string()))
}
