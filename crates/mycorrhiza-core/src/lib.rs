//! # Mycorrhiza Core
//!
//! Record reconciliation and index projection for a federated
//! bibliographic catalog: per-site metadata records go in, a deduplicated
//! catalog of entries and one search document per entry come out.
//!
//! This crate contains no sqlx, filesystem I/O, or async runtime. Storage
//! is reached through the [`store::Store`] trait and the search index
//! through [`index::IndexSink`]; both are passed in explicitly.
//!
//! | Module | Role |
//! |--------|------|
//! | [`models`] | Catalog rows and the normalized input record |
//! | [`fingerprint`] | Content hashes used as the dedup key |
//! | [`registry`] | Per-source alias tables |
//! | [`graph`] | Typed self-reference graph and canonical union-find |
//! | [`upsert`] | Bounded, race-tolerant get-or-create |
//! | [`reconcile`] | Central write path for harvested records |
//! | [`canonical`] | Merging duplicate entries and agents, translations |
//! | [`aggregate`] | Curated aggregation membership and virtual records |
//! | [`projection`] | Denormalized, visibility-aware search documents |
//! | [`index`] | Index sink trait and the deduplicating reindex queue |
//! | [`display`] | Library-filtered view of an entry and its relatives |

pub mod aggregate;
pub mod canonical;
pub mod display;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod index;
pub mod models;
pub mod projection;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod upsert;

#[cfg(test)]
mod test_support;
