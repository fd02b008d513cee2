//! # Mycorrhiza
//!
//! Harvests bibliographic records from many sites into one deduplicated
//! catalog and projects every catalog entry into a search document.
//!
//! The reconciliation and projection engines live in
//! [`mycorrhiza_core`]; this crate supplies SQLite storage, the TOML
//! configuration, the harvest loop, and the `myco` command line.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Harvester  │──▶│ Normalizer │──▶│  reconcile  │──▶│    SQLite     │
//! │ (JSON dumps)│   │   (JSON)   │   │ (core crate)│   │ catalog rows  │
//! └─────────────┘   └────────────┘   └──────┬──────┘   └──────────────┘
//!                                           │ touched entries
//!                                           ▼
//!                                    ┌─────────────┐   ┌──────────────┐
//!                                    │ReindexQueue │──▶│ index_documents│
//!                                    │  + project  │   │   + FTS5      │
//!                                    └─────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the catalog store |
//! | [`sqlite_index`] | SQLite/FTS5 search index sink |
//! | [`registry`] | Library and source registry sync |
//! | [`normalize`] | Raw payload to normalized record |
//! | [`harvest`] | Harvest transport and batch orchestration |
//! | [`reindex`] | Full and single-entry re-projection |
//! | [`curate`] | Merge, aggregate, translate, show |
//! | [`search`] | Keyword search over the local index |
//! | [`sources`] | Source listing |
//! | [`stats`] | Catalog statistics |
//! | [`export`] | JSON export of the index |

pub mod config;
pub mod curate;
pub mod db;
pub mod export;
pub mod harvest;
pub mod migrate;
pub mod normalize;
pub mod registry;
pub mod reindex;
pub mod search;
pub mod sources;
pub mod sqlite_index;
pub mod sqlite_store;
pub mod stats;
