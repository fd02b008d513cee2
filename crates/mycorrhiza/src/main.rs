//! # Mycorrhiza CLI (`myco`)
//!
//! The `myco` binary drives the catalog: schema setup, harvesting,
//! reindexing, curation, and inspection.
//!
//! ## Usage
//!
//! ```bash
//! myco --config ./config/myco.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `myco init` | Create the SQLite database and run schema migrations |
//! | `myco sources` | Sync the registry and list sources with their cursors |
//! | `myco harvest` | Harvest every active source incrementally |
//! | `myco reindex` | Re-project every entry, or one with `--entry` |
//! | `myco merge entry\|author <canonical> <alias>...` | Merge duplicates |
//! | `myco aggregate <aggregation> <entry>...` | Attach entries to an aggregation |
//! | `myco translate <entry> <original>` | Mark a translation |
//! | `myco show <entry>` | Library-filtered display of an entry |
//! | `myco search "<query>"` | Keyword search over indexed documents |
//! | `myco stats` | Row counts and per-source cursors |
//! | `myco export` | Dump indexed documents as JSON |
//!
//! ## Examples
//!
//! ```bash
//! # Full re-harvest of every source, dropping merge decisions
//! myco harvest --force --nuke-aliases
//!
//! # One-off harvest of a set from one site; the cursor stays put
//! myco harvest --source example.org --set books
//!
//! # Merge entries 12 and 13 into 7
//! myco merge entry 7 12 13
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mycorrhiza::curate::{self, Curation};
use mycorrhiza::harvest::{self, HarvestOptions};
use mycorrhiza::{config, export, migrate, reindex, search, sources, stats};
use mycorrhiza_core::canonical::MergeTarget;

/// Mycorrhiza: a federated bibliographic catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/myco.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "myco",
    about = "Mycorrhiza: harvest, reconcile, and index bibliographic records from many sites",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/myco.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Sync libraries and sources from the config and list them.
    Sources,

    /// Harvest records from every active source.
    ///
    /// Without flags only records changed since each source's last
    /// harvest are fetched.
    Harvest {
        /// Drop every record of each harvested source first and ignore
        /// the cursor. Without `--source` the whole index is cleared.
        #[arg(long)]
        force: bool,

        /// Harvest only this set. Ignores the cursor and does not move it.
        #[arg(long)]
        set: Option<String>,

        /// Only sources whose name or URL contains this string.
        #[arg(long)]
        source: Option<String>,

        /// Clear every merge decision first. Needs `--force` without
        /// `--source`.
        #[arg(long)]
        nuke_aliases: bool,
    },

    /// Rebuild index documents from the catalog.
    Reindex {
        /// Reindex only this entry and print its document.
        #[arg(long)]
        entry: Option<i64>,
    },

    /// Merge duplicate entries or authors into a canonical one.
    Merge {
        /// `entry` or `author`.
        target: MergeTarget,
        canonical: i64,
        #[arg(required = true)]
        aliases: Vec<i64>,
    },

    /// Attach entries to an aggregation entry.
    Aggregate {
        aggregation: i64,
        #[arg(required = true)]
        members: Vec<i64>,
    },

    /// Mark an entry as a translation of another.
    Translate { entry: i64, original: i64 },

    /// Show an entry and its relatives as seen through some libraries.
    Show {
        entry: i64,

        /// Library ids to look through. Defaults to every public library.
        #[arg(long = "library")]
        libraries: Vec<i64>,
    },

    /// Keyword search over indexed documents.
    Search {
        query: String,

        /// Include documents that are not public.
        #[arg(long)]
        all: bool,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show catalog statistics.
    Stats,

    /// Export indexed documents as JSON.
    Export {
        /// Output file path. Prints to stdout if omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("mycorrhiza=info,mycorrhiza_core=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Harvest {
            force,
            set,
            source,
            nuke_aliases,
        } => {
            let options = HarvestOptions {
                force,
                set,
                source,
                nuke_aliases,
            };
            harvest::run_harvest_command(&cfg, &options).await?;
        }
        Commands::Reindex { entry } => {
            reindex::run_reindex(&cfg, entry).await?;
        }
        Commands::Merge {
            target,
            canonical,
            aliases,
        } => {
            curate::run_curation(
                &cfg,
                Curation::Merge {
                    target,
                    canonical,
                    aliases,
                },
            )
            .await?;
        }
        Commands::Aggregate {
            aggregation,
            members,
        } => {
            curate::run_curation(
                &cfg,
                Curation::Aggregate {
                    aggregation,
                    members,
                },
            )
            .await?;
        }
        Commands::Translate { entry, original } => {
            curate::run_curation(&cfg, Curation::Translate { entry, original }).await?;
        }
        Commands::Show { entry, libraries } => {
            curate::run_show(&cfg, entry, &libraries).await?;
        }
        Commands::Search { query, all, limit } => {
            search::run_search(&cfg, &query, all, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
    }

    Ok(())
}
