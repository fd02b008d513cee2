//! Export the search index as JSON.
//!
//! Produces one JSON object holding every indexed document, suitable for
//! loading into an external search engine or a static site.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use mycorrhiza_core::projection::Document;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;

#[derive(Serialize)]
struct ExportData {
    exported_at: String,
    total: usize,
    /// Documents visible to anonymous readers.
    public: usize,
    documents: Vec<Document>,
}

fn export_data(documents: Vec<Document>) -> ExportData {
    ExportData {
        exported_at: chrono::Utc::now()
            .format(mycorrhiza_core::projection::ZULU)
            .to_string(),
        total: documents.len(),
        public: documents.iter().filter(|d| d.public).count(),
        documents,
    }
}

/// Export indexed documents as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = SqliteIndex::new(pool.clone());

    let data = export_data(index.documents().await?);
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            tracing::info!(
                "exported {} documents ({} public) to {}",
                data.total,
                data.public,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    pool.close().await;
    Ok(())
}
