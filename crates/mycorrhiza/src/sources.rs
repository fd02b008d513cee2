use anyhow::Result;

use mycorrhiza_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::registry::sync_registry;
use crate::sqlite_store::SqliteStore;

/// Print every configured source with its library, flags and cursor.
pub async fn list_sources(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let registered = sync_registry(&store, config).await?;

    println!(
        "{:<20} {:<20} {:<8} {:<8} {:<10} LAST HARVESTED",
        "SOURCE", "LIBRARY", "ACTIVE", "VISIBLE", "DUMP"
    );
    for site in &registered {
        let dump = match &site.settings.root {
            Some(root) if root.is_dir() => "OK",
            Some(_) => "MISSING",
            None => "NONE",
        };
        println!(
            "{:<20} {:<20} {:<8} {:<8} {:<10} {}",
            site.source.name,
            site.library.name,
            site.is_harvestable(),
            site.library.is_visible(),
            dump,
            site.source
                .last_harvested_zulu()
                .unwrap_or_else(|| "never".to_string())
        );
    }

    let aliases: usize = {
        let mut total = 0;
        for site in &registered {
            total += store.aliases(site.source.id).await?.len();
        }
        total
    };
    if aliases > 0 {
        println!();
        println!("{} name aliases configured", aliases);
    }

    pool.close().await;
    Ok(())
}
