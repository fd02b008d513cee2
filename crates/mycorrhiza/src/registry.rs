//! Source registry synchronisation.
//!
//! Libraries and sources are declared in the config file and upserted into
//! the store by name on every run, so flags and alias tables always match
//! the config. A source's harvest cursor is never touched here.

use anyhow::{Context, Result};

use mycorrhiza_core::models::{Library, NewLibrary, NewSource, Source};
use mycorrhiza_core::store::Store;

use crate::config::{Config, SourceConfig};

/// A configured source together with its stored row and library.
#[derive(Debug, Clone)]
pub struct RegisteredSource {
    pub source: Source,
    pub library: Library,
    pub settings: SourceConfig,
}

impl RegisteredSource {
    /// Whether a harvest run should visit this source.
    pub fn is_harvestable(&self) -> bool {
        self.source.active && self.library.active
    }

    /// Match a `--source` filter against the name or URL.
    pub fn matches(&self, filter: &str) -> bool {
        self.source.name.contains(filter) || self.source.url.contains(filter)
    }
}

/// Upsert every configured library and source, replacing alias tables.
///
/// Returns the sources in config order (sorted by name).
pub async fn sync_registry<S: Store + ?Sized>(
    store: &S,
    config: &Config,
) -> Result<Vec<RegisteredSource>> {
    let mut libraries = Vec::with_capacity(config.libraries.len());
    for (name, lib) in &config.libraries {
        let row = store
            .upsert_library(&NewLibrary {
                name: name.clone(),
                url: lib.url.clone(),
                public: lib.public,
                active: lib.active,
            })
            .await
            .with_context(|| format!("Failed to register library '{}'", name))?;
        tracing::debug!(
            "library {} ({}): public={} active={}",
            row.name,
            row.id,
            row.public,
            row.active
        );
        libraries.push(row);
    }

    let mut registered = Vec::with_capacity(config.sources.len());
    for (name, settings) in &config.sources {
        let Some(library) = libraries.iter().find(|l| l.name == settings.library) else {
            anyhow::bail!("source '{}' names unknown library '{}'", name, settings.library);
        };
        let source = store
            .upsert_source(&NewSource {
                library_id: library.id,
                name: name.clone(),
                url: settings.url.clone(),
                active: settings.active,
                harvest_set: settings.set.clone(),
            })
            .await
            .with_context(|| format!("Failed to register source '{}'", name))?;

        let aliases = settings.aliases.to_aliases(source.id);
        store
            .replace_aliases(source.id, &aliases)
            .await
            .with_context(|| format!("Failed to store aliases of source '{}'", name))?;
        if !aliases.is_empty() {
            tracing::debug!("source {}: {} aliases", name, aliases.len());
        }

        registered.push(RegisteredSource {
            source,
            library: library.clone(),
            settings: settings.clone(),
        });
    }

    for stored in store.list_sources().await? {
        if !config.sources.contains_key(&stored.name) {
            tracing::warn!(
                "source '{}' is in the database but not in the config, leaving it alone",
                stored.name
            );
        }
    }

    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AliasesConfig, DbConfig, HarvestConfig, LibraryConfig};
    use mycorrhiza_core::registry::AliasField;
    use mycorrhiza_core::store::memory::InMemoryStore;
    use std::collections::BTreeMap;

    fn config(public: bool) -> Config {
        let mut libraries = BTreeMap::new();
        libraries.insert(
            "lib".to_string(),
            LibraryConfig {
                url: None,
                public,
                active: true,
            },
        );
        let mut aliases = AliasesConfig::default();
        aliases
            .language
            .insert("ita".to_string(), "it".to_string());
        let mut sources = BTreeMap::new();
        sources.insert(
            "site".to_string(),
            SourceConfig {
                library: "lib".to_string(),
                url: "https://site.org/oai-pmh".to_string(),
                root: None,
                include_globs: vec!["**/*.json".to_string()],
                set: Some("web".to_string()),
                active: true,
                aliases,
            },
        );
        Config {
            db: DbConfig {
                path: "unused.sqlite".into(),
            },
            harvest: HarvestConfig::default(),
            libraries,
            sources,
        }
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_keeps_cursor() {
        let store = InMemoryStore::new();
        let first = sync_registry(&store, &config(true)).await.unwrap();
        assert_eq!(first.len(), 1);
        let site = &first[0];
        assert!(site.library.is_visible());
        assert_eq!(site.source.harvest_set.as_deref(), Some("web"));

        let at = chrono::Utc::now();
        store.set_last_harvested(site.source.id, at).await.unwrap();

        let second = sync_registry(&store, &config(false)).await.unwrap();
        assert_eq!(second[0].source.id, site.source.id);
        assert_eq!(second[0].source.last_harvested, Some(at));
        assert!(!second[0].library.is_visible());

        let aliases = store.aliases(site.source.id).await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].field, AliasField::Language);
        assert_eq!(store.counts().await.unwrap().sources, 1);
    }

    #[tokio::test]
    async fn test_source_filter_matches_name_or_url() {
        let store = InMemoryStore::new();
        let registered = sync_registry(&store, &config(true)).await.unwrap();
        assert!(registered[0].matches("site.org"));
        assert!(registered[0].matches("sit"));
        assert!(!registered[0].matches("elsewhere"));
        assert!(registered[0].is_harvestable());
    }
}
