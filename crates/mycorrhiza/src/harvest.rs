//! Harvest orchestration.
//!
//! A harvest run visits every active source in turn:
//!
//! 1. The [`Harvester`] fetches raw records changed since the source's
//!    cursor (or everything, with `--force` or a one-off `--set`).
//! 2. Each record goes through the [`Normalizer`] and
//!    [`reconcile`](mycorrhiza_core::reconcile::reconcile). Invalid records
//!    are logged and skipped.
//! 3. Every entry the batch touched is re-projected once through a
//!    [`ReindexQueue`].
//! 4. If the flush touched anything, a harvest log row is written and,
//!    unless a one-off set was requested, the cursor moves to the time the
//!    batch started.
//!
//! A source that cannot be reached fails with
//! [`CatalogError::Connectivity`]; [`run_harvest`] logs it and moves on to
//! the next source.
//!
//! A forced harvest of every source starts from an empty index. Sources
//! that end up not harvested (inactive or unreachable) keep their records,
//! so their entries are projected again once the run is over.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use mycorrhiza_core::error::CatalogError;
use mycorrhiza_core::index::{FlushReport, IndexSink, ReindexQueue};
use mycorrhiza_core::models::Source;
use mycorrhiza_core::reconcile::{reconcile, ReconcileOptions};
use mycorrhiza_core::registry::AliasTable;
use mycorrhiza_core::store::Store;

use crate::config::{Config, HarvestConfig};
use crate::db;
use crate::normalize::{JsonNormalizer, Normalizer};
use crate::registry::sync_registry;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

/// One record as delivered by the harvesting transport.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub identifier: String,
    #[serde(default)]
    pub deleted: bool,
    /// Upstream modification time.
    #[serde(default)]
    pub datestamp: Option<DateTime<Utc>>,
    /// Sub-selections the record belongs to.
    #[serde(default)]
    pub sets: Vec<String>,
    #[serde(default, rename = "metadata")]
    pub payload: serde_json::Value,
}

/// Incremental fetch parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestRequest {
    /// Only records modified at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only records in this sub-selection.
    pub set: Option<String>,
}

/// Transport fetching raw records from one source.
#[async_trait]
pub trait Harvester: Send + Sync {
    async fn fetch(
        &self,
        source: &Source,
        request: &HarvestRequest,
    ) -> std::result::Result<Vec<RawRecord>, CatalogError>;
}

/// Where a source's dump files live.
#[derive(Debug, Clone)]
pub struct DumpLocation {
    pub root: PathBuf,
    pub include_globs: Vec<String>,
}

/// Harvester reading JSON dumps from local directories.
///
/// Each matching file holds one [`RawRecord`] or an array of them. Files
/// are read in path order and records in file order.
#[derive(Debug, Clone, Default)]
pub struct DumpHarvester {
    locations: HashMap<String, DumpLocation>,
}

impl DumpHarvester {
    pub fn new() -> Self {
        Self::default()
    }

    /// One location per configured source that has a `root`.
    pub fn from_config(config: &Config) -> Self {
        let mut harvester = Self::new();
        for (name, source) in &config.sources {
            if let Some(root) = &source.root {
                harvester.add_source(
                    name,
                    DumpLocation {
                        root: root.clone(),
                        include_globs: source.include_globs.clone(),
                    },
                );
            }
        }
        harvester
    }

    pub fn add_source(&mut self, name: &str, location: DumpLocation) {
        self.locations.insert(name.to_string(), location);
    }

    fn scan(&self, source: &Source, location: &DumpLocation) -> anyhow::Result<Vec<RawRecord>> {
        let include_set = build_globset(&location.include_globs)?;
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&location.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&location.root).unwrap_or(path);
            if include_set.is_match(relative) {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in &paths {
            match read_dump(path) {
                Ok(found) => records.extend(found),
                Err(e) => tracing::warn!("{}: skipping {}: {:#}", source.name, path.display(), e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Harvester for DumpHarvester {
    async fn fetch(
        &self,
        source: &Source,
        request: &HarvestRequest,
    ) -> std::result::Result<Vec<RawRecord>, CatalogError> {
        let unavailable = |reason: String| CatalogError::Connectivity {
            source_name: source.name.clone(),
            reason,
        };
        let location = self
            .locations
            .get(&source.name)
            .ok_or_else(|| unavailable("no dump root configured".to_string()))?;
        if !location.root.is_dir() {
            return Err(unavailable(format!(
                "dump root does not exist: {}",
                location.root.display()
            )));
        }

        let records = self
            .scan(source, location)
            .map_err(|e| unavailable(format!("{:#}", e)))?;
        Ok(records
            .into_iter()
            .filter(|r| match (request.from, r.datestamp) {
                (Some(from), Some(stamp)) => stamp >= from,
                _ => true,
            })
            .filter(|r| match &request.set {
                Some(set) => r.sets.iter().any(|s| s == set),
                None => true,
            })
            .collect())
    }
}

fn read_dump(path: &Path) -> anyhow::Result<Vec<RawRecord>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let records = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<RawRecord>, _>>()?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(records)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Command-line switches of a harvest run.
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Drop every record of the source first and ignore the cursor.
    pub force: bool,
    /// One-off sub-selection. Ignores the cursor and does not advance it.
    pub set: Option<String>,
    /// Restrict the run to sources whose name or URL contains this.
    pub source: Option<String>,
    /// Clear every canonical pointer first (with `force` and no `source`).
    pub nuke_aliases: bool,
}

/// What harvesting one source did.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub source: String,
    pub fetched: usize,
    pub reconciled: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub flush: FlushReport,
    pub cursor_advanced: bool,
}

impl HarvestReport {
    fn logs(&self) -> String {
        [
            format!("Fetched {} records", self.fetched),
            format!(
                "Reconciled {}, deleted {}, skipped {}",
                self.reconciled, self.deleted, self.skipped
            ),
            format!(
                "Indexed {}, removed {}",
                self.flush.indexed, self.flush.removed
            ),
            format!("Total indexed: {}", self.flush.touched()),
        ]
        .join("\n")
    }
}

/// Harvest one source and flush its index updates.
pub async fn harvest_source<S, I, H, N>(
    store: &S,
    index: &I,
    harvester: &H,
    normalizer: &N,
    source: &Source,
    settings: &HarvestConfig,
    options: &HarvestOptions,
) -> std::result::Result<HarvestReport, CatalogError>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
    H: Harvester + ?Sized,
    N: Normalizer + ?Sized,
{
    let now = Utc::now();
    let one_off = options.set.is_some();
    let request = HarvestRequest {
        from: if options.force || one_off {
            None
        } else {
            source.last_harvested
        },
        set: options.set.clone().or_else(|| source.harvest_set.clone()),
    };
    tracing::info!(
        "harvesting {} from {} (set: {})",
        source.name,
        source
            .last_harvested_zulu()
            .filter(|_| request.from.is_some())
            .unwrap_or_else(|| "the beginning".to_string()),
        request.set.as_deref().unwrap_or("all")
    );

    let records = harvester.fetch(source, &request).await?;
    let mut report = HarvestReport {
        source: source.name.clone(),
        fetched: records.len(),
        ..Default::default()
    };

    let mut queue = ReindexQueue::new();
    if options.force {
        // entries left without records drop out of the index at flush
        let orphaned = store.delete_records_for_source(source.id).await?;
        tracing::info!(
            "{}: dropped records of {} entries for a full harvest",
            source.name,
            orphaned.len()
        );
        queue.extend(orphaned);
    }

    let aliases = AliasTable::from_aliases(&store.aliases(source.id).await?);
    let hostname = source.hostname();
    let reconcile_options = ReconcileOptions {
        upsert_attempts: settings.upsert_attempts,
        ..Default::default()
    };

    for (counter, raw) in records.into_iter().enumerate() {
        if (counter + 1) % settings.progress_every == 0 {
            tracing::info!("{}: {} records done", source.name, counter + 1);
        }
        let record = match normalizer.normalize(&raw, hostname.as_deref()) {
            Ok(record) => record,
            Err(e) if e.is_validation() => {
                tracing::warn!("{}: skipping {}: {}", source.name, raw.identifier, e);
                report.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let deleted = record.deleted;
        match reconcile(store, source, record, &aliases, now, &reconcile_options).await {
            Ok(outcome) => {
                if deleted {
                    report.deleted += 1;
                    if outcome.severed.is_none() {
                        tracing::debug!("{}: {} deleted, nothing to remove", source.name, raw.identifier);
                    }
                } else {
                    report.reconciled += 1;
                }
                queue.extend(outcome.affected());
            }
            Err(e) if e.is_validation() => {
                tracing::warn!("{}: skipping {}: {}", source.name, raw.identifier, e);
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!("{}: reindexing {} entries", source.name, queue.len());
    report.flush = queue.flush(store, index).await?;

    if report.flush.touched() > 0 {
        if !one_off {
            tracing::info!("setting last harvested of {} to {}", source.name, now);
            store.set_last_harvested(source.id, now).await?;
            report.cursor_advanced = true;
        }
        store.record_harvest(source.id, now, &report.logs()).await?;
    }

    Ok(report)
}

/// Synchronise the registry, then harvest every active source that
/// matches `options`.
pub async fn run_harvest<S, I, H, N>(
    store: &S,
    index: &I,
    harvester: &H,
    normalizer: &N,
    config: &Config,
    options: &HarvestOptions,
) -> Result<Vec<HarvestReport>>
where
    S: Store + ?Sized,
    I: IndexSink + ?Sized,
    H: Harvester + ?Sized,
    N: Normalizer + ?Sized,
{
    let registered = sync_registry(store, config).await?;

    if options.nuke_aliases {
        if options.force && options.source.is_none() {
            let agents = store.clear_agent_canonicals().await?;
            let entries = store.clear_entry_canonicals().await?;
            tracing::info!(
                "cleared canonical pointers: {} agents, {} entries",
                agents,
                entries
            );
        } else {
            tracing::warn!("--nuke-aliases needs --force without --source, ignoring it");
        }
    }

    let full = options.force && options.source.is_none();
    if full {
        let removed = index.clear().await?;
        tracing::info!("full harvest: cleared {} index documents", removed);
    }

    // sources left alone by a full harvest keep their records
    let mut restore = ReindexQueue::new();
    let mut reports = Vec::new();
    for site in &registered {
        if !site.is_harvestable() {
            tracing::debug!("{} is inactive, skipping", site.source.name);
            if full {
                restore.extend(store.source_entry_ids(site.source.id).await?);
            }
            continue;
        }
        if let Some(filter) = &options.source {
            if !site.matches(filter) {
                continue;
            }
        }
        match harvest_source(
            store,
            index,
            harvester,
            normalizer,
            &site.source,
            &config.harvest,
            options,
        )
        .await
        {
            Ok(report) => reports.push(report),
            Err(e) if e.is_connectivity() => {
                tracing::warn!("failure on connection to {}, skipping: {}", site.source.url, e);
                if full {
                    restore.extend(store.source_entry_ids(site.source.id).await?);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !restore.is_empty() {
        let flush = restore.flush(store, index).await?;
        tracing::info!(
            "restored {} index documents of sources not harvested",
            flush.indexed
        );
    }
    Ok(reports)
}

/// Run the harvest command against the configured database and dumps.
pub async fn run_harvest_command(config: &Config, options: &HarvestOptions) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let index = SqliteIndex::new(pool.clone());
    let harvester = DumpHarvester::from_config(config);

    let reports = run_harvest(&store, &index, &harvester, &JsonNormalizer, config, options).await?;

    if reports.is_empty() {
        println!("No sources harvested.");
    } else {
        println!(
            "{:<20} {:>8} {:>10} {:>8} {:>8} {:>8} {:>8}  CURSOR",
            "SOURCE", "FETCHED", "RECONCILED", "DELETED", "SKIPPED", "INDEXED", "REMOVED"
        );
        for r in &reports {
            println!(
                "{:<20} {:>8} {:>10} {:>8} {:>8} {:>8} {:>8}  {}",
                r.source,
                r.fetched,
                r.reconciled,
                r.deleted,
                r.skipped,
                r.flush.indexed,
                r.flush.removed,
                if r.cursor_advanced { "advanced" } else { "kept" }
            );
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycorrhiza_core::index::MemoryIndex;
    use mycorrhiza_core::models::NewLibrary;
    use mycorrhiza_core::models::NewSource;
    use mycorrhiza_core::store::memory::InMemoryStore;
    use serde_json::json;

    struct FixedHarvester {
        records: Vec<RawRecord>,
    }

    #[async_trait]
    impl Harvester for FixedHarvester {
        async fn fetch(
            &self,
            source: &Source,
            request: &HarvestRequest,
        ) -> std::result::Result<Vec<RawRecord>, CatalogError> {
            if source.name == "down" {
                return Err(CatalogError::Connectivity {
                    source_name: source.name.clone(),
                    reason: "refused".into(),
                });
            }
            Ok(self
                .records
                .iter()
                .filter(|r| request.set.as_ref().map_or(true, |s| r.sets.contains(s)))
                .cloned()
                .collect())
        }
    }

    fn raw(identifier: &str, title: &str, deleted: bool) -> RawRecord {
        RawRecord {
            identifier: identifier.into(),
            deleted,
            datestamp: None,
            sets: vec!["web".into()],
            payload: json!({ "title": title, "authors": ["Pinco Pallino"], "languages": ["en"] }),
        }
    }

    async fn site(store: &InMemoryStore, name: &str) -> Source {
        let lib = store
            .upsert_library(&NewLibrary {
                name: "Lib".into(),
                url: None,
                public: true,
                active: true,
            })
            .await
            .unwrap();
        store
            .upsert_source(&NewSource {
                library_id: lib.id,
                name: name.into(),
                url: format!("https://{}.org/oai-pmh", name),
                active: true,
                harvest_set: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_harvest_advances_cursor_and_logs() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let source = site(&store, "a").await;
        let harvester = FixedHarvester {
            records: vec![raw("oai:a:1", "Pizza", false), raw("oai:a:2", "Pasta", false)],
        };

        let report = harvest_source(
            &store,
            &index,
            &harvester,
            &JsonNormalizer,
            &source,
            &HarvestConfig::default(),
            &HarvestOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.reconciled, 2);
        assert_eq!(report.flush.indexed, 2);
        assert!(report.cursor_advanced);
        assert!(store.get_source(source.id).await.unwrap().unwrap().last_harvested.is_some());
        let logs = store.harvest_logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].logs.contains("Total indexed: 2"));
    }

    #[tokio::test]
    async fn test_one_off_set_keeps_cursor() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let source = site(&store, "a").await;
        let harvester = FixedHarvester {
            records: vec![raw("oai:a:1", "Pizza", false)],
        };
        let options = HarvestOptions {
            set: Some("web".into()),
            ..Default::default()
        };

        let report = harvest_source(
            &store,
            &index,
            &harvester,
            &JsonNormalizer,
            &source,
            &HarvestConfig::default(),
            &options,
        )
        .await
        .unwrap();

        assert_eq!(report.flush.indexed, 1);
        assert!(!report.cursor_advanced);
        assert!(store.get_source(source.id).await.unwrap().unwrap().last_harvested.is_none());
        assert_eq!(store.harvest_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_indexed_leaves_cursor_alone() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let source = site(&store, "a").await;
        let harvester = FixedHarvester { records: vec![] };

        let report = harvest_source(
            &store,
            &index,
            &harvester,
            &JsonNormalizer,
            &source,
            &HarvestConfig::default(),
            &HarvestOptions::default(),
        )
        .await
        .unwrap();
        assert!(!report.cursor_advanced);
        assert!(store.harvest_logs().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_record_removes_entry_from_index() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let source = site(&store, "a").await;
        let settings = HarvestConfig::default();
        let options = HarvestOptions::default();

        let first = FixedHarvester {
            records: vec![raw("oai:a:1", "Pizza", false)],
        };
        harvest_source(&store, &index, &first, &JsonNormalizer, &source, &settings, &options)
            .await
            .unwrap();
        assert_eq!(index.len(), 1);

        let second = FixedHarvester {
            records: vec![raw("oai:a:1", "Pizza", true)],
        };
        let report =
            harvest_source(&store, &index, &second, &JsonNormalizer, &source, &settings, &options)
                .await
                .unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.flush.removed, 1);
        assert!(index.is_empty());
        assert_eq!(store.counts().await.unwrap().entries, 1, "the entry itself survives");
    }

    #[tokio::test]
    async fn test_force_requeues_dropped_entries() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let source = site(&store, "a").await;
        let settings = HarvestConfig::default();

        let full = FixedHarvester {
            records: vec![raw("oai:a:1", "Pizza", false), raw("oai:a:2", "Pasta", false)],
        };
        harvest_source(&store, &index, &full, &JsonNormalizer, &source, &settings, &HarvestOptions::default())
            .await
            .unwrap();
        assert_eq!(index.len(), 2);

        let partial = FixedHarvester {
            records: vec![raw("oai:a:1", "Pizza", false)],
        };
        let forced = HarvestOptions {
            force: true,
            ..Default::default()
        };
        let report = harvest_source(&store, &index, &partial, &JsonNormalizer, &source, &settings, &forced)
            .await
            .unwrap();
        assert_eq!(report.flush.indexed, 1);
        assert_eq!(report.flush.removed, 1);
        assert_eq!(index.len(), 1);
        assert_eq!(store.counts().await.unwrap().records, 1);
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let source = site(&store, "a").await;
        let mut broken = raw("oai:a:bad", "Broken", false);
        broken.payload = json!({ "authors": 42 });
        let harvester = FixedHarvester {
            records: vec![broken, raw("oai:a:1", "Pizza", false)],
        };

        let report = harvest_source(
            &store,
            &index,
            &harvester,
            &JsonNormalizer,
            &source,
            &HarvestConfig::default(),
            &HarvestOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.reconciled, 1);
    }

    #[tokio::test]
    async fn test_dump_harvester_missing_root_is_connectivity() {
        let store = InMemoryStore::new();
        let source = site(&store, "a").await;
        let mut harvester = DumpHarvester::new();
        harvester.add_source(
            "a",
            DumpLocation {
                root: PathBuf::from("/nonexistent/myco-dumps"),
                include_globs: vec!["**/*.json".into()],
            },
        );
        let err = harvester
            .fetch(&source, &HarvestRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());

        let other = site(&store, "b").await;
        let err = harvester
            .fetch(&other, &HarvestRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_dump_harvester_reads_files_and_filters() {
        let store = InMemoryStore::new();
        let source = site(&store, "a").await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("one.json"),
            json!({
                "identifier": "oai:a:1",
                "datestamp": "2024-01-01T00:00:00Z",
                "sets": ["web"],
                "metadata": { "title": "Old" }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/many.json"),
            json!([
                { "identifier": "oai:a:2", "datestamp": "2024-06-01T00:00:00Z", "metadata": { "title": "New" } },
                { "identifier": "oai:a:3", "deleted": true }
            ])
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut harvester = DumpHarvester::new();
        harvester.add_source(
            "a",
            DumpLocation {
                root: dir.path().to_path_buf(),
                include_globs: vec!["**/*.json".into()],
            },
        );

        let all = harvester.fetch(&source, &HarvestRequest::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let since = HarvestRequest {
            from: Some("2024-03-01T00:00:00Z".parse().unwrap()),
            set: None,
        };
        let recent: Vec<String> = harvester
            .fetch(&source, &since)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        assert_eq!(recent, vec!["oai:a:2".to_string(), "oai:a:3".to_string()]);

        let web = HarvestRequest {
            from: None,
            set: Some("web".into()),
        };
        assert_eq!(harvester.fetch(&source, &web).await.unwrap().len(), 1);
    }

    /// Serves each source its own records; sources without an entry are
    /// unreachable.
    struct SiteHarvester {
        records: HashMap<String, Vec<RawRecord>>,
    }

    #[async_trait]
    impl Harvester for SiteHarvester {
        async fn fetch(
            &self,
            source: &Source,
            _request: &HarvestRequest,
        ) -> std::result::Result<Vec<RawRecord>, CatalogError> {
            self.records
                .get(&source.name)
                .cloned()
                .ok_or_else(|| CatalogError::Connectivity {
                    source_name: source.name.clone(),
                    reason: "refused".into(),
                })
        }
    }

    fn config_with(names: &[&str]) -> Config {
        use crate::config::{DbConfig, LibraryConfig, SourceConfig};
        use std::collections::BTreeMap;

        let mut libraries = BTreeMap::new();
        libraries.insert(
            "lib".to_string(),
            LibraryConfig {
                url: None,
                public: true,
                active: true,
            },
        );
        let mut sources = BTreeMap::new();
        for name in names {
            sources.insert(
                name.to_string(),
                SourceConfig {
                    library: "lib".into(),
                    url: format!("https://{}.org", name),
                    root: None,
                    include_globs: vec!["**/*.json".into()],
                    set: None,
                    active: true,
                    aliases: Default::default(),
                },
            );
        }
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
    async fn test_run_harvest_skips_unreachable_sources() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let config = config_with(&["down", "up"]);
        let harvester = FixedHarvester {
            records: vec![raw("oai:up:1", "Pizza", false)],
        };

        let reports = run_harvest(
            &store,
            &index,
            &harvester,
            &JsonNormalizer,
            &config,
            &HarvestOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].source, "up");
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_full_harvest_keeps_documents_of_unreachable_source() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let config = config_with(&["a", "b"]);
        let mut records = HashMap::new();
        records.insert("a".to_string(), vec![raw("oai:a:1", "Pizza", false)]);
        records.insert("b".to_string(), vec![raw("oai:b:1", "Pasta", false)]);

        let both = SiteHarvester {
            records: records.clone(),
        };
        run_harvest(&store, &index, &both, &JsonNormalizer, &config, &HarvestOptions::default())
            .await
            .unwrap();
        assert_eq!(index.len(), 2);

        records.remove("b");
        let only_a = SiteHarvester { records };
        let force = HarvestOptions {
            force: true,
            ..Default::default()
        };
        let reports = run_harvest(&store, &index, &only_a, &JsonNormalizer, &config, &force)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].source, "a");
        assert_eq!(store.counts().await.unwrap().entries, 2);
        assert_eq!(index.len(), 2, "b still has records, so its entry stays indexed");
    }

    #[tokio::test]
    async fn test_nuke_aliases_needs_force_without_source() {
        let store = InMemoryStore::new();
        let index = MemoryIndex::new();
        let config = config_with(&["a"]);
        let mut records = HashMap::new();
        records.insert(
            "a".to_string(),
            vec![raw("oai:a:1", "Pizza", false), raw("oai:a:2", "Pasta", false)],
        );
        let harvester = SiteHarvester { records };
        run_harvest(&store, &index, &harvester, &JsonNormalizer, &config, &HarvestOptions::default())
            .await
            .unwrap();

        let ids = store.entry_ids().await.unwrap();
        let agent = store.find_agent_by_name("Pinco Pallino").await.unwrap().unwrap();
        let alias = store.insert_agent("P. Pallino").await.unwrap();
        store.set_entry_canonical(ids[1], Some(ids[0])).await.unwrap();
        store.set_agent_canonical(alias.id, Some(agent.id)).await.unwrap();

        let ignored = [
            HarvestOptions {
                nuke_aliases: true,
                ..Default::default()
            },
            HarvestOptions {
                force: true,
                source: Some("a".into()),
                nuke_aliases: true,
                ..Default::default()
            },
        ];
        for options in &ignored {
            run_harvest(&store, &index, &harvester, &JsonNormalizer, &config, options)
                .await
                .unwrap();
            let entry = store.get_entry(ids[1]).await.unwrap().unwrap();
            assert_eq!(entry.canonical_entry, Some(ids[0]), "{:?}", options);
            let variant = store.get_agent(alias.id).await.unwrap().unwrap();
            assert_eq!(variant.canonical_agent, Some(agent.id), "{:?}", options);
        }

        let nuke = HarvestOptions {
            force: true,
            nuke_aliases: true,
            ..Default::default()
        };
        run_harvest(&store, &index, &harvester, &JsonNormalizer, &config, &nuke)
            .await
            .unwrap();
        let entry = store.get_entry(ids[1]).await.unwrap().unwrap();
        assert_eq!(entry.canonical_entry, None);
        let variant = store.get_agent(alias.id).await.unwrap().unwrap();
        assert_eq!(variant.canonical_agent, None);
    }
}
