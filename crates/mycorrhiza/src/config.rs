//! Configuration parsing and validation.
//!
//! Mycorrhiza is configured via a TOML file (default: `config/myco.toml`).
//! Libraries and sources are declared here by name and synchronised into
//! the database on every run (see [`crate::registry`]), so the file is the
//! authority for visibility flags and alias tables.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/myco.sqlite"
//!
//! [harvest]
//! progress_every = 100
//!
//! [libraries.anarchist]
//! url = "https://anarchistlibraries.net"
//! public = true
//!
//! [sources.amusewiki]
//! library = "anarchist"
//! url = "https://staging.amusewiki.org/oai-pmh"
//! root = "./dumps/amusewiki"
//!
//! [sources.amusewiki.aliases.author]
//! "Pinco Pallino" = "Pallino, Pinco"
//! ```

use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mycorrhiza_core::registry::{AliasField, NameAlias};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryConfig>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Log a progress line every this many records.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    /// Attempts per get-or-create before giving up.
    #[serde(default = "default_upsert_attempts")]
    pub upsert_attempts: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            progress_every: default_progress_every(),
            upsert_attempts: default_upsert_attempts(),
        }
    }
}

fn default_progress_every() -> usize {
    100
}
fn default_upsert_attempts() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Name of the `[libraries.*]` table this source belongs to.
    pub library: String,
    pub url: String,
    /// Directory holding the source's record dumps.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Standing sub-selection applied to every harvest of this source.
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub aliases: AliasesConfig,
}

fn default_true() -> bool {
    true
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

/// Raw value → canonical value tables, one per aliased field.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AliasesConfig {
    #[serde(default)]
    pub author: BTreeMap<String, String>,
    #[serde(default)]
    pub language: BTreeMap<String, String>,
    #[serde(default)]
    pub title: BTreeMap<String, String>,
    #[serde(default)]
    pub subtitle: BTreeMap<String, String>,
}

impl AliasesConfig {
    fn table(&self, field: AliasField) -> &BTreeMap<String, String> {
        match field {
            AliasField::Author => &self.author,
            AliasField::Language => &self.language,
            AliasField::Title => &self.title,
            AliasField::Subtitle => &self.subtitle,
        }
    }

    /// Flatten the tables into alias rows for `source_id`.
    pub fn to_aliases(&self, source_id: i64) -> Vec<NameAlias> {
        AliasField::ALL
            .iter()
            .flat_map(|&field| {
                self.table(field).iter().map(move |(value, canonical)| NameAlias {
                    source_id,
                    field,
                    value: value.clone(),
                    canonical: canonical.clone(),
                })
            })
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.harvest.upsert_attempts < 1 {
        anyhow::bail!("harvest.upsert_attempts must be >= 1");
    }
    if config.harvest.progress_every == 0 {
        anyhow::bail!("harvest.progress_every must be > 0");
    }

    for (name, source) in &config.sources {
        if !config.libraries.contains_key(&source.library) {
            anyhow::bail!(
                "sources.{}.library names an unknown library: '{}'",
                name,
                source.library
            );
        }
        if source.url.trim().is_empty() {
            anyhow::bail!("sources.{}.url must not be empty", name);
        }
        for pattern in &source.include_globs {
            Glob::new(pattern).with_context(|| {
                format!("sources.{}.include_globs: invalid glob '{}'", name, pattern)
            })?;
        }
        for field in AliasField::ALL {
            for (value, canonical) in source.aliases.table(field) {
                if value.trim().is_empty() || canonical.trim().is_empty() {
                    anyhow::bail!(
                        "sources.{}.aliases.{}: empty alias '{}' = '{}'",
                        name,
                        field,
                        value,
                        canonical
                    );
                }
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let file = write_config(
            r#"
[db]
path = "./data/myco.sqlite"

[libraries.lib]

[sources.site]
library = "lib"
url = "https://site.org/oai-pmh"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.harvest.progress_every, 100);
        assert_eq!(config.harvest.upsert_attempts, 3);
        let lib = &config.libraries["lib"];
        assert!(!lib.public);
        assert!(lib.active);
        let site = &config.sources["site"];
        assert_eq!(site.include_globs, vec!["**/*.json".to_string()]);
        assert!(site.aliases.to_aliases(1).is_empty());
    }

    #[test]
    fn test_unknown_library_rejected() {
        let file = write_config(
            r#"
[db]
path = "x.sqlite"

[sources.site]
library = "nope"
url = "https://site.org"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("unknown library"));
    }

    #[test]
    fn test_bad_glob_and_empty_alias_rejected() {
        let file = write_config(
            r#"
[db]
path = "x.sqlite"

[libraries.lib]

[sources.site]
library = "lib"
url = "https://site.org"
include_globs = ["**/[.json"]
"#,
        );
        assert!(load_config(file.path()).is_err());

        let file = write_config(
            r#"
[db]
path = "x.sqlite"

[libraries.lib]

[sources.site]
library = "lib"
url = "https://site.org"

[sources.site.aliases.author]
"Pinco" = ""
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("aliases.author"));
    }

    #[test]
    fn test_aliases_flatten_per_field() {
        let file = write_config(
            r#"
[db]
path = "x.sqlite"

[libraries.lib]

[sources.site]
library = "lib"
url = "https://site.org"

[sources.site.aliases.author]
"Pinco" = "Pallino, Pinco"

[sources.site.aliases.language]
"ita" = "it"
"#,
        );
        let config = load_config(file.path()).unwrap();
        let aliases = config.sources["site"].aliases.to_aliases(7);
        assert_eq!(aliases.len(), 2);
        assert!(aliases.iter().all(|a| a.source_id == 7));
        assert!(aliases
            .iter()
            .any(|a| a.field == AliasField::Language && a.canonical == "it"));
    }
}
