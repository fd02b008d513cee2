//! Site-scoped alias tables.
//!
//! Each source may override how raw values of four fields are mapped to
//! canonical ones (a site that spells an author differently, a site that
//! tags languages as `eng` instead of `en`). The table is loaded once per
//! reconciliation batch via [`Store::aliases`](crate::store::Store::aliases)
//! and [`AliasTable::from_aliases`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::SourceId;

/// Field an alias applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasField {
    Author,
    Language,
    Title,
    Subtitle,
}

impl AliasField {
    pub const ALL: [AliasField; 4] = [
        AliasField::Author,
        AliasField::Language,
        AliasField::Title,
        AliasField::Subtitle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AliasField::Author => "author",
            AliasField::Language => "language",
            AliasField::Title => "title",
            AliasField::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for AliasField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AliasField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AliasField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown alias field: '{}'", s))
    }
}

/// One stored alias row, unique on `(source_id, field, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAlias {
    pub source_id: SourceId,
    pub field: AliasField,
    pub value: String,
    pub canonical: String,
}

/// Raw → canonical lookup for one source.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    fields: HashMap<AliasField, HashMap<String, String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_aliases<'a, I>(aliases: I) -> Self
    where
        I: IntoIterator<Item = &'a NameAlias>,
    {
        let mut table = Self::new();
        for alias in aliases {
            table.insert(alias.field, &alias.value, &alias.canonical);
        }
        table
    }

    pub fn insert(&mut self, field: AliasField, value: &str, canonical: &str) {
        self.fields
            .entry(field)
            .or_default()
            .insert(value.to_string(), canonical.to_string());
    }

    /// Canonical value for `value`, or `value` itself when no alias exists.
    pub fn resolve<'a>(&'a self, field: AliasField, value: &'a str) -> &'a str {
        self.fields
            .get(&field)
            .and_then(|m| m.get(value))
            .map(String::as_str)
            .unwrap_or(value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(HashMap::is_empty)
    }
}

/// Language codes are keyed on at most their first three characters.
pub fn language_key(code: &str) -> String {
    code.trim().chars().take(3).collect()
}
