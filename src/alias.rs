// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024 John C. Murray

//! Alias-file lookup: YAML `zelloAliases: [{rid, alias}, ...]` to numeric
//! radio ID, case- and whitespace-insensitive.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Deserialize)]
struct AliasFile {
    #[serde(rename = "zelloAliases", default)]
    zello_aliases: Vec<AliasEntry>,
}

#[derive(Debug, Deserialize)]
struct AliasEntry {
    rid: u32,
    alias: String,
}

/// Normalized alias -> RID table. Lookups are case- and space-insensitive;
/// an unknown or empty name resolves to `0`. No collision policy — the
/// last entry for a normalized alias wins.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    table: HashMap<String, u32>,
}

impl AliasMap {
    /// An empty table, useful when no alias file is configured.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a YAML alias file from disk.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::Io`] if the file can't be read or
    /// [`GatewayError::Yaml`] if it doesn't parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse a YAML alias document directly (used by tests and by
    /// [`Self::load`]).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Yaml`] if `yaml` doesn't parse.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: AliasFile = serde_yaml::from_str(yaml)?;
        let mut table = HashMap::with_capacity(parsed.zello_aliases.len());
        for entry in parsed.zello_aliases {
            table.insert(normalize(&entry.alias), entry.rid);
        }
        Ok(Self { table })
    }

    /// Look up a RID by alias. Returns `0` if `name` is empty or unknown.
    #[must_use]
    pub fn lookup(&self, name: &str) -> u32 {
        if name.trim().is_empty() {
            return 0;
        }
        self.table.get(&normalize(name)).copied().unwrap_or(0)
    }

    /// Number of aliases loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table has any entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
