//! Source cadence registry.
//!
//! Operators describe how often each source is expected to deliver with one
//! TOML file per source. The expected interval seeds checkpoints and gap
//! thresholds; an org-specific entry overrides the global one of the same name.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct SourceFile {
    source: SourceMeta,
}

/// Expected cadence for one source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceMeta {
    pub name: String,
    pub expected_interval_ms: u64,
    /// Restrict the entry to one org. Global when absent.
    #[serde(default)]
    pub org_id: Option<String>,
}

/// Registry of source cadences, indexed by `(org, name)`.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    sources: HashMap<(Option<String>, String), SourceMeta>,
}

impl SourceRegistry {
    /// Create an empty registry. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::empty();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read sources dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let file: SourceFile = toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("bad source config {}: {e}", path.display()))
                })?;
                registry.insert(file.source);
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, meta: SourceMeta) {
        self.sources
            .insert((meta.org_id.clone(), meta.name.clone()), meta);
    }

    /// Expected interval for a source, preferring the org-specific entry.
    pub fn expected_interval(&self, org_id: &str, source: &str) -> Option<u64> {
        self.sources
            .get(&(Some(org_id.to_string()), source.to_string()))
            .or_else(|| self.sources.get(&(None, source.to_string())))
            .map(|meta| meta.expected_interval_ms)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
