// src/taxonomy.rs
//! Canonical taxonomy snapshot (read-only for the duration of a run).
//!
//! Loaded from TOML; the path comes from `TAXONOMY_CONFIG_PATH` or defaults to
//! `config/taxonomy.toml`. A missing, unparsable or empty taxonomy is fatal:
//! nothing can be reconciled against it.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TAXONOMY_CONFIG_PATH: &str = "config/taxonomy.toml";
pub const ENV_TAXONOMY_CONFIG_PATH: &str = "TAXONOMY_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryNode {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub subcategories: BTreeSet<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub version: String,
    pub categories: BTreeMap<String, CategoryNode>,
}

impl Taxonomy {
    /// Resolve the config path from env (or default) and load it.
    pub fn from_toml() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_TAXONOMY_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TAXONOMY_CONFIG_PATH));
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("taxonomy config unavailable at {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid taxonomy config at {}", path.display()))
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let tax: Taxonomy = toml::from_str(toml_str)?;
        tax.validate()?;
        Ok(tax)
    }

    /// Structural checks: at least one category, keys already in canonical form.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.categories.is_empty() {
            return Err(anyhow!("taxonomy has no categories"));
        }
        for (cat, node) in &self.categories {
            if cat.trim().is_empty() || cat != &cat.trim().to_ascii_lowercase() {
                return Err(anyhow!("category key `{cat}` is not canonical (lowercase, trimmed)"));
            }
            for sub in &node.subcategories {
                if sub.trim().is_empty() {
                    return Err(anyhow!("category `{cat}` lists an empty subcategory"));
                }
            }
        }
        Ok(())
    }

    pub fn is_canonical(&self, category: Option<&str>) -> bool {
        category.is_some_and(|c| self.categories.contains_key(c.trim()))
    }

    pub fn allows(&self, category: &str, subcategory: &str) -> bool {
        self.categories
            .get(category)
            .is_some_and(|n| n.subcategories.contains(subcategory))
    }

    pub fn allowed(&self, category: &str) -> Option<&BTreeSet<String>> {
        self.categories.get(category).map(|n| &n.subcategories)
    }

    pub fn category_keys(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn label(&self, category: &str) -> Option<&str> {
        self.categories.get(category).map(|n| n.label.as_str())
    }
}
