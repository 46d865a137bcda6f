// src/store.rs
//! Catalog store boundary: bulk candidate read + per-item classification write.
//!
//! The storage engine itself lives elsewhere; this module only fixes the
//! contract and ships `InMemoryStore`, used by tests and the local runner.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub brand: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub enriched: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            brand: String::new(),
            title: title.into(),
            description: None,
            source_url: String::new(),
            category: None,
            subcategory: None,
            enriched: false,
            updated_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_category(mut self, category: Option<&str>, subcategory: Option<&str>) -> Self {
        self.category = category.map(str::to_string);
        self.subcategory = subcategory.map(str::to_string);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn enriched(mut self, enriched: bool) -> Self {
        self.enriched = enriched;
        self
    }
}

/// Restrict a run to one category (optionally one subcategory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

impl Scope {
    pub fn contains(&self, item: &CatalogItem) -> bool {
        let cat_ok = item.category.as_deref().map(str::trim) == Some(self.category.as_str());
        let sub_ok = match &self.subcategory {
            Some(s) => item.subcategory.as_deref().map(str::trim) == Some(s.as_str()),
            None => true,
        };
        cat_ok && sub_ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    /// Canonical category keys of the taxonomy snapshot.
    pub canonical: BTreeSet<String>,
    pub scope: Option<Scope>,
    pub enriched_only: bool,
    pub include_null_category: bool,
    pub limit: Option<usize>,
}

impl CandidateQuery {
    /// Without a scope: non-canonical categories (plus null ones when asked).
    /// With a scope: everything inside it.
    pub fn matches(&self, item: &CatalogItem) -> bool {
        if self.enriched_only && !item.enriched {
            return false;
        }
        if let Some(scope) = &self.scope {
            return scope.contains(item);
        }
        match item.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            None => self.include_null_category,
            Some(c) => !self.canonical.contains(c),
        }
    }
}

/// One atomic write: category, subcategory and a single metadata key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationUpdate {
    pub item_id: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub metadata_key: String,
    pub patch: Value,
}

/// Recoverable per-item write failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("item `{0}` not found")]
    NotFound(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Candidates ordered by id.
    async fn fetch_candidates(&self, query: &CandidateQuery) -> anyhow::Result<Vec<CatalogItem>>;
    async fn apply_update(&self, update: &ClassificationUpdate) -> Result<(), StoreError>;
    fn name(&self) -> &'static str;
}

/// Reference store backed by a map. Supports per-item failure injection.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: Mutex<BTreeMap<String, CatalogItem>>,
    failures: Mutex<BTreeMap<String, StoreError>>,
    writes: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryStore {
    pub fn new(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let map = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        Self {
            items: Mutex::new(map),
            ..Default::default()
        }
    }

    /// Load a JSON array of items (local runs).
    pub fn from_json_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog items from {}", path.display()))?;
        let items: Vec<CatalogItem> = serde_json::from_str(&content)
            .with_context(|| format!("parsing catalog items {}", path.display()))?;
        Ok(Self::new(items))
    }

    /// Every later write to `id` fails with `err`.
    pub fn fail_on(&self, id: impl Into<String>, err: StoreError) {
        lock(&self.failures).insert(id.into(), err);
    }

    pub fn get(&self, id: &str) -> Option<CatalogItem> {
        lock(&self.items).get(id).cloned()
    }

    pub fn items(&self) -> Vec<CatalogItem> {
        lock(&self.items).values().cloned().collect()
    }

    /// Ids of every attempted write, in order (failed attempts included).
    pub fn write_log(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryStore {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> anyhow::Result<Vec<CatalogItem>> {
        // BTreeMap iteration is already ordered by id.
        let mut out: Vec<CatalogItem> = lock(&self.items)
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        if let Some(n) = query.limit {
            out.truncate(n);
        }
        Ok(out)
    }

    async fn apply_update(&self, update: &ClassificationUpdate) -> Result<(), StoreError> {
        lock(&self.writes).push(update.item_id.clone());
        if let Some(err) = lock(&self.failures).get(&update.item_id) {
            return Err(err.clone());
        }
        if update.category.trim().is_empty() {
            return Err(StoreError::ConstraintViolation("category must not be empty".into()));
        }

        let mut items = lock(&self.items);
        let item = items
            .get_mut(&update.item_id)
            .ok_or_else(|| StoreError::NotFound(update.item_id.clone()))?;
        item.category = Some(update.category.clone());
        item.subcategory = update.subcategory.clone();
        item.metadata
            .insert(update.metadata_key.clone(), update.patch.clone());
        item.updated_at = Utc::now();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
