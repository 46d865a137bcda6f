// src/lib.rs
// Public library surface for the runner and integration tests.

pub mod normalize;
pub mod patterns;
pub mod rules;
pub mod taxonomy;

// Detection: category detectors, subcategory tables, legacy buckets
pub mod detect;

pub mod decision;
pub mod resolve;

// Report path
pub mod aggregate;
pub mod report;
pub mod sample;

// Apply path
pub mod migrate;
pub mod store;

pub mod config;
pub mod engine;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::RunConfig;
pub use crate::decision::{ClassificationDecision, DecisionKind, Thresholds};
pub use crate::engine::{Engine, RunOutcome};
pub use crate::resolve::Resolver;
pub use crate::rules::RuleBook;
pub use crate::store::{CatalogItem, CatalogStore, InMemoryStore, StoreError};
pub use crate::taxonomy::Taxonomy;

use tracing::info;

/// Load taxonomy (fatal if unavailable) and rule book from their configured
/// locations and build an engine for `config`.
pub fn engine_from_env(config: RunConfig) -> anyhow::Result<Engine> {
    let taxonomy = Taxonomy::from_toml()?;
    let book = RuleBook::load()?;
    info!(
        target: "reconcile",
        taxonomy = %taxonomy.version,
        categories = taxonomy.categories.len(),
        rules = %book.version,
        detectors = book.detectors.len(),
        "configuration loaded"
    );
    Engine::new(taxonomy, &book, config)
}
