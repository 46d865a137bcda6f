//! Taxonomy reconcile runner.
//! Loads `.env`, the taxonomy and the rule book, reads catalog items from a
//! JSON file and runs one reconcile pass (dry run unless `RECONCILE_APPLY=1`).
//! Reports are printed to stdout.

use anyhow::Context;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taxonomy_reconciler::migrate::ApplyStatus;
use taxonomy_reconciler::report::ConsoleSink;
use taxonomy_reconciler::{engine_from_env, InMemoryStore, RunConfig};

const ENV_ITEMS_PATH: &str = "RECONCILE_ITEMS_PATH";
const DEFAULT_ITEMS_PATH: &str = "data/items.json";

/// Compact logs by default; JSON lines when `RECONCILE_LOG_JSON=1`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reconcile=info,migrate=info,rules=warn,warn"));
    let json = std::env::var("RECONCILE_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env in local runs; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = RunConfig::from_env();
    let engine = engine_from_env(config)?;

    let items_path = std::env::var(ENV_ITEMS_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ITEMS_PATH));
    let store = InMemoryStore::from_json_path(&items_path)
        .with_context(|| format!("set {ENV_ITEMS_PATH} to a JSON array of catalog items"))?;

    let outcome = engine.run(&store, &ConsoleSink).await?;

    if let Some(summary) = &outcome.apply {
        if summary.status() == ApplyStatus::PartialFailure {
            anyhow::bail!("{} of {} writes failed", summary.failed, summary.failed + summary.applied);
        }
    }
    Ok(())
}
