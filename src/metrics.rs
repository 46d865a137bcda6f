// src/metrics.rs
//! Counter names and one-time descriptions.
//!
//! No recorder is installed by the crate; without one the counters are no-ops.
//! An embedding process can install any `metrics` recorder before a run.

use metrics::describe_counter;
use once_cell::sync::OnceCell;

pub const ITEMS_TOTAL: &str = "reconcile_items_total";
pub const DECISIONS_TOTAL: &str = "reconcile_decisions_total";
pub const APPLIED_TOTAL: &str = "migrate_applied_total";
pub const FAILED_TOTAL: &str = "migrate_failed_total";
pub const BATCHES_TOTAL: &str = "migrate_batches_total";

/// One-time metrics registration (so series show up with help text).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(ITEMS_TOTAL, "Catalog items resolved.");
        describe_counter!(
            DECISIONS_TOTAL,
            "Resolved decisions, labelled by decision kind."
        );
        describe_counter!(APPLIED_TOTAL, "Classification updates written.");
        describe_counter!(
            FAILED_TOTAL,
            "Classification updates that failed per item."
        );
        describe_counter!(BATCHES_TOTAL, "Apply batches processed.");
    });
}
