// src/migrate.rs
//! Migration executor (apply path).
//!
//! Writes decisions in fixed-size batches, items within a batch sequentially.
//! Every write carries an `AuditPatch` under one metadata key. A failing item
//! is recorded and skipped; it never aborts its batch or later batches, and
//! earlier writes are never rolled back.

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::decision::{ClassificationDecision, DecisionKind};
use crate::metrics::{ensure_metrics_described, APPLIED_TOTAL, BATCHES_TOTAL, FAILED_TOTAL};
use crate::report::{Narrative, Table};
use crate::store::{CatalogStore, ClassificationUpdate};
use crate::taxonomy::Taxonomy;

/// Metadata key that holds the latest audit patch (overwritten, not appended).
pub const METADATA_KEY: &str = "taxonomy_reconcile";
pub const DEFAULT_BATCH_SIZE: usize = 300;
pub const MIN_BATCH_SIZE: usize = 50;
pub const MAX_FAILURE_SAMPLES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRef {
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPatch {
    pub rule_version: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub from: ClassRef,
    pub to: ClassRef,
    pub confidence: f32,
    pub kind: DecisionKind,
    pub reasons: Vec<String>,
}

impl AuditPatch {
    pub fn new(
        d: &ClassificationDecision,
        to: ClassRef,
        rule_version: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            rule_version: rule_version.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            from: ClassRef {
                category: d.from_category.clone(),
                subcategory: d.from_subcategory.clone(),
            },
            to,
            confidence: d.confidence,
            kind: d.kind,
            reasons: d.reasons.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSample {
    pub item_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Ok,
    PartialFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplySummary {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batches: usize,
    /// First failures only (`MAX_FAILURE_SAMPLES`).
    pub failures: Vec<FailureSample>,
    /// Tallies over successfully written decisions.
    pub transitions: Aggregator,
}

impl ApplySummary {
    pub fn status(&self) -> ApplyStatus {
        if self.failed == 0 {
            ApplyStatus::Ok
        } else {
            ApplyStatus::PartialFailure
        }
    }

    /// Count a per-item failure; only the first `MAX_FAILURE_SAMPLES` are kept.
    pub fn record_failure(&mut self, item_id: &str, error: String) {
        warn!(target: "migrate", item_id = %item_id, error = %error, "write failed");
        self.failed += 1;
        if self.failures.len() < MAX_FAILURE_SAMPLES {
            self.failures.push(FailureSample {
                item_id: item_id.to_string(),
                error,
            });
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status(),
            "applied": self.applied,
            "failed": self.failed,
            "skipped": self.skipped,
            "batches": self.batches,
            "failures": self.failures,
            "transitions": self.transitions.summary(MAX_FAILURE_SAMPLES),
        })
    }

    pub fn narrative(&self) -> Narrative {
        let status = match self.status() {
            ApplyStatus::Ok => "All writes succeeded.",
            ApplyStatus::PartialFailure => "Some writes failed; applied items were kept.",
        };
        let mut n = Narrative::new("Taxonomy reconcile: apply")
            .paragraph(status)
            .bullets([
                format!("applied: {}", self.applied),
                format!("failed: {}", self.failed),
                format!("skipped: {}", self.skipped),
                format!("batches: {}", self.batches),
            ]);

        for (title, tally) in [
            ("Category transitions", &self.transitions.category_moves),
            ("Subcategory transitions", &self.transitions.subcategory_moves),
        ] {
            if tally.is_empty() {
                continue;
            }
            let mut t = Table::new(&["transition", "count"]);
            for (k, v) in tally.top(MAX_FAILURE_SAMPLES) {
                t.push_row(vec![k, v.to_string()]);
            }
            n = n.heading(2, title).table(t);
        }

        if !self.failures.is_empty() {
            let mut t = Table::new(&["item_id", "error"]);
            for f in &self.failures {
                t.push_row(vec![f.item_id.clone(), f.error.clone()]);
            }
            n = n.heading(2, "Failures").table(t);
        }
        n
    }
}

/// What the executor would write for one decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Write { to: ClassRef },
    Skip(String),
}

#[derive(Debug, Clone)]
pub struct MigrationExecutor<'a> {
    taxonomy: &'a Taxonomy,
    rule_version: String,
    batch_size: usize,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(taxonomy: &'a Taxonomy, rule_version: impl Into<String>, batch_size: usize) -> Self {
        Self {
            taxonomy,
            rule_version: rule_version.into(),
            batch_size: batch_size.max(MIN_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Re-validates membership right before a write.
    pub fn plan(&self, d: &ClassificationDecision) -> Plan {
        if !d.kind.writes() {
            return Plan::Skip(format!("kind:{}", d.kind));
        }
        let Some(cat) = d
            .to_category
            .as_deref()
            .filter(|c| self.taxonomy.is_canonical(Some(c)))
        else {
            return Plan::Skip("non_canonical_target".to_string());
        };

        // Flagged values are cleared, never rewritten as invalid.
        if d.kind == DecisionKind::InvalidSubcategory {
            return Plan::Write {
                to: ClassRef {
                    category: Some(cat.to_string()),
                    subcategory: None,
                },
            };
        }

        let sub = match d.to_subcategory.as_deref() {
            Some(s) if self.taxonomy.allows(cat, s) => Some(s.to_string()),
            Some(s) => {
                warn!(target: "migrate", item_id = %d.item_id, category = %cat, subcategory = %s, "subcategory not allowed at write time; dropping");
                if matches!(d.kind, DecisionKind::FillSubcategory | DecisionKind::MoveSubcategory) {
                    return Plan::Skip(format!("subcategory_not_allowed:{s}"));
                }
                None
            }
            None => None,
        };
        Plan::Write {
            to: ClassRef {
                category: Some(cat.to_string()),
                subcategory: sub,
            },
        }
    }

    pub async fn apply<S>(&self, store: &S, decisions: &[ClassificationDecision]) -> ApplySummary
    where
        S: CatalogStore + ?Sized,
    {
        ensure_metrics_described();
        let mut summary = ApplySummary::default();

        let mut planned = Vec::new();
        for d in decisions {
            match self.plan(d) {
                Plan::Write { to } => planned.push((d, to)),
                Plan::Skip(why) => {
                    debug!(target: "migrate", item_id = %d.item_id, reason = %why, "skipped");
                    summary.skipped += 1;
                }
            }
        }

        let total_batches = planned.len().div_ceil(self.batch_size);
        for (i, batch) in planned.chunks(self.batch_size).enumerate() {
            let mut batch_failed = 0usize;
            for (d, to) in batch {
                let patch = AuditPatch::new(d, to.clone(), &self.rule_version, Utc::now());
                // Never write a classification without its audit record.
                let patch = match serde_json::to_value(&patch) {
                    Ok(v) => v,
                    Err(e) => {
                        batch_failed += 1;
                        summary.record_failure(&d.item_id, format!("audit patch encoding: {e}"));
                        continue;
                    }
                };
                let update = ClassificationUpdate {
                    item_id: d.item_id.clone(),
                    category: to.category.clone().unwrap_or_default(),
                    subcategory: to.subcategory.clone(),
                    metadata_key: METADATA_KEY.to_string(),
                    patch,
                };

                match store.apply_update(&update).await {
                    Ok(()) => {
                        summary.applied += 1;
                        let mut written = (*d).clone();
                        written.to_subcategory = to.subcategory.clone();
                        summary.transitions.record(&written);
                    }
                    Err(e) => {
                        batch_failed += 1;
                        summary.record_failure(&d.item_id, e.to_string());
                    }
                }
            }
            summary.batches += 1;
            counter!(BATCHES_TOTAL).increment(1);
            info!(
                target: "migrate",
                batch = i + 1,
                of = total_batches,
                size = batch.len(),
                failed = batch_failed,
                store = store.name(),
                "batch applied"
            );
        }

        counter!(APPLIED_TOTAL).increment(summary.applied as u64);
        counter!(FAILED_TOTAL).increment(summary.failed as u64);
        summary
    }
}
