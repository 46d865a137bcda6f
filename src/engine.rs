//! # Reconcile Engine
//! Orchestrates one run: fetch candidates once, resolve every item, aggregate,
//! sample, report, and (only when asked) apply.
//!
//! The report path and the apply path consume the very same decisions, so a
//! dry run shows exactly what an apply would write.

use anyhow::Context;
use metrics::counter;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::aggregate::{Aggregator, Tally};
use crate::config::RunConfig;
use crate::decision::ClassificationDecision;
use crate::metrics::{ensure_metrics_described, DECISIONS_TOTAL, ITEMS_TOTAL};
use crate::migrate::{ApplySummary, MigrationExecutor};
use crate::report::{decision_table, Narrative, ReportSink, Table};
use crate::resolve::Resolver;
use crate::rules::RuleBook;
use crate::sample::{sample_groups, SampleGroup};
use crate::store::{CandidateQuery, CatalogItem, CatalogStore};
use crate::taxonomy::Taxonomy;

pub const REPORT_SAMPLE: &str = "decisions_sample";
pub const REPORT_SUMMARY: &str = "summary";
pub const REPORT_NARRATIVE: &str = "report";
pub const APPLY_SUMMARY: &str = "apply_summary";
pub const APPLY_NARRATIVE: &str = "apply_report";

/// Rows per tally in presentation output.
const TOP_N: usize = 20;

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub candidates: usize,
    pub decisions: Vec<ClassificationDecision>,
    pub aggregate: Aggregator,
    /// `None` on a dry run.
    pub apply: Option<ApplySummary>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    resolver: Resolver,
    config: RunConfig,
}

impl Engine {
    /// Fails when the rule book does not fit the taxonomy.
    pub fn new(taxonomy: Taxonomy, book: &RuleBook, config: RunConfig) -> anyhow::Result<Self> {
        let resolver = Resolver::new(taxonomy, book, config.thresholds)
            .context("rule book validation failed")?;
        if let Some(scope) = &config.scope {
            if !resolver.taxonomy().is_canonical(Some(&scope.category)) {
                warn!(target: "reconcile", scope = %scope.category, "scope category is not canonical");
            }
        }
        Ok(Self { resolver, config })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn query(&self) -> CandidateQuery {
        CandidateQuery {
            canonical: self.resolver.taxonomy().categories.keys().cloned().collect::<BTreeSet<_>>(),
            scope: self.config.scope.clone(),
            enriched_only: self.config.enriched_only,
            include_null_category: self.config.include_null_category,
            limit: self.config.max_rows,
        }
    }

    /// Resolve a batch of items in order.
    pub fn resolve_all(&self, items: &[CatalogItem]) -> Vec<ClassificationDecision> {
        ensure_metrics_described();
        items
            .iter()
            .map(|item| {
                let d = self.resolver.resolve(item);
                counter!(ITEMS_TOTAL).increment(1);
                counter!(DECISIONS_TOTAL, "kind" => d.kind.as_str()).increment(1);
                d
            })
            .collect()
    }

    pub async fn run<S, R>(&self, store: &S, sink: &R) -> anyhow::Result<RunOutcome>
    where
        S: CatalogStore + ?Sized,
        R: ReportSink + ?Sized,
    {
        let mode = if self.config.apply { "apply" } else { "dry_run" };
        info!(
            target: "reconcile",
            mode,
            seed = %self.config.seed,
            rules = %self.resolver.rule_version(),
            taxonomy = %self.resolver.taxonomy().version,
            store = store.name(),
            "run started"
        );

        // 1) one bulk read
        let query = self.query();
        let mut items = store
            .fetch_candidates(&query)
            .await
            .with_context(|| format!("fetching candidates from {}", store.name()))?;

        // 2) scope filter (stores may ignore it) + deterministic order
        if let Some(scope) = &query.scope {
            items.retain(|i| scope.contains(i));
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));

        // 3) one resolve() for both paths
        let decisions = self.resolve_all(&items);
        let aggregate = Aggregator::from_decisions(&decisions);
        let groups = sample_groups(&decisions, &self.config.seed, self.config.sample_size);

        // 4) reports, always (even with zero changes)
        let sampled: Vec<&ClassificationDecision> = groups.iter().flat_map(|g| g.rows.iter().copied()).collect();
        sink.table(REPORT_SAMPLE, &decision_table(sampled.iter().copied()))
            .await
            .context("emitting sample table")?;
        sink.json(REPORT_SUMMARY, &self.summary_json(mode, items.len(), &aggregate, &groups))
            .await
            .context("emitting summary")?;
        sink.narrative(REPORT_NARRATIVE, &self.narrative(mode, items.len(), &aggregate, &groups))
            .await
            .context("emitting narrative")?;

        info!(
            target: "reconcile",
            candidates = items.len(),
            changes = aggregate.changes(),
            sampled = sampled.len(),
            "resolution finished"
        );

        // 5) writes, only on request
        let apply = if self.config.apply {
            let executor = MigrationExecutor::new(
                self.resolver.taxonomy(),
                self.resolver.rule_version(),
                self.config.batch_size,
            );
            let summary = executor.apply(store, &decisions).await;
            sink.json(APPLY_SUMMARY, &summary.to_json())
                .await
                .context("emitting apply summary")?;
            sink.narrative(APPLY_NARRATIVE, &summary.narrative())
                .await
                .context("emitting apply narrative")?;
            info!(
                target: "reconcile",
                applied = summary.applied,
                failed = summary.failed,
                skipped = summary.skipped,
                "apply finished"
            );
            Some(summary)
        } else {
            None
        };

        Ok(RunOutcome {
            candidates: items.len(),
            decisions,
            aggregate,
            apply,
        })
    }

    fn summary_json(&self, mode: &str, candidates: usize, agg: &Aggregator, groups: &[SampleGroup<'_>]) -> Value {
        let t = &self.config.thresholds;
        json!({
            "mode": mode,
            "seed": self.config.seed,
            "rule_version": self.resolver.rule_version(),
            "taxonomy_version": self.resolver.taxonomy().version,
            "thresholds": {
                "move_category": t.move_category,
                "move_subcategory": t.move_subcategory,
                "fill_subcategory": t.fill_subcategory,
            },
            "scope": self.config.scope.as_ref().map(|s| json!({
                "category": s.category,
                "subcategory": s.subcategory,
            })),
            "candidates": candidates,
            "sample_size": self.config.sample_size,
            "sample_groups": groups.len(),
            "tallies": agg.summary(TOP_N),
        })
    }

    fn narrative(&self, mode: &str, candidates: usize, agg: &Aggregator, groups: &[SampleGroup<'_>]) -> Narrative {
        let mut n = Narrative::new(format!("Taxonomy reconcile: {mode}")).paragraph(format!(
            "{candidates} candidates, {} would change. Rules {}, taxonomy {}, seed `{}`.",
            agg.changes(),
            self.resolver.rule_version(),
            self.resolver.taxonomy().version,
            self.config.seed,
        ));
        if candidates == 0 {
            n = n.paragraph("No candidates matched the query; nothing to reconcile.");
        }

        for (title, tally) in [
            ("Decisions by kind", &agg.by_kind),
            ("Category transitions", &agg.category_moves),
            ("Subcategory transitions", &agg.subcategory_moves),
            ("New bucket candidates", &agg.new_buckets),
            ("Invalid combinations", &agg.invalid_combos),
        ] {
            if !tally.is_empty() {
                n = n.heading(2, title).table(tally_table(tally));
            }
        }

        for (bucket, origins) in &agg.new_bucket_origins {
            n = n
                .heading(3, format!("Origins of {bucket}"))
                .table(tally_table(origins));
        }

        if !groups.is_empty() {
            let mut t = Table::new(&["category", "subcategory", "population", "sampled"]);
            for g in groups {
                t.push_row(vec![
                    g.category.clone().unwrap_or_else(|| "(none)".into()),
                    g.subcategory.clone().unwrap_or_else(|| "(none)".into()),
                    g.population.to_string(),
                    g.rows.len().to_string(),
                ]);
            }
            n = n.heading(2, "QA sample").table(t);
        }
        n
    }
}

fn tally_table(t: &Tally) -> Table {
    let mut table = Table::new(&["key", "count"]);
    for (k, v) in t.top(TOP_N) {
        table.push_row(vec![k, v.to_string()]);
    }
    table
}
