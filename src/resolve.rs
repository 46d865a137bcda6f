// src/resolve.rs
//! `resolve(item) -> ClassificationDecision`: the single function behind both
//! the dry-run report and the apply path.
//!
//! Pipeline: item text → category resolver → (legacy fallback) → decision
//! policy → membership invariant. A panic anywhere inside is contained and
//! the item is kept with an `internal_error:` reason.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::decision::{decide, ClassificationDecision, DecisionKind, PolicyInput, Thresholds};
use crate::detect::{CategoryResolver, LegacyFallback, SubcategoryResolver};
use crate::normalize::item_text;
use crate::rules::RuleBook;
use crate::store::CatalogItem;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone)]
pub struct Resolver {
    taxonomy: Taxonomy,
    categories: CategoryResolver,
    subcategories: SubcategoryResolver,
    legacy: LegacyFallback,
    thresholds: Thresholds,
    rule_version: String,
}

impl Resolver {
    /// Validates `book` against `taxonomy`; any problem is fatal.
    pub fn new(taxonomy: Taxonomy, book: &RuleBook, thresholds: Thresholds) -> anyhow::Result<Self> {
        book.validate(&taxonomy)?;
        Ok(Self {
            categories: CategoryResolver::from_rules(book)?,
            subcategories: SubcategoryResolver::from_rules(book)?,
            legacy: LegacyFallback::from_rules(book),
            rule_version: book.version.clone(),
            taxonomy,
            thresholds,
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Rule book version; stamped into every audit patch.
    pub fn rule_version(&self) -> &str {
        &self.rule_version
    }

    pub fn categories(&self) -> &CategoryResolver {
        &self.categories
    }

    pub fn resolve(&self, item: &CatalogItem) -> ClassificationDecision {
        match catch_unwind(AssertUnwindSafe(|| self.resolve_inner(item))) {
            Ok(d) => d,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(target: "reconcile", item_id = %item.id, error = %msg, "resolution failed; keeping item");
                keep_on_error(item, &msg)
            }
        }
    }

    fn resolve_inner(&self, item: &CatalogItem) -> ClassificationDecision {
        let text = item_text(&item.title, item.description.as_deref());
        let category = item.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let subcategory = item.subcategory.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let canonical = self.taxonomy.is_canonical(category);

        let suggestion = self.categories.evaluate(&text).or_else(|| {
            if canonical {
                None
            } else {
                self.legacy
                    .evaluate(category, subcategory, &text, &self.categories)
            }
        });

        let subcategory_allowed = match (category, subcategory) {
            (Some(c), Some(s)) => self.taxonomy.allows(c, s),
            _ => true,
        };

        let input = PolicyInput {
            category,
            subcategory,
            category_is_canonical: canonical,
            subcategory_allowed,
            suggestion: suggestion.as_ref(),
        };
        let outcome = decide(&input, &self.thresholds, |cat| self.subcategories.resolve(cat, &text));
        let decision = ClassificationDecision::from_outcome(
            item.id.clone(),
            item.category.clone(),
            item.subcategory.clone(),
            outcome,
        );
        let decision = self.enforce(decision);
        debug!(target: "reconcile", item_id = %decision.item_id, kind = %decision.kind, "resolved");
        decision
    }

    /// Membership invariant for every non-keep decision: the target category is
    /// canonical and the target subcategory (if any) is allowed under it.
    pub fn enforce(&self, mut d: ClassificationDecision) -> ClassificationDecision {
        if d.kind == DecisionKind::Keep {
            return d;
        }

        let Some(to_cat) = d.to_category.clone().filter(|c| self.taxonomy.is_canonical(Some(c))) else {
            let target = d.to_category.clone().unwrap_or_default();
            return revert_to_keep(d, format!("non_canonical_target:{target}"));
        };

        if let Some(sub) = d.to_subcategory.clone() {
            if !self.taxonomy.allows(&to_cat, &sub) {
                let reason = format!("subcategory_dropped:{sub}");
                match d.kind {
                    // The subcategory was the whole change.
                    DecisionKind::FillSubcategory | DecisionKind::MoveSubcategory => {
                        return revert_to_keep(d, reason);
                    }
                    _ => {
                        d.to_subcategory = None;
                        d.reasons.push(reason);
                    }
                }
            }
        }

        if d.reasons.is_empty() {
            d.reasons.push(format!("decision:{}", d.kind));
        }
        d
    }
}

fn revert_to_keep(mut d: ClassificationDecision, reason: String) -> ClassificationDecision {
    d.kind = DecisionKind::Keep;
    d.to_category = d.from_category.clone();
    d.to_subcategory = d.from_subcategory.clone();
    d.new_bucket = None;
    d.reasons.push(reason);
    d
}

fn keep_on_error(item: &CatalogItem, msg: &str) -> ClassificationDecision {
    ClassificationDecision {
        item_id: item.id.clone(),
        from_category: item.category.clone(),
        from_subcategory: item.subcategory.clone(),
        to_category: item.category.clone(),
        to_subcategory: item.subcategory.clone(),
        confidence: 0.0,
        kind: DecisionKind::Keep,
        reasons: vec![format!("internal_error:{msg}")],
        new_bucket: None,
    }
}
