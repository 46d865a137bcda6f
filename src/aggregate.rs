// src/aggregate.rs
//! Explicit tally accumulator for the report path.
//!
//! An `Aggregator` is a plain value: fill it with `record`, combine partial
//! results with `merge`. Keys use ASCII arrows for stable console output.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::decision::{ClassificationDecision, DecisionKind};

const NONE: &str = "(none)";

/// key → count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    pub fn add(&mut self, key: impl Into<String>) {
        *self.0.entry(key.into()).or_insert(0) += 1;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: &Tally) {
        for (k, v) in &other.0 {
            *self.0.entry(k.clone()).or_insert(0) += v;
        }
    }

    /// Count descending, key ascending on ties, first `n`.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut rows: Vec<(String, u64)> = self.0.iter().map(|(k, v)| (k.clone(), *v)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows.truncate(n);
        rows
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregator {
    pub items: u64,
    pub by_kind: Tally,
    /// `from -> to` category.
    pub category_moves: Tally,
    /// `category: from_sub -> to_sub`.
    pub subcategory_moves: Tally,
    /// `kind:key` of buckets missing from the tree.
    pub new_buckets: Tally,
    /// new bucket → originating category tally.
    pub new_bucket_origins: BTreeMap<String, Tally>,
    /// `category:subcategory` combos not allowed by the tree.
    pub invalid_combos: Tally,
}

fn or_none(v: Option<&str>) -> &str {
    v.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(NONE)
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_decisions<'a>(decisions: impl IntoIterator<Item = &'a ClassificationDecision>) -> Self {
        let mut agg = Self::new();
        for d in decisions {
            agg.record(d);
        }
        agg
    }

    pub fn record(&mut self, d: &ClassificationDecision) {
        self.items += 1;
        self.by_kind.add(d.kind.as_str());

        let from_cat = or_none(d.from_category.as_deref());
        let from_sub = or_none(d.from_subcategory.as_deref());
        let to_sub = or_none(d.to_subcategory.as_deref());

        match d.kind {
            DecisionKind::RemapCategory | DecisionKind::MoveCategory => {
                let to_cat = or_none(d.to_category.as_deref());
                self.category_moves.add(format!("{from_cat} -> {to_cat}"));
            }
            DecisionKind::FillSubcategory | DecisionKind::MoveSubcategory => {
                self.subcategory_moves
                    .add(format!("{from_cat}: {from_sub} -> {to_sub}"));
            }
            DecisionKind::InvalidSubcategory => {
                self.invalid_combos.add(format!("{from_cat}:{from_sub}"));
            }
            DecisionKind::Keep | DecisionKind::NewSubcategoryCandidate => {}
        }

        if let Some(nb) = &d.new_bucket {
            let key = format!("{}:{}", nb.kind.as_str(), nb.key);
            self.new_buckets.add(key.clone());
            self.new_bucket_origins.entry(key).or_default().add(from_cat);
        }
    }

    pub fn merge(&mut self, other: &Aggregator) {
        self.items += other.items;
        self.by_kind.merge(&other.by_kind);
        self.category_moves.merge(&other.category_moves);
        self.subcategory_moves.merge(&other.subcategory_moves);
        self.new_buckets.merge(&other.new_buckets);
        for (k, t) in &other.new_bucket_origins {
            self.new_bucket_origins.entry(k.clone()).or_default().merge(t);
        }
        self.invalid_combos.merge(&other.invalid_combos);
    }

    /// Items the apply path would write.
    pub fn changes(&self) -> u64 {
        DecisionKind::ALL
            .iter()
            .filter(|k| k.writes())
            .map(|k| self.by_kind.get(k.as_str()))
            .sum()
    }

    /// Presentation summary with every tally truncated to `top_n`.
    pub fn summary(&self, top_n: usize) -> Value {
        let rows = |t: &Tally| -> Value {
            t.top(top_n)
                .into_iter()
                .map(|(k, v)| json!({ "key": k, "count": v }))
                .collect()
        };
        let origins: serde_json::Map<String, Value> = self
            .new_buckets
            .top(top_n)
            .into_iter()
            .map(|(k, _)| {
                let v = self.new_bucket_origins.get(&k).map(&rows).unwrap_or(Value::Array(vec![]));
                (k, v)
            })
            .collect();

        json!({
            "items": self.items,
            "changes": self.changes(),
            "by_kind": rows(&self.by_kind),
            "category_moves": rows(&self.category_moves),
            "subcategory_moves": rows(&self.subcategory_moves),
            "new_buckets": rows(&self.new_buckets),
            "new_bucket_origins": origins,
            "invalid_combos": rows(&self.invalid_combos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BucketKind, NewBucket};

    fn dec(kind: DecisionKind, from: (&str, &str), to: (&str, &str)) -> ClassificationDecision {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ClassificationDecision {
            item_id: "x".into(),
            from_category: opt(from.0),
            from_subcategory: opt(from.1),
            to_category: opt(to.0),
            to_subcategory: opt(to.1),
            confidence: 0.9,
            kind,
            reasons: vec!["r".into()],
            new_bucket: None,
        }
    }

    #[test]
    fn tallies_by_shape() {
        let mut agg = Aggregator::new();
        agg.record(&dec(DecisionKind::RemapCategory, ("tops", ""), ("camisetas_y_tops", "camisetas")));
        agg.record(&dec(DecisionKind::RemapCategory, ("tops", ""), ("camisetas_y_tops", "tops")));
        agg.record(&dec(DecisionKind::FillSubcategory, ("calzado", ""), ("calzado", "botas")));
        agg.record(&dec(DecisionKind::InvalidSubcategory, ("calzado", "pantuflas"), ("calzado", "")));
        agg.record(&dec(DecisionKind::Keep, ("", ""), ("", "")));

        assert_eq!(agg.items, 5);
        assert_eq!(agg.by_kind.get("remap_category"), 2);
        assert_eq!(agg.category_moves.get("tops -> camisetas_y_tops"), 2);
        assert_eq!(agg.subcategory_moves.get("calzado: (none) -> botas"), 1);
        assert_eq!(agg.invalid_combos.get("calzado:pantuflas"), 1);
        assert_eq!(agg.changes(), 4);
    }

    #[test]
    fn new_bucket_has_origin_breakdown() {
        let mut d = dec(DecisionKind::RemapCategory, ("accesorios", ""), ("otros", "sin_clasificar"));
        d.new_bucket = Some(NewBucket {
            kind: BucketKind::Category,
            key: "tecnologia".into(),
            label: "Tecnología".into(),
        });
        let mut agg = Aggregator::new();
        agg.record(&d);
        agg.record(&d);
        assert_eq!(agg.new_buckets.get("category:tecnologia"), 2);
        assert_eq!(agg.new_bucket_origins["category:tecnologia"].get("accesorios"), 2);
    }

    #[test]
    fn top_sorts_by_count_then_key() {
        let mut t = Tally::default();
        for k in ["b", "a", "c", "c", "b"] {
            t.add(k);
        }
        assert_eq!(
            t.top(2),
            vec![("b".to_string(), 2), ("c".to_string(), 2)]
        );
        assert_eq!(t.top(10).len(), 3);
    }

    #[test]
    fn merge_equals_single_pass() {
        let a = dec(DecisionKind::RemapCategory, ("tops", ""), ("camisetas_y_tops", ""));
        let b = dec(DecisionKind::MoveSubcategory, ("calzado", "tenis"), ("calzado", "botas"));
        let whole = Aggregator::from_decisions([&a, &b, &a]);
        let mut left = Aggregator::from_decisions([&a]);
        left.merge(&Aggregator::from_decisions([&b, &a]));
        assert_eq!(whole, left);
    }

    #[test]
    fn summary_is_truncated() {
        let mut agg = Aggregator::new();
        for cat in ["a", "b", "c"] {
            agg.record(&dec(DecisionKind::RemapCategory, (cat, ""), ("otros", "")));
        }
        let s = agg.summary(2);
        assert_eq!(s["category_moves"].as_array().unwrap().len(), 2);
        assert_eq!(s["items"], 3);
    }
}
