// src/sample.rs
//! Deterministic per-group QA sampling.
//!
//! Each decision gets a sort key `hex(sha256(item_id + seed))`. Within every
//! (current category, current subcategory) group the keys are sorted ascending
//! and the first N kept. Same seed + same input ⇒ same sample, whatever the
//! input order.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::decision::ClassificationDecision;

/// Group key; `None` parts are rendered as `"(none)"` in reports.
pub type GroupKey = (Option<String>, Option<String>);

pub fn sample_key(item_id: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item_id.as_bytes());
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleGroup<'a> {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Items in the group before sampling.
    pub population: usize,
    pub rows: Vec<&'a ClassificationDecision>,
}

/// Groups ordered by key; rows ordered by sample key.
pub fn sample_groups<'a>(
    decisions: &'a [ClassificationDecision],
    seed: &str,
    per_group: usize,
) -> Vec<SampleGroup<'a>> {
    let mut groups: BTreeMap<GroupKey, Vec<(String, &'a ClassificationDecision)>> = BTreeMap::new();
    for d in decisions {
        groups
            .entry((d.from_category.clone(), d.from_subcategory.clone()))
            .or_default()
            .push((sample_key(&d.item_id, seed), d));
    }

    groups
        .into_iter()
        .map(|((category, subcategory), mut rows)| {
            let population = rows.len();
            // id breaks the (astronomically unlikely) key tie
            rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.item_id.cmp(&b.1.item_id)));
            rows.truncate(per_group);
            SampleGroup {
                category,
                subcategory,
                population,
                rows: rows.into_iter().map(|(_, d)| d).collect(),
            }
        })
        .collect()
}

/// Flattened sample in group order.
pub fn sample<'a>(
    decisions: &'a [ClassificationDecision],
    seed: &str,
    per_group: usize,
) -> Vec<&'a ClassificationDecision> {
    sample_groups(decisions, seed, per_group)
        .into_iter()
        .flat_map(|g| g.rows)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionKind;

    fn dec(id: &str, cat: &str) -> ClassificationDecision {
        ClassificationDecision {
            item_id: id.into(),
            from_category: Some(cat.into()),
            from_subcategory: None,
            to_category: Some(cat.into()),
            to_subcategory: None,
            confidence: 0.0,
            kind: DecisionKind::Keep,
            reasons: vec![],
            new_bucket: None,
        }
    }

    #[test]
    fn key_is_hex_sha256_of_id_and_seed() {
        let k = sample_key("abc", "2025-06-01");
        assert_eq!(k.len(), 64);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(k, sample_key("abc", "2025-06-01"));
        assert_ne!(k, sample_key("abc", "2025-06-02"));
        // concatenation, not a keyed pair
        assert_eq!(sample_key("ab", "c"), sample_key("a", "bc"));
    }

    #[test]
    fn per_group_cap_and_group_order() {
        let mut ds: Vec<_> = (0..10).map(|i| dec(&format!("t{i}"), "tops")).collect();
        ds.extend((0..3).map(|i| dec(&format!("z{i}"), "bisuteria")));
        let groups = sample_groups(&ds, "seed", 4);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].category.as_deref(), Some("bisuteria"));
        assert_eq!(groups[0].rows.len(), 3);
        assert_eq!(groups[1].rows.len(), 4);
        assert_eq!(groups[1].population, 10);
    }

    #[test]
    fn zero_sample_size_is_empty() {
        let ds = vec![dec("a", "tops")];
        assert!(sample(&ds, "s", 0).is_empty());
    }
}
