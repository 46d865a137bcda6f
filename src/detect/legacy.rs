// src/detect/legacy.rs
//! Legacy bucket fallback: deprecated category identifiers → canonical targets.
//!
//! Only consulted when the category resolver has no answer and the item's
//! current category is not canonical. Entries come from `[[legacy]]` in the
//! rule book and are matched on `normalize_key` of the stored values, so
//! `"Ropa Interior y Pijamas"` and `ropa_interior_y_pijamas` are the same
//! bucket. Category+subcategory pairs beat category-only entries.

use super::{CategoryResolver, Suggestion};
use crate::normalize::{normalize, normalize_key};
use crate::rules::{LegacyCfg, RuleBook};

#[derive(Debug, Clone)]
struct LegacyEntry {
    category: String,
    subcategory: Option<String>,
    target: String,
    target_subcategory: Option<String>,
    confidence: f32,
    defer_to_group: Option<String>,
    forced: bool,
}

impl LegacyEntry {
    fn from_cfg(cfg: &LegacyCfg) -> Self {
        Self {
            category: normalize_key(Some(&cfg.category)),
            subcategory: cfg
                .subcategory
                .as_deref()
                .map(|s| normalize_key(Some(s)))
                .filter(|s| !s.is_empty()),
            target: cfg.target.clone(),
            target_subcategory: cfg.target_subcategory.clone(),
            confidence: cfg.confidence,
            defer_to_group: cfg.defer_to_group.clone(),
            forced: cfg.forced,
        }
    }

    fn bucket(&self) -> String {
        match &self.subcategory {
            Some(sub) => format!("{}/{}", self.category, sub),
            None => self.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegacyFallback {
    entries: Vec<LegacyEntry>,
}

impl LegacyFallback {
    pub fn from_rules(book: &RuleBook) -> Self {
        Self {
            entries: book.legacy.iter().map(LegacyEntry::from_cfg).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `category` names a configured legacy bucket.
    pub fn knows(&self, category: Option<&str>) -> bool {
        let key = normalize_key(category);
        !key.is_empty() && self.entries.iter().any(|e| e.category == key)
    }

    /// `text` must be normalized. Unknown (or null) legacy categories yield `None`.
    ///
    /// A deferring bucket asks its detector group about `text` first, then
    /// about the stored subcategory label. Inside `Resolver` the text pass
    /// never answers (the full detector list already ran on the same text);
    /// it matters for callers that consult the fallback on its own, e.g. to
    /// preview a bucket mapping over raw titles.
    pub fn evaluate(
        &self,
        legacy_category: Option<&str>,
        legacy_subcategory: Option<&str>,
        text: &str,
        primary: &CategoryResolver,
    ) -> Option<Suggestion> {
        let cat_key = normalize_key(legacy_category);
        if cat_key.is_empty() {
            return None;
        }
        let sub_key = normalize_key(legacy_subcategory);

        let pair = (!sub_key.is_empty())
            .then(|| {
                self.entries
                    .iter()
                    .find(|e| e.category == cat_key && e.subcategory.as_deref() == Some(sub_key.as_str()))
            })
            .flatten();
        let entry = pair.or_else(|| {
            self.entries
                .iter()
                .find(|e| e.category == cat_key && e.subcategory.is_none())
        })?;

        let bucket = entry.bucket();

        if let Some(group) = &entry.defer_to_group {
            // The stored subcategory label is often the only garment hint left.
            let deferred = primary
                .evaluate_group(group, text)
                .or_else(|| primary.evaluate_group(group, &normalize(legacy_subcategory)));
            if let Some(found) = deferred {
                let mut s = Suggestion::new(found.category, entry.confidence)
                    .with_reason(format!("legacy:{bucket}"))
                    .with_reason(format!("legacy:{bucket}:deferred:{group}"));
                if let Some(sub) = found.subcategory {
                    s = s.with_subcategory(sub);
                }
                s.reasons.extend(found.reasons);
                if let Some(nb) = found.new_bucket {
                    s = s.with_new_bucket(nb);
                }
                return Some(s);
            }
        }

        let mut s = Suggestion::new(entry.target.clone(), entry.confidence)
            .with_reason(format!("legacy:{bucket}"));
        if let Some(sub) = &entry.target_subcategory {
            s = s.with_subcategory(sub.clone());
        }
        if entry.forced {
            s = s.with_reason(format!("legacy:{}:forced", entry.category));
        }
        Some(s)
    }
}
