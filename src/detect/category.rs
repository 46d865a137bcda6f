// src/detect/category.rs
//! Category resolver: an explicit, ordered list of detectors.
//!
//! Evaluation is first-match-wins top to bottom; there is no scoring or
//! merging across detectors. The order is the order of `[[detectors]]` in the
//! rule book, so reordering is a config change, not a code change.

use tracing::debug;

use super::{NewBucket, Suggestion};
use crate::patterns::PatternSet;
use crate::rules::{DetectorCfg, RuleBook};

/// One compiled detector: match patterns, optional exclusions, fixed output.
#[derive(Debug, Clone)]
pub struct Detector {
    pub id: String,
    pub group: String,
    category: String,
    subcategory: Option<String>,
    confidence: f32,
    reason: String,
    matches: PatternSet,
    excludes: PatternSet,
    new_bucket: Option<NewBucket>,
}

impl Detector {
    pub fn compile(cfg: &DetectorCfg) -> anyhow::Result<Self> {
        let matches = PatternSet::compile(&cfg.words, &cfg.phrases)
            .map_err(|e| anyhow::anyhow!("detector `{}` patterns: {e}", cfg.id))?;
        let excludes = PatternSet::compile(&cfg.exclude_words, &cfg.exclude_phrases)
            .map_err(|e| anyhow::anyhow!("detector `{}` exclusions: {e}", cfg.id))?;
        Ok(Self {
            id: cfg.id.clone(),
            group: cfg.group.clone(),
            category: cfg.category.clone(),
            subcategory: cfg.subcategory.clone(),
            confidence: cfg.confidence,
            reason: cfg.reason.clone(),
            matches,
            excludes,
            new_bucket: cfg.new_bucket.clone(),
        })
    }

    /// `text` must be normalized.
    pub fn evaluate(&self, text: &str) -> Option<Suggestion> {
        let term = self.matches.find(text)?;
        if let Some(blocker) = self.excludes.find(text) {
            debug!(target: "rules", detector = %self.id, %term, %blocker, "detector suppressed by exclusion");
            return None;
        }

        let mut s = Suggestion::new(self.category.clone(), self.confidence)
            .with_reason(format!("detector:{}", self.id))
            .with_reason(format!("matched:{term}"))
            .with_reason(self.reason.clone());
        if let Some(sub) = &self.subcategory {
            s = s.with_subcategory(sub.clone());
        }
        if let Some(nb) = &self.new_bucket {
            s = s.with_new_bucket(nb.clone());
        }
        Some(s)
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

#[derive(Debug, Clone)]
pub struct CategoryResolver {
    detectors: Vec<Detector>,
}

impl CategoryResolver {
    pub fn new(detectors: Vec<Detector>) -> Self {
        Self { detectors }
    }

    pub fn from_rules(book: &RuleBook) -> anyhow::Result<Self> {
        let detectors = book
            .detectors
            .iter()
            .map(Detector::compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(detectors))
    }

    /// First non-null detector output wins.
    pub fn evaluate(&self, text: &str) -> Option<Suggestion> {
        self.detectors.iter().find_map(|d| d.evaluate(text))
    }

    /// Same as `evaluate`, restricted to one detector group (order preserved).
    pub fn evaluate_group(&self, group: &str, text: &str) -> Option<Suggestion> {
        self.detectors
            .iter()
            .filter(|d| d.group == group)
            .find_map(|d| d.evaluate(text))
    }

    /// Detector ids in evaluation order.
    pub fn order(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.id.as_str()).collect()
    }

    /// Detector groups in first-appearance order.
    pub fn group_order(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for d in &self.detectors {
            if !out.contains(&d.group.as_str()) {
                out.push(d.group.as_str());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_text;

    fn resolver() -> CategoryResolver {
        CategoryResolver::from_rules(&RuleBook::bundled().unwrap()).unwrap()
    }

    fn cat(text: &str) -> Option<String> {
        resolver().evaluate(&normalize_text(text)).map(|s| s.category)
    }

    #[test]
    fn reference_group_order() {
        let r = resolver();
        assert_eq!(
            r.group_order(),
            vec![
                "gift_card",
                "beauty",
                "home_lifestyle",
                "jewelry",
                "glasses",
                "bags",
                "footwear",
                "textile_accessory",
                "apparel",
                "tech",
            ]
        );
    }

    #[test]
    fn earlier_detector_wins() {
        assert_eq!(cat("Tarjeta de regalo para zapatos").as_deref(), Some("tarjetas_regalo"));
        assert_eq!(cat("Collar para perro talla M").as_deref(), Some("hogar_y_lifestyle"));
        assert_eq!(cat("Top deportivo negro").as_deref(), Some("ropa_deportiva"));
    }

    #[test]
    fn home_aroma_suppresses_fragrance() {
        let s = resolver()
            .evaluate(&normalize_text("Vela aromática perfume de vainilla"))
            .unwrap();
        assert_eq!(s.category, "hogar_y_lifestyle");
        assert!(s.reasons.iter().any(|r| r == "detector:home_lifestyle"));
        assert_eq!(cat("Perfume floral 100ml").as_deref(), Some("belleza"));
    }

    #[test]
    fn sock_context_suppresses_anklet() {
        let s = resolver().evaluate(&normalize_text("Tobillera de plata con dije")).unwrap();
        assert_eq!(s.category, "joyeria");
        assert_eq!(s.subcategory.as_deref(), Some("tobilleras"));

        assert_eq!(
            cat("Tobilleras de algodón pack x3").as_deref(),
            Some("accesorios_textiles")
        );
    }

    #[test]
    fn pants_context_suppresses_boot() {
        assert_eq!(cat("Pantalón bota recta negro").as_deref(), Some("pantalones"));
        assert_eq!(cat("Jean bota ancha azul").as_deref(), Some("pantalones"));
        assert_eq!(cat("Bota de cuero café").as_deref(), Some("calzado"));
    }

    #[test]
    fn new_bucket_is_reported() {
        let s = resolver().evaluate(&normalize_text("Bikini estampado")).unwrap();
        assert_eq!(s.category, "ropa_interior");
        assert_eq!(s.new_bucket.as_ref().map(|b| b.key.as_str()), Some("trajes_de_bano"));
    }

    #[test]
    fn group_evaluation_ignores_other_groups() {
        let r = resolver();
        let text = normalize_text("Tarjeta de regalo camiseta");
        assert_eq!(r.evaluate(&text).unwrap().category, "tarjetas_regalo");
        assert_eq!(r.evaluate_group("apparel", &text).unwrap().category, "camisetas_y_tops");
        assert!(r.evaluate_group("nope", &text).is_none());
    }

    #[test]
    fn deterministic() {
        let r = resolver();
        let t = normalize_text("Camiseta manga larga cuello alto");
        let a = r.evaluate(&t);
        for _ in 0..10 {
            assert_eq!(r.evaluate(&t), a);
        }
    }

    #[test]
    fn nothing_matches_returns_none() {
        assert_eq!(cat("Producto sin descripción"), None);
        assert_eq!(cat(""), None);
    }
}
