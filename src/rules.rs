// src/rules.rs
//! Rule book: detector list, per-category subcategory tables and legacy buckets.
//!
//! The tables are configuration data (TOML), not code. The bundled
//! `config/rules.toml` is embedded as the default; `RULES_CONFIG_PATH` points
//! at an override. `validate()` checks a book against a taxonomy snapshot so
//! a typo in a table can never produce a non-canonical write.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::detect::subcategory::bespoke_outputs;
use crate::detect::{BucketKind, NewBucket};
use crate::taxonomy::Taxonomy;

pub const ENV_RULES_CONFIG_PATH: &str = "RULES_CONFIG_PATH";

/// Rule book bundled with the crate.
pub const DEFAULT_RULES_TOML: &str = include_str!("../config/rules.toml");

/// A fallback fires without any text cue, so it stays in the generic band.
pub const MAX_FALLBACK_CONFIDENCE: f32 = 0.78;

#[derive(Debug, Clone, Deserialize)]
pub struct RuleBook {
    pub version: String,
    #[serde(default)]
    pub detectors: Vec<DetectorCfg>,
    #[serde(default)]
    pub subcategories: BTreeMap<String, SubcategoryTableCfg>,
    #[serde(default)]
    pub legacy: Vec<LegacyCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorCfg {
    pub id: String,
    /// Detector family, e.g. "footwear" or "apparel". Used by legacy deferral.
    pub group: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub confidence: f32,
    pub reason: String,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub exclude_words: Vec<String>,
    #[serde(default)]
    pub exclude_phrases: Vec<String>,
    #[serde(default)]
    pub new_bucket: Option<NewBucket>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubcategoryTableCfg {
    /// Name of a bespoke resolver ("shirts" | "sport"); replaces `rules`.
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default)]
    pub rules: Vec<SubRuleCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubRuleCfg {
    pub key: String,
    pub confidence: f32,
    pub reason: String,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub exclude_words: Vec<String>,
    #[serde(default)]
    pub exclude_phrases: Vec<String>,
    /// Always matches; must be the last rule of a table.
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyCfg {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub target: String,
    #[serde(default)]
    pub target_subcategory: Option<String>,
    pub confidence: f32,
    /// Evaluate this detector group first; use `target` only when it has no answer.
    #[serde(default)]
    pub defer_to_group: Option<String>,
    /// Low-confidence forced migration of a bucket with no confident mapping.
    #[serde(default)]
    pub forced: bool,
}

impl RuleBook {
    /// `RULES_CONFIG_PATH` if set, else the bundled book.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(ENV_RULES_CONFIG_PATH) {
            Ok(p) => Self::from_path(&PathBuf::from(p)),
            Err(_) => Self::from_toml_str(DEFAULT_RULES_TOML).context("bundled rule book"),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading rule book from {}", path.display()))?;
        let book = Self::from_toml_str(&content)
            .with_context(|| format!("parsing rule book {}", path.display()))?;
        info!(target: "rules", version = %book.version, path = %path.display(), "rule book loaded");
        Ok(book)
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn bundled() -> anyhow::Result<Self> {
        Self::from_toml_str(DEFAULT_RULES_TOML)
    }

    /// Collect every problem instead of stopping at the first one.
    pub fn problems(&self, tax: &Taxonomy) -> Vec<String> {
        let mut out = Vec::new();

        if self.version.trim().is_empty() {
            out.push("rule book version is empty".to_string());
        }

        // --- detectors ---
        if self.detectors.is_empty() {
            out.push("no category detectors configured".to_string());
        }
        let mut ids = BTreeSet::new();
        for d in &self.detectors {
            let at = format!("detector `{}`", d.id);
            if !ids.insert(d.id.as_str()) {
                out.push(format!("{at}: duplicate id"));
            }
            check_confidence(&at, d.confidence, &mut out);
            check_target(&at, tax, &d.category, d.subcategory.as_deref(), &mut out);
            if d.words.is_empty() && d.phrases.is_empty() {
                out.push(format!("{at}: no match patterns"));
            }
            if let Some(nb) = &d.new_bucket {
                if nb.key.trim().is_empty() {
                    out.push(format!("{at}: new_bucket key is empty"));
                }
                let already = match nb.kind {
                    BucketKind::Category => tax.is_canonical(Some(&nb.key)),
                    BucketKind::Subcategory => tax.allows(&d.category, &nb.key),
                };
                if already {
                    out.push(format!("{at}: new_bucket `{}` already exists", nb.key));
                }
            }
        }
        let groups: BTreeSet<&str> = self.detectors.iter().map(|d| d.group.as_str()).collect();

        // --- subcategory tables ---
        for (cat, table) in &self.subcategories {
            let at = format!("subcategory table `{cat}`");
            if !tax.is_canonical(Some(cat)) {
                out.push(format!("{at}: category is not canonical"));
                continue;
            }
            if let Some(name) = &table.resolver {
                match bespoke_outputs(name) {
                    Some(keys) => {
                        for k in keys {
                            if !tax.allows(cat, k) {
                                out.push(format!("{at}: resolver `{name}` emits `{k}` which is not allowed"));
                            }
                        }
                    }
                    None => out.push(format!("{at}: unknown resolver `{name}`")),
                }
                if !table.rules.is_empty() {
                    out.push(format!("{at}: has both a resolver and rules"));
                }
                continue;
            }
            match table.rules.last() {
                None => out.push(format!("{at}: no rules")),
                Some(last) if !last.fallback => {
                    out.push(format!("{at}: last rule `{}` is not a fallback", last.key))
                }
                _ => {}
            }
            let n = table.rules.len();
            for (i, r) in table.rules.iter().enumerate() {
                let rat = format!("{at} rule `{}`", r.key);
                check_confidence(&rat, r.confidence, &mut out);
                if !tax.allows(cat, &r.key) {
                    out.push(format!("{rat}: subcategory not allowed"));
                }
                if r.fallback && i + 1 != n {
                    out.push(format!("{rat}: fallback must be the last rule"));
                }
                if r.fallback && r.confidence > MAX_FALLBACK_CONFIDENCE {
                    out.push(format!(
                        "{rat}: fallback confidence {} above {MAX_FALLBACK_CONFIDENCE}",
                        r.confidence
                    ));
                }
                if !r.fallback && r.words.is_empty() && r.phrases.is_empty() {
                    out.push(format!("{rat}: no match patterns"));
                }
            }
        }

        // --- legacy buckets ---
        for l in &self.legacy {
            let at = format!("legacy bucket `{}`", l.category);
            if tax.is_canonical(Some(&l.category)) {
                out.push(format!("{at}: category is canonical, not legacy"));
            }
            check_confidence(&at, l.confidence, &mut out);
            check_target(&at, tax, &l.target, l.target_subcategory.as_deref(), &mut out);
            if let Some(g) = &l.defer_to_group {
                if !groups.contains(g.as_str()) {
                    out.push(format!("{at}: unknown detector group `{g}`"));
                }
            }
        }

        out
    }

    /// Fail with every problem listed.
    pub fn validate(&self, tax: &Taxonomy) -> anyhow::Result<()> {
        let problems = self.problems(tax);
        if problems.is_empty() {
            return Ok(());
        }
        Err(anyhow!(
            "rule book {} is invalid ({} problems): {}",
            self.version,
            problems.len(),
            problems.join("; ")
        ))
    }
}

fn check_confidence(at: &str, c: f32, out: &mut Vec<String>) {
    if !c.is_finite() || !(0.0..=1.0).contains(&c) {
        out.push(format!("{at}: confidence {c} outside [0,1]"));
    }
}

fn check_target(at: &str, tax: &Taxonomy, cat: &str, sub: Option<&str>, out: &mut Vec<String>) {
    if !tax.is_canonical(Some(cat)) {
        out.push(format!("{at}: category `{cat}` is not canonical"));
        return;
    }
    if let Some(s) = sub {
        if !tax.allows(cat, s) {
            out.push(format!("{at}: subcategory `{s}` not allowed under `{cat}`"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_toml_str(include_str!("../config/taxonomy.toml")).unwrap()
    }

    #[test]
    fn bundled_book_is_valid() {
        let book = RuleBook::bundled().unwrap();
        let problems = book.problems(&taxonomy());
        assert!(problems.is_empty(), "problems: {problems:#?}");
    }

    #[test]
    fn every_table_ends_with_fallback_or_resolver() {
        let book = RuleBook::bundled().unwrap();
        for (cat, table) in &book.subcategories {
            let ok = table.resolver.is_some()
                || table
                    .rules
                    .last()
                    .is_some_and(|r| r.fallback && r.confidence <= MAX_FALLBACK_CONFIDENCE);
            assert!(ok, "table `{cat}` lacks a low-confidence fallback");
        }
    }

    #[test]
    fn reports_bad_entries() {
        let bad = r#"
version = "x"

[[detectors]]
id = "d1"
group = "g"
category = "no_such_category"
confidence = 1.5
reason = "r"

[[subcategories.calzado.rules]]
key = "botas"
confidence = 0.9
reason = "boots"
words = ["bota"]

[[legacy]]
category = "calzado"
target = "calzado"
target_subcategory = "pantuflas"
confidence = 0.7
defer_to_group = "missing"
"#;
        let book = RuleBook::from_toml_str(bad).unwrap();
        let p = book.problems(&taxonomy()).join("\n");
        assert!(p.contains("confidence 1.5 outside"), "{p}");
        assert!(p.contains("`no_such_category` is not canonical"), "{p}");
        assert!(p.contains("no match patterns"), "{p}");
        assert!(p.contains("is not a fallback"), "{p}");
        assert!(p.contains("canonical, not legacy"), "{p}");
        assert!(p.contains("`pantuflas` not allowed"), "{p}");
        assert!(p.contains("unknown detector group"), "{p}");
        assert!(book.validate(&taxonomy()).is_err());
    }

    #[test]
    fn confident_fallback_is_rejected() {
        let bad = r#"
version = "x"

[[detectors]]
id = "d1"
group = "g"
category = "tarjetas_regalo"
confidence = 0.98
reason = "r"
phrases = ["tarjeta de regalo"]

[[subcategories.tarjetas_regalo.rules]]
key = "tarjeta_regalo"
confidence = 0.95
reason = "gift card"
fallback = true
"#;
        let book = RuleBook::from_toml_str(bad).unwrap();
        let p = book.problems(&taxonomy()).join("\n");
        assert!(p.contains("fallback confidence 0.95 above 0.78"), "{p}");
        assert!(book.validate(&taxonomy()).is_err());
    }

    #[test]
    fn unknown_resolver_is_reported() {
        let bad = r#"
version = "x"

[[detectors]]
id = "d1"
group = "g"
category = "calzado"
confidence = 0.9
reason = "r"
words = ["zapato"]

[subcategories.calzado]
resolver = "shoes"
"#;
        let book = RuleBook::from_toml_str(bad).unwrap();
        let p = book.problems(&taxonomy()).join("\n");
        assert!(p.contains("unknown resolver `shoes`"), "{p}");
    }

    #[serial_test::serial]
    #[test]
    fn env_path_overrides_bundled_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(
            &path,
            r#"
version = "from-env"

[[detectors]]
id = "d"
group = "g"
category = "calzado"
confidence = 0.9
reason = "r"
words = ["zapato"]
"#,
        )
        .unwrap();
        std::env::set_var(ENV_RULES_CONFIG_PATH, path.display().to_string());
        let book = RuleBook::load().unwrap();
        std::env::remove_var(ENV_RULES_CONFIG_PATH);
        assert_eq!(book.version, "from-env");

        let book = RuleBook::load().unwrap();
        assert_ne!(book.version, "from-env");
    }
}
