// src/detect/subcategory.rs
//! Subcategory resolver: `(canonical category, normalized text) → Suggestion?`.
//!
//! Most categories use an ordered rule table from the rule book (first match
//! wins, last rule is a ~0.6 generic fallback). Two families need bespoke
//! logic because the right bucket depends on several garment signals at once:
//!
//! - `shirts` (`camisetas_y_tops`): garment type × crop cue × sleeve length.
//! - `sport` (`ropa_deportiva`): sport context × garment type × multi-garment sets.
//!
//! Confidence bands are shared: a specific cue scores >= 0.85, generic
//! guesses stay within 0.6..=0.78.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

use super::Suggestion;
use crate::patterns::PatternSet;
use crate::rules::{RuleBook, SubRuleCfg};

const SHIRT_KEYS: &[&str] = &[
    "camisetas",
    "camisetas_manga_larga",
    "tops",
    "crop_tops",
    "camisas",
    "blusas",
    "polos",
    "bodys",
    "otros_camisetas",
];

const SPORT_KEYS: &[&str] = &[
    "leggings",
    "tops_deportivos",
    "shorts_deportivos",
    "sudaderas_deportivas",
    "camisetas_deportivas",
    "conjuntos_deportivos",
    "otros_deportiva",
];

/// Every key a bespoke resolver may emit (used by rule book validation).
pub fn bespoke_outputs(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "shirts" => Some(SHIRT_KEYS),
        "sport" => Some(SPORT_KEYS),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bespoke {
    Shirts,
    Sport,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    key: String,
    confidence: f32,
    reason: String,
    patterns: PatternSet,
    excludes: PatternSet,
    fallback: bool,
}

#[derive(Debug, Clone)]
enum Table {
    Rules(Vec<CompiledRule>),
    Bespoke(Bespoke),
}

#[derive(Debug, Clone, Default)]
pub struct SubcategoryResolver {
    tables: BTreeMap<String, Table>,
}

impl SubcategoryResolver {
    pub fn from_rules(book: &RuleBook) -> anyhow::Result<Self> {
        let mut tables = BTreeMap::new();
        for (cat, cfg) in &book.subcategories {
            let table = match cfg.resolver.as_deref() {
                Some("shirts") => Table::Bespoke(Bespoke::Shirts),
                Some("sport") => Table::Bespoke(Bespoke::Sport),
                Some(other) => anyhow::bail!("category `{cat}`: unknown resolver `{other}`"),
                None => Table::Rules(
                    cfg.rules
                        .iter()
                        .map(|r| compile_rule(cat, r))
                        .collect::<anyhow::Result<Vec<_>>>()?,
                ),
            };
            tables.insert(cat.clone(), table);
        }
        Ok(Self { tables })
    }

    pub fn has_table(&self, category: &str) -> bool {
        self.tables.contains_key(category)
    }

    /// `text` must be normalized. Categories without a table yield `None`.
    pub fn resolve(&self, category: &str, text: &str) -> Option<Suggestion> {
        match self.tables.get(category)? {
            Table::Bespoke(Bespoke::Shirts) => Some(resolve_shirts(category, text)),
            Table::Bespoke(Bespoke::Sport) => Some(resolve_sport(category, text)),
            Table::Rules(rules) => rules.iter().find_map(|r| {
                let hit = if r.fallback {
                    Some("fallback".to_string())
                } else if r.excludes.is_match(text) {
                    None
                } else {
                    r.patterns.find(text).map(|t| format!("matched:{t}"))
                }?;
                Some(
                    Suggestion::new(category, r.confidence)
                        .with_subcategory(r.key.clone())
                        .with_reason(format!("subcategory:{}", r.key))
                        .with_reason(hit)
                        .with_reason(r.reason.clone()),
                )
            }),
        }
    }
}

fn compile_rule(cat: &str, r: &SubRuleCfg) -> anyhow::Result<CompiledRule> {
    let patterns = PatternSet::compile(&r.words, &r.phrases)
        .map_err(|e| anyhow::anyhow!("category `{cat}` rule `{}`: {e}", r.key))?;
    let excludes = PatternSet::compile(&r.exclude_words, &r.exclude_phrases)
        .map_err(|e| anyhow::anyhow!("category `{cat}` rule `{}` exclusions: {e}", r.key))?;
    Ok(CompiledRule {
        key: r.key.clone(),
        confidence: r.confidence,
        reason: r.reason.clone(),
        patterns,
        excludes,
        fallback: r.fallback,
    })
}

fn static_set(words: &[&str], phrases: &[&str]) -> PatternSet {
    let w: Vec<String> = words.iter().map(|s| s.to_string()).collect();
    let p: Vec<String> = phrases.iter().map(|s| s.to_string()).collect();
    PatternSet::compile(&w, &p).expect("static cue patterns")
}

/* ----------------------------
Shirts / blouses
---------------------------- */

struct ShirtCues {
    polo: PatternSet,
    body: PatternSet,
    camiseta: PatternSet,
    camisa: PatternSet,
    blusa: PatternSet,
    top: PatternSet,
    crop: PatternSet,
    long_sleeve: PatternSet,
}

static SHIRT_CUES: Lazy<ShirtCues> = Lazy::new(|| ShirtCues {
    polo: static_set(&["polo", "polos"], &[]),
    body: static_set(&["body", "bodies", "bodysuit"], &[]),
    camiseta: static_set(
        &["camiseta", "camisetas", "franela", "franelas", "tshirt", "remera"],
        &["t shirt"],
    ),
    camisa: static_set(&["camisa", "camisas", "camisero"], &[]),
    blusa: static_set(&["blusa", "blusas"], &[]),
    top: static_set(&["top", "tops", "esqueleto", "esqueletos", "tank"], &[]),
    crop: static_set(&["crop", "cropped", "ombliguera", "ombligueras"], &["crop top"]),
    long_sleeve: static_set(&["mangalarga"], &["manga larga", "long sleeve"]),
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Garment {
    Polo,
    Body,
    Camiseta,
    Camisa,
    Blusa,
    Top,
}

fn resolve_shirts(category: &str, text: &str) -> Suggestion {
    let c = &*SHIRT_CUES;

    // Garment precedence: the most specific silhouette wins.
    let garment = [
        (Garment::Polo, &c.polo),
        (Garment::Body, &c.body),
        (Garment::Camiseta, &c.camiseta),
        (Garment::Camisa, &c.camisa),
        (Garment::Blusa, &c.blusa),
        (Garment::Top, &c.top),
    ]
    .into_iter()
    .find_map(|(g, set)| set.find(text).map(|term| (g, term)));

    let crop = c.crop.find(text);
    let long = c.long_sleeve.find(text);

    let (key, confidence) = match (garment.as_ref().map(|g| g.0), crop.is_some(), long.is_some()) {
        (Some(Garment::Polo), _, _) => ("polos", 0.9),
        (Some(Garment::Body), _, _) => ("bodys", 0.88),
        (Some(Garment::Camisa), _, _) => ("camisas", 0.9),
        (Some(Garment::Camiseta), true, _) => ("crop_tops", 0.86),
        (Some(Garment::Camiseta), false, true) => ("camisetas_manga_larga", 0.9),
        (Some(Garment::Camiseta), false, false) => ("camisetas", 0.88),
        (Some(Garment::Blusa), true, _) => ("crop_tops", 0.86),
        (Some(Garment::Blusa), false, _) => ("blusas", 0.9),
        (Some(Garment::Top), true, _) => ("crop_tops", 0.9),
        (Some(Garment::Top), false, _) => ("tops", 0.86),
        (None, true, _) => ("crop_tops", 0.85),
        (None, false, true) => ("camisetas_manga_larga", 0.72),
        (None, false, false) => ("otros_camisetas", 0.6),
    };

    let mut s = Suggestion::new(category, confidence)
        .with_subcategory(key)
        .with_reason(format!("subcategory:{key}"))
        .with_reason("resolver:shirts");
    if let Some((_, term)) = garment {
        s = s.with_reason(format!("garment:{term}"));
    }
    if let Some(term) = crop {
        s = s.with_reason(format!("cue:{term}"));
    }
    if let Some(term) = long {
        s = s.with_reason(format!("cue:{term}"));
    }
    if key == "otros_camisetas" {
        s = s.with_reason("fallback");
    }
    s
}

/* ----------------------------
Sportswear
---------------------------- */

struct SportCues {
    context: PatternSet,
    set: PatternSet,
    garments: Vec<(&'static str, PatternSet)>,
}

static SPORT_CUES: Lazy<SportCues> = Lazy::new(|| SportCues {
    context: static_set(
        &[
            "deportivo",
            "deportiva",
            "deportivos",
            "deportivas",
            "deporte",
            "gym",
            "running",
            "yoga",
            "fitness",
            "training",
            "entrenamiento",
            "crossfit",
            "ciclismo",
        ],
        &["dry fit"],
    ),
    set: static_set(&["conjunto", "conjuntos", "set", "kit"], &[]),
    garments: vec![
        (
            "leggings",
            static_set(&["legging", "leggings", "leggins", "licra", "licras", "malla", "mallas"], &[]),
        ),
        (
            "tops_deportivos",
            static_set(&["top", "tops", "brasier", "bra", "sosten", "bralette"], &[]),
        ),
        (
            "shorts_deportivos",
            static_set(&["short", "shorts", "pantaloneta", "pantalonetas", "biker"], &[]),
        ),
        (
            "sudaderas_deportivas",
            static_set(&["sudadera", "sudaderas", "hoodie", "buzo", "buzos", "chaqueta", "rompevientos"], &[]),
        ),
        (
            "camisetas_deportivas",
            static_set(&["camiseta", "camisetas", "franela", "tshirt"], &["t shirt"]),
        ),
    ],
});

fn resolve_sport(category: &str, text: &str) -> Suggestion {
    let c = &*SPORT_CUES;
    let context = c.context.find(text);
    let set_word = c.set.find(text);
    let found: Vec<(&'static str, String)> = c
        .garments
        .iter()
        .filter_map(|(key, set)| set.find(text).map(|t| (*key, t)))
        .collect();

    let (key, confidence) = if set_word.is_some() && !found.is_empty() {
        ("conjuntos_deportivos", 0.9)
    } else if found.len() >= 2 {
        // Two distinct garment types in one listing is a set.
        ("conjuntos_deportivos", 0.86)
    } else if let Some((key, _)) = found.first() {
        let conf = if context.is_some() {
            0.9
        } else if *key == "leggings" {
            0.88
        } else {
            0.78
        };
        (*key, conf)
    } else if context.is_some() {
        ("otros_deportiva", 0.7)
    } else {
        ("otros_deportiva", 0.6)
    };

    let mut s = Suggestion::new(category, confidence)
        .with_subcategory(key)
        .with_reason(format!("subcategory:{key}"))
        .with_reason("resolver:sport");
    for (_, term) in &found {
        s = s.with_reason(format!("garment:{term}"));
    }
    if let Some(term) = set_word {
        s = s.with_reason(format!("cue:{term}"));
    }
    if let Some(term) = context {
        s = s.with_reason(format!("context:{term}"));
    }
    if found.is_empty() {
        s = s.with_reason("fallback");
    }
    s
}
