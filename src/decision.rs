//! decision.rs: decision kinds, thresholds and the classification policy.
//!
//! `decide` is a pure function over (current state, category suggestion,
//! thresholds). Subcategory inference is passed in as a closure so the
//! policy stays independent of how the rule tables are loaded.
//!
//! Evaluation order (first applicable wins, exactly one kind per item):
//! 1. `remap_category`: current category is not canonical, any suggestion exists
//! 2. `new_subcategory_candidate`: same canonical category, suggestion carries a new bucket
//! 3. `move_category`: different canonical category, confidence >= move-category bar
//! 4. same category: `fill_subcategory`, then `move_subcategory`,
//!    then `invalid_subcategory`, otherwise `keep`
//!
//! All threshold comparisons are inclusive.

use serde::{Deserialize, Serialize};

use crate::detect::{clamp01, NewBucket, Suggestion};

/// Outcome class of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Keep,
    RemapCategory,
    MoveCategory,
    FillSubcategory,
    MoveSubcategory,
    InvalidSubcategory,
    NewSubcategoryCandidate,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 7] = [
        DecisionKind::Keep,
        DecisionKind::RemapCategory,
        DecisionKind::MoveCategory,
        DecisionKind::FillSubcategory,
        DecisionKind::MoveSubcategory,
        DecisionKind::InvalidSubcategory,
        DecisionKind::NewSubcategoryCandidate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::Keep => "keep",
            DecisionKind::RemapCategory => "remap_category",
            DecisionKind::MoveCategory => "move_category",
            DecisionKind::FillSubcategory => "fill_subcategory",
            DecisionKind::MoveSubcategory => "move_subcategory",
            DecisionKind::InvalidSubcategory => "invalid_subcategory",
            DecisionKind::NewSubcategoryCandidate => "new_subcategory_candidate",
        }
    }

    /// Kinds the apply path writes. `new_subcategory_candidate` is report-only.
    pub fn writes(self) -> bool {
        !matches!(self, DecisionKind::Keep | DecisionKind::NewSubcategoryCandidate)
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_MOVE_CATEGORY_THRESHOLD: f32 = 0.95;
pub const DEFAULT_MOVE_SUBCATEGORY_THRESHOLD: f32 = 0.90;
pub const DEFAULT_FILL_SUBCATEGORY_THRESHOLD: f32 = 0.86;

/// Three independent bars. Leaving a canonical category is the riskiest
/// change, so it has the highest default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub move_category: f32,
    pub move_subcategory: f32,
    pub fill_subcategory: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            move_category: DEFAULT_MOVE_CATEGORY_THRESHOLD,
            move_subcategory: DEFAULT_MOVE_SUBCATEGORY_THRESHOLD,
            fill_subcategory: DEFAULT_FILL_SUBCATEGORY_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn new(move_category: f32, move_subcategory: f32, fill_subcategory: f32) -> Self {
        Self {
            move_category: clamp01(move_category),
            move_subcategory: clamp01(move_subcategory),
            fill_subcategory: clamp01(fill_subcategory),
        }
    }
}

/// Current state of one item as the policy sees it.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub category: Option<&'a str>,
    /// Empty strings are treated as "no subcategory".
    pub subcategory: Option<&'a str>,
    pub category_is_canonical: bool,
    /// Current subcategory is a member of the current category's allowed set.
    pub subcategory_allowed: bool,
    pub suggestion: Option<&'a Suggestion>,
}

impl PolicyInput<'_> {
    fn current_subcategory(&self) -> Option<&str> {
        self.subcategory.map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub kind: DecisionKind,
    pub to_category: Option<String>,
    pub to_subcategory: Option<String>,
    pub confidence: f32,
    pub reasons: Vec<String>,
    pub new_bucket: Option<NewBucket>,
}

impl PolicyOutcome {
    fn keep(input: &PolicyInput<'_>, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Keep,
            to_category: input.category.map(str::to_string),
            to_subcategory: input.subcategory.map(str::to_string),
            confidence: clamp01(confidence),
            reasons: vec![reason.into()],
            new_bucket: None,
        }
    }

    /// Adopt `s` as the new category, filling the subcategory from `infer`
    /// when the suggestion has none.
    fn adopt<F>(kind: DecisionKind, s: &Suggestion, infer: F) -> Self
    where
        F: FnOnce(&str) -> Option<Suggestion>,
    {
        let mut reasons = s.reasons.clone();
        let to_subcategory = match &s.subcategory {
            Some(sub) => Some(sub.clone()),
            None => infer(&s.category).and_then(|sub| {
                reasons.extend(sub.reasons);
                sub.subcategory
            }),
        };
        Self {
            kind,
            to_category: Some(s.category.clone()),
            to_subcategory,
            confidence: s.confidence,
            reasons,
            new_bucket: s.new_bucket.clone(),
        }
    }
}

/// Classify one item. `infer(category)` runs the subcategory resolver for
/// `category` over the item's text.
pub fn decide<F>(input: &PolicyInput<'_>, t: &Thresholds, infer: F) -> PolicyOutcome
where
    F: Fn(&str) -> Option<Suggestion>,
{
    // 1) escaping a non-canonical (or null) category needs no bar
    if !input.category_is_canonical {
        return match input.suggestion {
            Some(s) => PolicyOutcome::adopt(DecisionKind::RemapCategory, s, &infer),
            None => PolicyOutcome::keep(input, 0.0, "unresolved:no_suggestion"),
        };
    }

    let current = input.category.map(str::trim).unwrap_or_default();

    if let Some(s) = input.suggestion {
        // 2) informational: a bucket the tree does not have yet
        if s.category == current {
            if let Some(nb) = &s.new_bucket {
                let mut reasons = s.reasons.clone();
                reasons.push(format!("new_bucket:{}", nb.key));
                return PolicyOutcome {
                    kind: DecisionKind::NewSubcategoryCandidate,
                    to_category: Some(current.to_string()),
                    to_subcategory: input.subcategory.map(str::to_string),
                    confidence: s.confidence,
                    reasons,
                    new_bucket: Some(nb.clone()),
                };
            }
        }

        // 3) leaving a canonical category is conservative
        if s.category != current && s.confidence >= t.move_category {
            return PolicyOutcome::adopt(DecisionKind::MoveCategory, s, &infer);
        }
    }

    // 4) category stays; work on the subcategory
    let inferred = infer(current);
    let held = input
        .suggestion
        .filter(|s| s.category != current)
        .map(|s| format!("below_threshold:move_category:{}", s.category));

    match input.current_subcategory() {
        None => match inferred {
            Some(sub) if sub.confidence >= t.fill_subcategory && sub.subcategory.is_some() => PolicyOutcome {
                kind: DecisionKind::FillSubcategory,
                to_category: Some(current.to_string()),
                to_subcategory: sub.subcategory,
                confidence: sub.confidence,
                reasons: sub.reasons,
                new_bucket: None,
            },
            Some(sub) => PolicyOutcome::keep(
                input,
                sub.confidence,
                held.unwrap_or_else(|| "below_threshold:fill_subcategory".to_string()),
            ),
            None => PolicyOutcome::keep(input, 0.0, held.unwrap_or_else(|| "no_subcategory_table".to_string())),
        },
        Some(cur_sub) => {
            if let Some(sub) = &inferred {
                let differs = sub.subcategory.as_deref().is_some_and(|k| k != cur_sub);
                if differs && sub.confidence >= t.move_subcategory {
                    return PolicyOutcome {
                        kind: DecisionKind::MoveSubcategory,
                        to_category: Some(current.to_string()),
                        to_subcategory: sub.subcategory.clone(),
                        confidence: sub.confidence,
                        reasons: sub.reasons.clone(),
                        new_bucket: None,
                    };
                }
            }

            // 5) an invalid value nobody could confidently replace
            if !input.subcategory_allowed {
                return PolicyOutcome {
                    kind: DecisionKind::InvalidSubcategory,
                    to_category: Some(current.to_string()),
                    to_subcategory: None,
                    confidence: inferred.as_ref().map_or(0.0, |s| s.confidence),
                    reasons: vec![format!("invalid_subcategory:{current}:{cur_sub}")],
                    new_bucket: None,
                };
            }

            let confidence = inferred.as_ref().map_or(0.0, |s| s.confidence);
            let reason = match (&held, &inferred) {
                (Some(h), _) => h.clone(),
                (None, Some(s)) if s.subcategory.as_deref() == Some(cur_sub) => "subcategory_confirmed".to_string(),
                (None, Some(_)) => "below_threshold:move_subcategory".to_string(),
                (None, None) => "no_subcategory_table".to_string(),
            };
            PolicyOutcome::keep(input, confidence, reason)
        }
    }
}

/// One item's final classification, shared by the report and apply paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationDecision {
    pub item_id: String,
    pub from_category: Option<String>,
    pub from_subcategory: Option<String>,
    pub to_category: Option<String>,
    pub to_subcategory: Option<String>,
    pub confidence: f32,
    pub kind: DecisionKind,
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Aggregator input only; never written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_bucket: Option<NewBucket>,
}

impl ClassificationDecision {
    pub fn from_outcome(
        item_id: impl Into<String>,
        from_category: Option<String>,
        from_subcategory: Option<String>,
        o: PolicyOutcome,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            from_category,
            from_subcategory,
            to_category: o.to_category,
            to_subcategory: o.to_subcategory,
            confidence: clamp01(o.confidence),
            kind: o.kind,
            reasons: o.reasons,
            new_bucket: o.new_bucket,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BucketKind;

    fn sug(cat: &str, conf: f32) -> Suggestion {
        Suggestion::new(cat, conf).with_reason(format!("detector:{cat}"))
    }

    fn sub_of(key: &'static str, conf: f32) -> impl Fn(&str) -> Option<Suggestion> {
        move |cat: &str| {
            Some(
                Suggestion::new(cat, conf)
                    .with_subcategory(key)
                    .with_reason(format!("subcategory:{key}")),
            )
        }
    }

    fn no_sub(_: &str) -> Option<Suggestion> {
        None
    }

    fn input<'a>(cat: Option<&'a str>, sub: Option<&'a str>, s: Option<&'a Suggestion>) -> PolicyInput<'a> {
        PolicyInput {
            category: cat,
            subcategory: sub,
            category_is_canonical: cat.is_some_and(|c| c != "tops"),
            subcategory_allowed: true,
            suggestion: s,
        }
    }

    #[test]
    fn remap_needs_no_threshold() {
        let s = sug("camisetas_y_tops", 0.1);
        let o = decide(&input(Some("tops"), None, Some(&s)), &Thresholds::default(), sub_of("camisetas", 0.6));
        assert_eq!(o.kind, DecisionKind::RemapCategory);
        assert_eq!(o.to_category.as_deref(), Some("camisetas_y_tops"));
        assert_eq!(o.to_subcategory.as_deref(), Some("camisetas"));
        assert!(!o.reasons.is_empty());

        let o = decide(&input(None, None, Some(&s)), &Thresholds::default(), no_sub);
        assert_eq!(o.kind, DecisionKind::RemapCategory);
    }

    #[test]
    fn unresolved_legacy_is_kept() {
        let o = decide(&input(Some("tops"), None, None), &Thresholds::default(), no_sub);
        assert_eq!(o.kind, DecisionKind::Keep);
        assert_eq!(o.to_category.as_deref(), Some("tops"));
    }

    #[test]
    fn suggestion_subcategory_wins_over_inference() {
        let s = sug("joyeria", 0.99).with_subcategory("tobilleras");
        let o = decide(&input(Some("calzado"), None, Some(&s)), &Thresholds::default(), sub_of("aretes", 0.95));
        assert_eq!(o.kind, DecisionKind::MoveCategory);
        assert_eq!(o.to_subcategory.as_deref(), Some("tobilleras"));
    }

    #[test]
    fn move_category_threshold_is_inclusive() {
        let t = Thresholds::default();
        let at = sug("joyeria", t.move_category);
        let o = decide(&input(Some("calzado"), Some("tenis"), Some(&at)), &t, sub_of("tenis", 0.9));
        assert_eq!(o.kind, DecisionKind::MoveCategory);

        let below = sug("joyeria", t.move_category - 0.01);
        let o = decide(&input(Some("calzado"), Some("tenis"), Some(&below)), &t, sub_of("tenis", 0.9));
        assert_eq!(o.kind, DecisionKind::Keep);
        assert_eq!(o.to_category.as_deref(), Some("calzado"));
        assert!(o.reasons[0].starts_with("below_threshold:move_category"));
    }

    #[test]
    fn fill_threshold_is_inclusive() {
        let t = Thresholds::default();
        let o = decide(&input(Some("calzado"), None, None), &t, sub_of("botas", t.fill_subcategory));
        assert_eq!(o.kind, DecisionKind::FillSubcategory);
        assert_eq!(o.to_subcategory.as_deref(), Some("botas"));

        let o = decide(&input(Some("calzado"), Some(""), None), &t, sub_of("botas", t.fill_subcategory - 0.01));
        assert_eq!(o.kind, DecisionKind::Keep);
    }

    #[test]
    fn move_subcategory_threshold_is_inclusive() {
        let t = Thresholds::default();
        let o = decide(&input(Some("calzado"), Some("tenis"), None), &t, sub_of("botas", t.move_subcategory));
        assert_eq!(o.kind, DecisionKind::MoveSubcategory);

        let o = decide(&input(Some("calzado"), Some("tenis"), None), &t, sub_of("botas", t.move_subcategory - 0.01));
        assert_eq!(o.kind, DecisionKind::Keep);

        let o = decide(&input(Some("calzado"), Some("botas"), None), &t, sub_of("botas", 0.99));
        assert_eq!(o.kind, DecisionKind::Keep);
        assert_eq!(o.reasons, vec!["subcategory_confirmed".to_string()]);
    }

    #[test]
    fn new_bucket_in_same_category_is_a_candidate() {
        let s = sug("ropa_interior", 0.88).with_new_bucket(NewBucket {
            kind: BucketKind::Subcategory,
            key: "trajes_de_bano".into(),
            label: "Trajes de baño".into(),
        });
        let o = decide(&input(Some("ropa_interior"), Some("panties"), Some(&s)), &Thresholds::default(), no_sub);
        assert_eq!(o.kind, DecisionKind::NewSubcategoryCandidate);
        assert_eq!(o.to_subcategory.as_deref(), Some("panties"));
        assert!(o.new_bucket.is_some());
        assert!(!DecisionKind::NewSubcategoryCandidate.writes());
    }

    #[test]
    fn invalid_subcategory_when_nothing_replaces_it() {
        let mut i = input(Some("calzado"), Some("pantuflas"), None);
        i.subcategory_allowed = false;
        let o = decide(&i, &Thresholds::default(), sub_of("otros_calzado", 0.6));
        assert_eq!(o.kind, DecisionKind::InvalidSubcategory);
        assert_eq!(o.to_subcategory, None);
        assert_eq!(o.reasons, vec!["invalid_subcategory:calzado:pantuflas".to_string()]);

        // a confident replacement moves instead of flagging
        let o = decide(&i, &Thresholds::default(), sub_of("botas", 0.92));
        assert_eq!(o.kind, DecisionKind::MoveSubcategory);
    }

    #[test]
    fn thresholds_are_clamped() {
        let t = Thresholds::new(1.4, -1.0, f32::NAN);
        assert_eq!(t, Thresholds::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn kinds_serialize_snake_case() {
        for k in DecisionKind::ALL {
            assert_eq!(serde_json::to_value(k).unwrap(), k.as_str());
        }
    }
}
