// src/detect/mod.rs
//! Detection layer: category resolver, subcategory resolver, legacy fallback.
//!
//! Every resolver speaks the same `Suggestion` shape and is pure: identical
//! normalized text always yields an identical suggestion.

pub mod category;
pub mod legacy;
pub mod subcategory;

use serde::{Deserialize, Serialize};

pub use category::{CategoryResolver, Detector};
pub use legacy::LegacyFallback;
pub use subcategory::SubcategoryResolver;

/// Kind of a bucket that does not exist in the canonical tree yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Category,
    Subcategory,
}

impl BucketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BucketKind::Category => "category",
            BucketKind::Subcategory => "subcategory",
        }
    }
}

/// Informational only: fed to the aggregator, never written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBucket {
    pub kind: BucketKind,
    pub key: String,
    pub label: String,
}

/// Output of any detector or rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// Certainty in `[0.0, 1.0]`; only used to gate decision kinds.
    pub confidence: f32,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_bucket: Option<NewBucket>,
}

impl Suggestion {
    pub fn new(category: impl Into<String>, confidence: f32) -> Self {
        Self {
            category: category.into(),
            subcategory: None,
            confidence: clamp01(confidence),
            reasons: Vec::new(),
            new_bucket: None,
        }
    }

    pub fn with_subcategory(mut self, sub: impl Into<String>) -> Self {
        self.subcategory = Some(sub.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn with_new_bucket(mut self, nb: NewBucket) -> Self {
        self.new_bucket = Some(nb);
        self
    }
}

pub(crate) fn clamp01(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
