// src/config.rs
//! Operational parameters of one run, read from `RECONCILE_*` env vars.
//!
//! Unparsable values never abort a run: they log a warning and fall back to
//! the default. Thresholds are clamped to `[0, 1]`.

use std::str::FromStr;
use tracing::warn;

use crate::decision::{
    Thresholds, DEFAULT_FILL_SUBCATEGORY_THRESHOLD, DEFAULT_MOVE_CATEGORY_THRESHOLD,
    DEFAULT_MOVE_SUBCATEGORY_THRESHOLD,
};
use crate::migrate::{DEFAULT_BATCH_SIZE, MIN_BATCH_SIZE};
use crate::store::Scope;

pub const ENV_SEED: &str = "RECONCILE_SEED";
pub const ENV_SAMPLE_SIZE: &str = "RECONCILE_SAMPLE_SIZE";
pub const ENV_ENRICHED_ONLY: &str = "RECONCILE_ENRICHED_ONLY";
pub const ENV_MOVE_CATEGORY_THRESHOLD: &str = "RECONCILE_MOVE_CATEGORY_THRESHOLD";
pub const ENV_MOVE_SUBCATEGORY_THRESHOLD: &str = "RECONCILE_MOVE_SUBCATEGORY_THRESHOLD";
pub const ENV_FILL_SUBCATEGORY_THRESHOLD: &str = "RECONCILE_FILL_SUBCATEGORY_THRESHOLD";
pub const ENV_SCOPE_CATEGORY: &str = "RECONCILE_SCOPE_CATEGORY";
pub const ENV_SCOPE_SUBCATEGORY: &str = "RECONCILE_SCOPE_SUBCATEGORY";
pub const ENV_APPLY: &str = "RECONCILE_APPLY";
pub const ENV_INCLUDE_NULL: &str = "RECONCILE_INCLUDE_NULL";
pub const ENV_BATCH_SIZE: &str = "RECONCILE_BATCH_SIZE";
pub const ENV_MAX_ROWS: &str = "RECONCILE_MAX_ROWS";

pub const DEFAULT_SAMPLE_SIZE: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub seed: String,
    pub sample_size: usize,
    pub enriched_only: bool,
    pub thresholds: Thresholds,
    pub scope: Option<Scope>,
    /// `false` = dry run.
    pub apply: bool,
    pub include_null_category: bool,
    pub batch_size: usize,
    pub max_rows: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: today(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            enriched_only: false,
            thresholds: Thresholds::default(),
            scope: None,
            apply: false,
            include_null_category: true,
            batch_size: DEFAULT_BATCH_SIZE,
            max_rows: None,
        }
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

impl RunConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key → value source (env, a map in tests, ...).
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let d = Self::default();

        let thresholds = Thresholds::new(
            threshold(&value, ENV_MOVE_CATEGORY_THRESHOLD, DEFAULT_MOVE_CATEGORY_THRESHOLD),
            threshold(&value, ENV_MOVE_SUBCATEGORY_THRESHOLD, DEFAULT_MOVE_SUBCATEGORY_THRESHOLD),
            threshold(&value, ENV_FILL_SUBCATEGORY_THRESHOLD, DEFAULT_FILL_SUBCATEGORY_THRESHOLD),
        );

        let scope = value(ENV_SCOPE_CATEGORY).map(|category| Scope {
            category,
            subcategory: value(ENV_SCOPE_SUBCATEGORY),
        });
        if scope.is_none() && value(ENV_SCOPE_SUBCATEGORY).is_some() {
            warn!(target: "reconcile", "{ENV_SCOPE_SUBCATEGORY} ignored without {ENV_SCOPE_CATEGORY}");
        }

        let batch_size = parsed(&value, ENV_BATCH_SIZE, d.batch_size);
        if batch_size < MIN_BATCH_SIZE {
            warn!(target: "reconcile", batch_size, min = MIN_BATCH_SIZE, "batch size raised to floor");
        }

        Self {
            seed: value(ENV_SEED).unwrap_or(d.seed),
            sample_size: parsed(&value, ENV_SAMPLE_SIZE, d.sample_size),
            enriched_only: flag(&value, ENV_ENRICHED_ONLY, d.enriched_only),
            thresholds,
            scope,
            apply: flag(&value, ENV_APPLY, d.apply),
            include_null_category: flag(&value, ENV_INCLUDE_NULL, d.include_null_category),
            batch_size: batch_size.max(MIN_BATCH_SIZE),
            max_rows: value(ENV_MAX_ROWS).and_then(|v| match v.parse::<usize>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(target: "reconcile", key = ENV_MAX_ROWS, value = %v, "unparsable; no row cap");
                    None
                }
            }),
        }
    }
}

fn parsed<T, F>(value: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match value(key) {
        None => default,
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!(target: "reconcile", key, value = %raw, %default, "unparsable; using default");
            default
        }),
    }
}

/// `f32::from_str` accepts `NaN` and `inf`; neither is a usable bar.
fn threshold<F>(value: &F, key: &str, default: f32) -> f32
where
    F: Fn(&str) -> Option<String>,
{
    let t = parsed(value, key, default);
    if t.is_finite() {
        t
    } else {
        warn!(target: "reconcile", key, value = %t, %default, "non-finite threshold; using default");
        default
    }
}

fn flag<F>(value: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match value(key).map(|v| v.to_ascii_lowercase()) {
        None => default,
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(target: "reconcile", key, value = %v, default, "unparsable flag; using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> RunConfig {
        let m: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunConfig::from_lookup(|k| m.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = from(&[]);
        assert_eq!(c.sample_size, 200);
        assert_eq!(c.thresholds, Thresholds::default());
        assert_eq!(c.batch_size, 300);
        assert!(!c.apply);
        assert!(c.include_null_category);
        assert!(c.scope.is_none());
        assert_eq!(c.seed.len(), 10);
    }

    #[test]
    fn overrides_and_clamps() {
        let c = from(&[
            (ENV_SEED, "qa-1"),
            (ENV_SAMPLE_SIZE, "25"),
            (ENV_APPLY, "true"),
            (ENV_INCLUDE_NULL, "0"),
            (ENV_MOVE_CATEGORY_THRESHOLD, "1.5"),
            (ENV_FILL_SUBCATEGORY_THRESHOLD, "0.8"),
            (ENV_BATCH_SIZE, "10"),
            (ENV_MAX_ROWS, "1000"),
            (ENV_SCOPE_CATEGORY, "calzado"),
            (ENV_SCOPE_SUBCATEGORY, "botas"),
        ]);
        assert_eq!(c.seed, "qa-1");
        assert_eq!(c.sample_size, 25);
        assert!(c.apply);
        assert!(!c.include_null_category);
        assert_eq!(c.thresholds.move_category, 1.0);
        assert_eq!(c.thresholds.fill_subcategory, 0.8);
        assert_eq!(c.batch_size, MIN_BATCH_SIZE);
        assert_eq!(c.max_rows, Some(1000));
        assert_eq!(
            c.scope,
            Some(Scope {
                category: "calzado".into(),
                subcategory: Some("botas".into())
            })
        );
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let c = from(&[
            (ENV_SAMPLE_SIZE, "many"),
            (ENV_APPLY, "maybe"),
            (ENV_MOVE_SUBCATEGORY_THRESHOLD, "high"),
            (ENV_MAX_ROWS, "-3"),
            (ENV_SCOPE_SUBCATEGORY, "botas"),
        ]);
        assert_eq!(c.sample_size, DEFAULT_SAMPLE_SIZE);
        assert!(!c.apply);
        assert_eq!(c.thresholds.move_subcategory, DEFAULT_MOVE_SUBCATEGORY_THRESHOLD);
        assert_eq!(c.max_rows, None);
        assert!(c.scope.is_none());
    }

    #[test]
    fn non_finite_thresholds_fall_back_to_defaults() {
        let c = from(&[
            (ENV_MOVE_CATEGORY_THRESHOLD, "NaN"),
            (ENV_MOVE_SUBCATEGORY_THRESHOLD, "inf"),
            (ENV_FILL_SUBCATEGORY_THRESHOLD, "-infinity"),
        ]);
        assert_eq!(c.thresholds, Thresholds::default());
    }

    #[serial_test::serial]
    #[test]
    fn reads_process_env() {
        std::env::set_var(ENV_SEED, "from-env");
        std::env::set_var(ENV_APPLY, "1");
        let c = RunConfig::from_env();
        std::env::remove_var(ENV_SEED);
        std::env::remove_var(ENV_APPLY);
        assert_eq!(c.seed, "from-env");
        assert!(c.apply);
    }
}
