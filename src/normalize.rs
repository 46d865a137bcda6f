// src/normalize.rs
//! Text normalization shared by every matcher, rule table and legacy lookup.
//!
//! Pipeline (single-sourced so detectors and tables can never drift):
//! 1) HTML entity decode (scraped titles carry `&amp;`, `&ntilde;`, ...)
//! 2) Unicode lowercase
//! 3) NFKD decomposition + combining-mark removal (`ñ` → `n`, `á` → `a`)
//! 4) Every non-alphanumeric run collapses to a single space
//! 5) Trim
//!
//! The output only contains lowercase alphanumerics separated by single
//! spaces, which makes the function idempotent.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalize free text for matching. `None` and empty input yield `""`.
pub fn normalize(input: Option<&str>) -> String {
    let Some(raw) = input else {
        return String::new();
    };
    if raw.is_empty() {
        return String::new();
    }

    let decoded = html_escape::decode_html_entities(raw);
    let lowered = decoded.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for ch in lowered.nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            // NFKD may surface uppercase compatibility forms (e.g. Ⅸ → IX).
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Shorthand for the common `&str` case.
pub fn normalize_text(input: &str) -> String {
    normalize(Some(input))
}

/// Normalize an identifier (category/subcategory value stored on a record):
/// same pipeline as [`normalize`], tokens joined with `_`.
/// `"Ropa Interior & Pijamas"` → `"ropa_interior_pijamas"`.
pub fn normalize_key(input: Option<&str>) -> String {
    normalize(input).replace(' ', "_")
}

/// Join an item's title and description into one normalized matching text.
pub fn item_text(title: &str, description: Option<&str>) -> String {
    match description {
        Some(d) if !d.trim().is_empty() => normalize_text(&format!("{title} {d}")),
        _ => normalize_text(title),
    }
}
