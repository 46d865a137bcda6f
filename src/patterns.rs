// src/patterns.rs
//! Matching primitives over normalized text.
//!
//! Two matcher kinds:
//! - **word**: a single token bounded by string start/end or whitespace on both
//!   sides, so `camisa` never fires inside `camiseta`.
//! - **phrase**: an ordered word sequence with flexible internal whitespace and
//!   the same boundary rule (`bota recta`, `tarjeta de regalo`).
//!
//! Patterns go through the same normalizer as the text before compiling, so a
//! config entry like `pantalón` matches `pantalon`. A `PatternSet` compiles
//! all of its terms into one alternation and reports which term fired, which
//! feeds the `matched:<term>` reasons.

use regex::Regex;

use crate::normalize::normalize_text;

/// One pattern term, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Word(String),
    Phrase(Vec<String>),
}

impl Matcher {
    /// Build a word matcher. Multi-token input is demoted to a phrase.
    pub fn word(raw: &str) -> Option<Self> {
        let norm = normalize_text(raw);
        let mut toks = norm.split(' ').filter(|t| !t.is_empty());
        let first = toks.next()?;
        match toks.next() {
            None => Some(Matcher::Word(first.to_string())),
            Some(_) => Self::phrase(raw),
        }
    }

    /// Build a phrase matcher from whitespace separated words.
    pub fn phrase(raw: &str) -> Option<Self> {
        let words: Vec<String> = normalize_text(raw)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        match words.len() {
            0 => None,
            1 => Some(Matcher::Word(words[0].clone())),
            _ => Some(Matcher::Phrase(words)),
        }
    }

    /// Human readable form (used in reasons).
    pub fn label(&self) -> String {
        match self {
            Matcher::Word(w) => w.clone(),
            Matcher::Phrase(ws) => ws.join(" "),
        }
    }

    fn regex_body(&self) -> String {
        match self {
            Matcher::Word(w) => regex::escape(w),
            Matcher::Phrase(ws) => ws
                .iter()
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join(r"\s+"),
        }
    }
}

/// A compiled set of words/phrases evaluated as one regex.
#[derive(Debug, Clone)]
pub struct PatternSet {
    terms: Vec<Matcher>,
    re: Option<Regex>,
}

impl PatternSet {
    /// Compile `words` and `phrases`. Empty input gives a set that never matches.
    pub fn compile(words: &[String], phrases: &[String]) -> anyhow::Result<Self> {
        let mut terms: Vec<Matcher> = Vec::with_capacity(words.len() + phrases.len());
        for w in words {
            match Matcher::word(w) {
                Some(m) => terms.push(m),
                None => anyhow::bail!("pattern `{w}` is empty after normalization"),
            }
        }
        for p in phrases {
            match Matcher::phrase(p) {
                Some(m) => terms.push(m),
                None => anyhow::bail!("phrase `{p}` is empty after normalization"),
            }
        }
        terms.dedup();

        if terms.is_empty() {
            return Ok(Self { terms, re: None });
        }

        // Longer terms first so the reported match is the most specific one.
        let mut bodies: Vec<(usize, String)> = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.regex_body()))
            .collect();
        bodies.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
        let alternation = bodies
            .into_iter()
            .map(|(_, b)| b)
            .collect::<Vec<_>>()
            .join("|");

        let pattern = format!(r"(?:^|\s)(?P<term>{alternation})(?:\s|$)");
        let re = Regex::new(&pattern)
            .map_err(|e| anyhow::anyhow!("pattern set regex error: {e}"))?;
        Ok(Self {
            terms,
            re: Some(re),
        })
    }

    /// Convenience constructor for static term lists.
    pub fn of_words(words: &[&str]) -> anyhow::Result<Self> {
        let owned: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        Self::compile(&owned, &[])
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn terms(&self) -> &[Matcher] {
        &self.terms
    }

    /// Return the matched term (normalized, single-spaced) if any.
    /// `text` must already be normalized.
    pub fn find(&self, text: &str) -> Option<String> {
        let re = self.re.as_ref()?;
        let caps = re.captures(text)?;
        let m = caps.name("term")?;
        Some(
            m.as_str()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.as_ref().is_some_and(|re| re.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str], phrases: &[&str]) -> PatternSet {
        let w: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        let p: Vec<String> = phrases.iter().map(|s| s.to_string()).collect();
        PatternSet::compile(&w, &p).expect("compile")
    }

    #[test]
    fn word_requires_token_boundaries() {
        let s = set(&["camisa"], &[]);
        assert!(s.is_match("camisa blanca"));
        assert!(s.is_match("linda camisa"));
        assert!(s.is_match("camisa"));
        assert!(!s.is_match("camiseta blanca"));
        assert!(!s.is_match("sobrecamisa"));
    }

    #[test]
    fn phrase_allows_flexible_whitespace() {
        let s = set(&[], &["bota  recta"]);
        assert!(s.is_match("pantalon bota recta negro"));
        assert!(s.is_match("pantalon bota   recta"));
        assert!(!s.is_match("pantalon botarecta"));
        assert!(!s.is_match("bota negra recta"));
    }

    #[test]
    fn patterns_are_normalized() {
        let s = set(&["Pantalón"], &["Tarjeta de Regalo"]);
        assert!(s.is_match("pantalon bota recta"));
        assert_eq!(s.find("mi tarjeta de regalo"), Some("tarjeta de regalo".into()));
    }

    #[test]
    fn reports_most_specific_term() {
        let s = set(&["top"], &["crop top"]);
        assert_eq!(s.find("lindo crop top negro"), Some("crop top".into()));
        assert_eq!(s.find("top negro"), Some("top".into()));
    }

    #[test]
    fn empty_set_never_matches() {
        let s = set(&[], &[]);
        assert!(s.is_empty());
        assert!(!s.is_match("anything"));
        assert_eq!(s.find(""), None);
    }

    #[test]
    fn rejects_blank_pattern() {
        assert!(PatternSet::compile(&["  ".to_string()], &[]).is_err());
    }
}
