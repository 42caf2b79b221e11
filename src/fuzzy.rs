use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

/// Distinct, non-empty reference values seen in one batch (city names).
///
/// Built once before resolution starts and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    terms: BTreeSet<String>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        Self { terms }
    }

    /// Keeps only spellings seen at least `min_support` times, so a one-off
    /// typo is not trusted as a correction target for itself.
    pub fn from_observations<I, S>(observed: I, min_support: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for term in observed {
            let term = term.as_ref().trim();
            if !term.is_empty() {
                *counts.entry(term.to_string()).or_default() += 1;
            }
        }
        let terms = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_support.max(1))
            .map(|(term, _)| term)
            .collect();
        Self { terms }
    }

    pub fn extend<I, S>(&mut self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.terms.extend(
            terms
                .into_iter()
                .map(|term| term.as_ref().trim().to_string())
                .filter(|term| !term.is_empty()),
        );
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains(term)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }
}

/// Similarity on a 0..=100 scale derived from normalized Levenshtein distance.
pub fn similarity(left: &str, right: &str) -> f64 {
    strsim::normalized_levenshtein(&left.to_lowercase(), &right.to_lowercase()) * 100.0
}

/// Snaps `token` to the closest vocabulary member when its similarity meets
/// `threshold`; otherwise returns the token unchanged. Ties keep the first
/// maximum in vocabulary order.
pub fn correct(token: &str, vocabulary: &Vocabulary, threshold: u8) -> String {
    if token.is_empty() || vocabulary.is_empty() || vocabulary.contains(token) {
        return token.to_string();
    }

    let mut best: Option<(&str, f64)> = None;
    for candidate in vocabulary.iter() {
        let score = similarity(token, candidate);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }

    match best {
        Some((candidate, score)) if score >= f64::from(threshold) => {
            trace!(token, candidate, score, "fuzzy corrected token");
            candidate.to_string()
        }
        _ => token.to_string(),
    }
}
