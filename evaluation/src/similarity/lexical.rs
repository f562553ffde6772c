//! Lexical component: clipped n-gram precision.

use std::collections::HashMap;

/// Highest n-gram order considered.
pub const MAX_ORDER: usize = 4;

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() < n {
        return counts;
    }
    for window in tokens.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

/// Modified precision for order `n`: `Σ min(cand, ref) / Σ cand`.
/// `None` when the candidate has no n-grams of this order.
pub fn modified_precision(reference: &[String], candidate: &[String], n: usize) -> Option<f64> {
    let cand = ngram_counts(candidate, n);
    let total: usize = cand.values().sum();
    if total == 0 {
        return None;
    }
    let refs = ngram_counts(reference, n);
    let clipped: usize = cand
        .iter()
        .map(|(gram, count)| (*count).min(refs.get(gram).copied().unwrap_or(0)))
        .sum();
    Some(clipped as f64 / total as f64)
}

/// Arithmetic mean of the modified precisions for n = 1..=4, over the
/// orders the candidate is long enough to have. 0 for an empty candidate.
pub fn score(reference: &[String], candidate: &[String]) -> f64 {
    let precisions: Vec<f64> = (1..=MAX_ORDER)
        .filter_map(|n| modified_precision(reference, candidate, n))
        .collect();
    if precisions.is_empty() {
        return 0.0;
    }
    precisions.iter().sum::<f64>() / precisions.len() as f64
}
