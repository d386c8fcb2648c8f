//! Sentence-level BLEU with "method 4" smoothing.
//!
//! Scores a hypothesis (the agent's candidate action) against a single
//! reference (one admissible command). Orders with no overlapping n-grams
//! are smoothed instead of zeroing the score. A one-token hypothesis cannot
//! be smoothed (`ln(1) = 0`), so its empty orders are left out of the mean.

use std::collections::BTreeMap;

/// Highest n-gram order scored; orders are weighted uniformly.
pub const BLEU_MAX_ORDER: usize = 4;
/// Smoothing constant `k` of method 4.
pub const BLEU_SMOOTHING_K: f64 = 5.0;

/// Clipped n-gram precision for one order, before smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgramPrecision {
    pub matched: usize,
    /// Hypothesis n-gram count, never below 1.
    pub total: usize,
}

/// BLEU of `candidate` against `reference`, both tokenized on whitespace.
pub fn sentence_bleu(reference: &str, candidate: &str) -> f64 {
    let reference: Vec<&str> = reference.split_whitespace().collect();
    let hypothesis: Vec<&str> = candidate.split_whitespace().collect();
    sentence_bleu_tokens(&reference, &hypothesis)
}

pub fn sentence_bleu_tokens(reference: &[&str], hypothesis: &[&str]) -> f64 {
    let precisions: Vec<NgramPrecision> = (1..=BLEU_MAX_ORDER)
        .map(|order| modified_precision(reference, hypothesis, order))
        .collect();

    // No shared unigram means no shared n-gram of any order.
    if precisions[0].matched == 0 {
        return 0.0;
    }

    let hyp_len = hypothesis.len();
    let weight = 1.0 / BLEU_MAX_ORDER as f64;
    let log_sum: f64 = smooth_precisions(&precisions, hyp_len)
        .into_iter()
        .filter(|precision| *precision > 0.0)
        .map(|precision| weight * precision.ln())
        .sum();

    let score = brevity_penalty(reference.len(), hyp_len) * log_sum.exp();
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

pub fn modified_precision(reference: &[&str], hypothesis: &[&str], order: usize) -> NgramPrecision {
    let hypothesis_counts = ngram_counts(hypothesis, order);
    let reference_counts = ngram_counts(reference, order);

    let matched = hypothesis_counts
        .iter()
        .map(|(ngram, count)| (*count).min(reference_counts.get(ngram).copied().unwrap_or(0)))
        .sum();
    let total = hypothesis_counts.values().sum::<usize>().max(1);

    NgramPrecision { matched, total }
}

pub fn brevity_penalty(reference_len: usize, hypothesis_len: usize) -> f64 {
    if hypothesis_len > reference_len {
        1.0
    } else if hypothesis_len == 0 {
        0.0
    } else {
        (1.0 - reference_len as f64 / hypothesis_len as f64).exp()
    }
}

fn smooth_precisions(precisions: &[NgramPrecision], hyp_len: usize) -> Vec<f64> {
    let mut incvnt = 1;
    precisions
        .iter()
        .map(|precision| {
            let total = precision.total as f64;
            if precision.matched > 0 {
                return precision.matched as f64 / total;
            }
            if hyp_len > 1 {
                let numerator =
                    1.0 / (2f64.powi(incvnt) * BLEU_SMOOTHING_K / (hyp_len as f64).ln());
                incvnt += 1;
                numerator / total
            } else {
                0.0
            }
        })
        .collect()
}

fn ngram_counts<'a>(tokens: &'a [&'a str], order: usize) -> BTreeMap<&'a [&'a str], usize> {
    let mut counts = BTreeMap::new();
    if order == 0 {
        return counts;
    }
    for ngram in tokens.windows(order) {
        *counts.entry(ngram).or_insert(0) += 1;
    }
    counts
}
