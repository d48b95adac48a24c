//! Text-to-molecule metrics
//!
//! String metrics compare canonical SMILES character by character;
//! fingerprint metrics average Tanimoto similarity over valid predictions.

use std::collections::HashMap;

use ldmol_chem::fingerprint::{MORGAN_BITS, MORGAN_RADIUS, PATH_BITS, PATH_MAX_BONDS};
use ldmol_chem::{from_smiles, morgan, path, structural_keys};
use serde::{Deserialize, Serialize};

use crate::records::{Prediction, ScoredPair};

const BLEU_ORDER: usize = 4;

fn ngram_counts<T: Eq + std::hash::Hash + Clone>(tokens: &[T], n: usize) -> HashMap<&[T], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

/// Corpus BLEU-4 with uniform weights, one reference per hypothesis and no
/// smoothing
///
/// Returns 0.0 when any n-gram order has no match.
pub fn corpus_bleu<T: Eq + std::hash::Hash + Clone>(references: &[Vec<T>], hypotheses: &[Vec<T>]) -> f64 {
    let mut matched = [0usize; BLEU_ORDER];
    let mut total = [0usize; BLEU_ORDER];
    let (mut ref_len, mut hyp_len) = (0usize, 0usize);

    for (reference, hypothesis) in references.iter().zip(hypotheses) {
        ref_len += reference.len();
        hyp_len += hypothesis.len();
        for n in 1..=BLEU_ORDER {
            let ref_counts = ngram_counts(reference, n);
            for (gram, count) in ngram_counts(hypothesis, n) {
                matched[n - 1] += count.min(ref_counts.get(gram).copied().unwrap_or(0));
            }
            total[n - 1] += hypothesis.len().saturating_sub(n - 1);
        }
    }

    if hyp_len == 0 || matched.iter().any(|&m| m == 0) {
        return 0.0;
    }
    let log_precision: f64 = (0..BLEU_ORDER)
        .map(|i| (matched[i] as f64 / total[i] as f64).ln() / BLEU_ORDER as f64)
        .sum();
    let brevity = if hyp_len < ref_len {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    } else {
        1.0
    };
    brevity * log_precision.exp()
}

/// Edit distance over Unicode scalar values
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StringMetrics {
    pub bleu: f64,
    pub exact_match: f64,
    pub levenshtein: f64,
    pub validity: f64,
}

impl StringMetrics {
    pub fn compute(pairs: &[ScoredPair]) -> Self {
        if pairs.is_empty() {
            return Self {
                bleu: 0.0,
                exact_match: 0.0,
                levenshtein: 0.0,
                validity: 0.0,
            };
        }
        let n = pairs.len() as f64;
        let references: Vec<Vec<char>> = pairs.iter().map(|p| p.target.chars().collect()).collect();
        let hypotheses: Vec<Vec<char>> = pairs.iter().map(|p| p.prediction.text().chars().collect()).collect();

        let exact = pairs
            .iter()
            .filter(|p| matches!(&p.prediction, Prediction::Valid { canonical } if *canonical == p.target))
            .count();
        let distance: usize = pairs
            .iter()
            .map(|p| levenshtein(p.prediction.text(), &p.target))
            .sum();
        let valid = pairs.iter().filter(|p| p.prediction.is_valid()).count();

        Self {
            bleu: corpus_bleu(&references, &hypotheses),
            exact_match: exact as f64 / n,
            levenshtein: distance as f64 / n,
            validity: valid as f64 / n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FingerprintMetrics {
    /// Structural-key (MACCS-style) Tanimoto
    pub maccs_fts: f64,
    /// Path fingerprint Tanimoto
    pub rdk_fts: f64,
    /// Morgan radius-2 Tanimoto
    pub morgan_fts: f64,
    pub validity: f64,
}

impl FingerprintMetrics {
    pub fn compute(pairs: &[ScoredPair]) -> Self {
        let mut sums = [0.0f64; 3];
        let mut scored = 0usize;
        for pair in pairs {
            let Prediction::Valid { canonical } = &pair.prediction else {
                continue;
            };
            let (Ok(target), Ok(predicted)) = (from_smiles(&pair.target), from_smiles(canonical)) else {
                continue;
            };
            sums[0] += structural_keys(&target).tanimoto(&structural_keys(&predicted));
            sums[1] += path(&target, PATH_MAX_BONDS, PATH_BITS)
                .tanimoto(&path(&predicted, PATH_MAX_BONDS, PATH_BITS));
            sums[2] += morgan(&target, MORGAN_RADIUS, MORGAN_BITS)
                .tanimoto(&morgan(&predicted, MORGAN_RADIUS, MORGAN_BITS));
            scored += 1;
        }

        let mean = |sum: f64| if scored == 0 { 0.0 } else { sum / scored as f64 };
        Self {
            maccs_fts: mean(sums[0]),
            rdk_fts: mean(sums[1]),
            morgan_fts: mean(sums[2]),
            validity: if pairs.is_empty() {
                0.0
            } else {
                scored as f64 / pairs.len() as f64
            },
        }
    }
}
