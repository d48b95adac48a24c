//! Log lines, deduplication and canonical pairs

use std::collections::HashSet;
use std::hash::Hash;

use ldmol_chem::canonicalize;

use crate::EvalError;

/// Placeholder scored in place of a missing generated field
pub const MISSING_PREDICTION: &str = "Q";

/// One parsed line of the output log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub target: String,
    /// `None` when the line carries no usable generated field
    pub generated: Option<String>,
}

/// Parse `target<TAB>generated`
///
/// Surrounding whitespace is stripped first. A line without exactly one
/// TAB-separated generated field yields `generated: None`.
pub fn parse_line(line: &str) -> LogRecord {
    let line = line.trim();
    match line.split_once('\t') {
        Some((target, generated)) if !generated.contains('\t') => LogRecord {
            target: target.to_string(),
            generated: Some(generated.to_string()),
        },
        Some((target, _)) => LogRecord {
            target: target.to_string(),
            generated: None,
        },
        None => LogRecord {
            target: line.to_string(),
            generated: None,
        },
    }
}

/// Keep the first record per key, preserving order
pub fn dedup_by_target<T, K, F>(records: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    records.into_iter().filter(|r| seen.insert(key(r))).collect()
}

/// A generated structure after canonicalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    Valid { canonical: String },
    /// Kept as written so string metrics still count it
    Invalid { raw: String },
}

impl Prediction {
    pub fn from_generated(generated: Option<&str>) -> Self {
        match generated {
            None => Prediction::Invalid {
                raw: MISSING_PREDICTION.to_string(),
            },
            Some(raw) => match canonicalize(raw) {
                Ok(canonical) => Prediction::Valid { canonical },
                Err(_) => Prediction::Invalid { raw: raw.to_string() },
            },
        }
    }

    /// String compared against the target by the string metrics
    pub fn text(&self) -> &str {
        match self {
            Prediction::Valid { canonical } => canonical,
            Prediction::Invalid { raw } => raw,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Prediction::Valid { .. })
    }
}

/// Canonical target with its prediction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredPair {
    pub target: String,
    pub prediction: Prediction,
}

/// Canonicalize every target and prediction
///
/// Fails on the first target that is not a valid molecule; invalid
/// predictions become [`Prediction::Invalid`] so counts stay aligned.
pub fn canonicalize_records(records: &[LogRecord]) -> Result<Vec<ScoredPair>, EvalError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let target = canonicalize(&record.target).map_err(|source| EvalError::InvalidTarget {
                index,
                target: record.target.clone(),
                source,
            })?;
            Ok(ScoredPair {
                target,
                prediction: Prediction::from_generated(record.generated.as_deref()),
            })
        })
        .collect()
}

/// Dedup key for a target: its canonical form, or the raw text if it has none
pub fn target_key(record: &LogRecord) -> String {
    canonicalize(&record.target).unwrap_or_else(|_| record.target.clone())
}
