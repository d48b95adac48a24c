//! Scoring of generated molecules against their targets
//!
//! Reads the shared output log, keeps the first line per target molecule,
//! canonicalizes both sides and computes string and fingerprint metrics.

pub mod metrics;
pub mod records;
pub mod report;

use std::path::PathBuf;

use ldmol_chem::ChemError;
use ldmol_dist::DistError;
use thiserror::Error;

pub use metrics::{FingerprintMetrics, StringMetrics, corpus_bleu, levenshtein};
pub use records::{LogRecord, Prediction, ScoredPair, canonicalize_records, dedup_by_target, parse_line};
pub use report::{Aggregator, EvaluationReport};

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("target #{index} is not a valid molecule: {target:?} ({source})")]
    InvalidTarget {
        index: usize,
        target: String,
        #[source]
        source: ChemError,
    },

    #[error("failed to read output log: {0}")]
    Log(#[from] DistError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
