//! End-of-run aggregation over the shared output log

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ldmol_dist::OutputLog;
use serde::{Deserialize, Serialize};

use crate::EvalError;
use crate::metrics::{FingerprintMetrics, StringMetrics};
use crate::records::{canonicalize_records, dedup_by_target, parse_line, target_key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Non-empty lines read from the log
    pub lines: usize,
    /// Records kept after deduplication by target
    pub records: usize,
    pub string: StringMetrics,
    pub fingerprint: FingerprintMetrics,
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records: {} ({} lines)", self.records, self.lines)?;
        writeln!(f, "BLEU: {:.3}", self.string.bleu)?;
        writeln!(f, "Exact: {:.3}", self.string.exact_match)?;
        writeln!(f, "Levenshtein: {:.3}", self.string.levenshtein)?;
        writeln!(f, "MACCS FTS: {:.3}", self.fingerprint.maccs_fts)?;
        writeln!(f, "RDK FTS: {:.3}", self.fingerprint.rdk_fts)?;
        writeln!(f, "Morgan FTS: {:.3}", self.fingerprint.morgan_fts)?;
        write!(f, "Validity: {:.3}", self.fingerprint.validity)
    }
}

/// Reads, deduplicates and scores an output log; rank 0 only
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    json_output: Option<PathBuf>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write the report as pretty JSON to `path`
    pub fn with_json_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.json_output = Some(path.into());
        self
    }

    pub fn run(&self, log_path: impl AsRef<Path>) -> Result<EvaluationReport, EvalError> {
        let lines = OutputLog::open(log_path).read_lines()?;
        let report = self.evaluate_lines(&lines)?;

        if let Some(path) = &self.json_output {
            let json = serde_json::to_string_pretty(&report)?;
            fs::write(path, json).map_err(|source| EvalError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(report)
    }

    /// Score raw log lines; blank lines are ignored
    pub fn evaluate_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<EvaluationReport, EvalError> {
        let records: Vec<_> = lines
            .iter()
            .map(AsRef::as_ref)
            .filter(|l| !l.trim().is_empty())
            .map(parse_line)
            .collect();
        let line_count = records.len();

        let records = dedup_by_target(records, target_key);
        tracing::info!(lines = line_count, records = records.len(), "deduplicated output log");

        let pairs = canonicalize_records(&records)?;
        Ok(EvaluationReport {
            lines: line_count,
            records: pairs.len(),
            string: StringMetrics::compute(&pairs),
            fingerprint: FingerprintMetrics::compute(&pairs),
        })
    }
}
