//! Description/target dataset
//!
//! One sample per non-empty line: `target<TAB>description`. Targets may
//! carry the autoencoder's `[CLS]` prefix, which is stripped.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line} has no tab separating target and description: {content:?}")]
    MissingTab { line: usize, content: String },
}

/// A description and the molecule it describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub description: String,
    pub target: String,
}

/// Parse one dataset line; `line_no` is 1-based and only used in errors
pub fn parse_sample(line_no: usize, line: &str) -> Result<Sample, DatasetError> {
    let (target, description) = line.split_once('\t').ok_or_else(|| DatasetError::MissingTab {
        line: line_no,
        content: line.to_string(),
    })?;
    Ok(Sample {
        description: description.trim_end_matches(['\r', '\n']).to_string(),
        target: target.replace("[CLS]", "").trim().to_string(),
    })
}

/// Samples held in file order
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::parse(&content)?;
        tracing::info!(path = %path.display(), samples = dataset.len(), "loaded dataset");
        Ok(dataset)
    }

    pub fn parse(content: &str) -> Result<Self, DatasetError> {
        let samples = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| parse_sample(i + 1, line))
            .collect::<Result<_, _>>()?;
        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Split `indices` into batches of at most `batch_size` samples
    ///
    /// The last batch may be short. Out-of-range indices are skipped.
    pub fn batches<'a>(&'a self, indices: &'a [usize], batch_size: usize) -> impl Iterator<Item = Vec<&'a Sample>> + 'a {
        indices
            .chunks(batch_size.max(1))
            .map(move |chunk| chunk.iter().filter_map(|&i| self.samples.get(i)).collect())
    }
}
