//! Shared append-only output log
//!
//! One line per generated molecule, `target<TAB>generated`. Ranks append
//! whole batches under an exclusive advisory lock so lines never interleave.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::DistError;

/// One `(target, generated)` pair destined for the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub target: String,
    pub generated: String,
}

impl OutputRecord {
    pub fn new(target: impl Into<String>, generated: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            generated: generated.into(),
        }
    }

    /// Log line including the trailing newline
    pub fn to_line(&self) -> String {
        format!("{}\t{}\n", sanitize(&self.target), sanitize(&self.generated))
    }
}

/// Replace field separators that would break the line format
fn sanitize(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

#[derive(Debug, Clone)]
pub struct OutputLog {
    path: PathBuf,
}

impl OutputLog {
    /// Create or truncate the log; done once by rank 0 before the first barrier
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DistError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(DistError::io(parent))?;
        }
        File::create(&path).map_err(DistError::io(&path))?;
        Ok(Self { path })
    }

    /// Attach to a log created by another rank
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of records with a single locked write
    pub fn append(&self, records: &[OutputRecord]) -> Result<(), DistError> {
        if records.is_empty() {
            return Ok(());
        }
        let payload: String = records.iter().map(OutputRecord::to_line).collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(DistError::io(&self.path))?;
        file.lock_exclusive().map_err(DistError::io(&self.path))?;
        let written = file.write_all(payload.as_bytes()).and_then(|_| file.flush());
        let unlocked = FileExt::unlock(&file);
        written.map_err(DistError::io(&self.path))?;
        unlocked.map_err(DistError::io(&self.path))?;

        tracing::debug!(path = %self.path.display(), records = records.len(), "appended records");
        Ok(())
    }

    /// Raw lines currently in the log, without trailing newlines
    pub fn read_lines(&self) -> Result<Vec<String>, DistError> {
        let content = fs::read_to_string(&self.path).map_err(DistError::io(&self.path))?;
        Ok(content.lines().map(str::to_string).collect())
    }

    /// Parsed log; a line without a TAB yields an empty `generated`
    pub fn read_records(&self) -> Result<Vec<OutputRecord>, DistError> {
        Ok(self
            .read_lines()?
            .iter()
            .map(|line| match line.split_once('\t') {
                Some((target, generated)) => OutputRecord::new(target, generated),
                None => OutputRecord::new(line.as_str(), ""),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = OutputLog::create(dir.path().join("out/generated.txt")).unwrap();
        log.append(&[OutputRecord::new("CCO", "CCN"), OutputRecord::new("C", "")])
            .unwrap();
        log.append(&[OutputRecord::new("c1ccccc1", "c1ccccc1")]).unwrap();

        let lines = log.read_lines().unwrap();
        assert_eq!(lines, vec!["CCO\tCCN", "C\t", "c1ccccc1\tc1ccccc1"]);
        assert_eq!(log.read_records().unwrap()[1], OutputRecord::new("C", ""));
    }

    #[test]
    fn test_create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated.txt");
        OutputLog::create(&path).unwrap().append(&[OutputRecord::new("C", "C")]).unwrap();
        let log = OutputLog::create(&path).unwrap();
        assert!(log.read_lines().unwrap().is_empty());
    }

    #[test]
    fn test_separators_are_sanitized() {
        let record = OutputRecord::new("C\tC", "O\nO");
        assert_eq!(record.to_line(), "C C\tO O\n");
    }
}
