//! Atom-level SMILES tokenizer
//!
//! Splits SMILES with the usual bracket-atom/two-letter-halogen regex and
//! maps tokens through a line-per-token vocabulary file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use thiserror::Error;

pub const PAD: &str = "[PAD]";
pub const UNK: &str = "[UNK]";
pub const CLS: &str = "[CLS]";
pub const SEP: &str = "[SEP]";
pub const MASK: &str = "[MASK]";

/// Longest token sequence the decoder produces, `[CLS]` included
pub const MAX_LEN: usize = 127;

const SMILES_PATTERN: &str =
    r"(\[[^\]]+\]|<|Br?|Cl?|N|O|S|P|F|I|b|c|n|o|s|p|\(|\)|\.|=|#|-|\+|\\|/|:|~|@|\?|>|\*|\$|%[0-9]{2}|[0-9])";

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vocabulary has no {0} token")]
    MissingSpecial(&'static str),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Ids of the special tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub pad: u32,
    pub unk: u32,
    pub cls: u32,
    pub sep: u32,
    pub mask: Option<u32>,
}

/// Regex SMILES tokenizer with a fixed vocabulary
pub struct SmilesTokenizer {
    vocab: Vec<String>,
    ids: HashMap<String, u32>,
    special: SpecialTokens,
    pattern: Regex,
    max_len: usize,
}

impl SmilesTokenizer {
    /// Load a vocabulary file with one token per line
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let content = fs::read_to_string(path)?;
        Self::from_tokens(content.lines().map(str::trim_end).filter(|l| !l.is_empty()))
    }

    /// Build from tokens in id order
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, TokenizerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vocab: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let ids: HashMap<String, u32> = vocab
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();

        let lookup = |name: &'static str| ids.get(name).copied().ok_or(TokenizerError::MissingSpecial(name));
        let special = SpecialTokens {
            pad: lookup(PAD)?,
            unk: lookup(UNK)?,
            cls: lookup(CLS)?,
            sep: lookup(SEP)?,
            mask: ids.get(MASK).copied(),
        };

        Ok(Self {
            vocab,
            ids,
            special,
            pattern: Regex::new(SMILES_PATTERN)?,
            max_len: MAX_LEN,
        })
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn special(&self) -> SpecialTokens {
        self.special
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.vocab.get(id as usize).map(String::as_str)
    }

    fn is_special(&self, id: u32) -> bool {
        let s = self.special;
        id == s.pad || id == s.unk || id == s.cls || id == s.sep || Some(id) == s.mask
    }

    /// Split a SMILES string into atom-level tokens
    pub fn tokenize<'a>(&self, smiles: &'a str) -> Vec<&'a str> {
        self.pattern.find_iter(smiles).map(|m| m.as_str()).collect()
    }

    /// `[CLS] tokens [SEP]`, truncated to `max_len` with `[SEP]` kept last
    pub fn encode(&self, smiles: &str) -> Vec<u32> {
        let mut ids = vec![self.special.cls];
        ids.extend(
            self.tokenize(smiles)
                .into_iter()
                .map(|t| self.ids.get(t).copied().unwrap_or(self.special.unk)),
        );
        ids.truncate(self.max_len.saturating_sub(1));
        ids.push(self.special.sep);
        ids
    }

    /// Concatenate tokens up to the first `[SEP]`
    ///
    /// Other special tokens and ids outside the vocabulary are skipped.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .take_while(|&&id| id != self.special.sep)
            .filter(|&&id| !self.is_special(id))
            .filter_map(|&id| self.token(id))
            .collect()
    }
}
