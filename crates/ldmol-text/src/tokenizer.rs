//! Prompt tokenization
//!
//! Wraps a HuggingFace `tokenizer.json` and produces fixed-length id and
//! mask batches for the text encoder.

use std::path::Path;

use burn::prelude::*;
use burn::tensor::Int;
use thiserror::Error;

/// End-of-sequence token used by T5 vocabularies
pub const EOS_TOKEN: &str = "</s>";
/// Padding token used by T5 vocabularies
pub const PAD_TOKEN: &str = "<pad>";

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("failed to load tokenizer {path}: {message}")]
    Load { path: String, message: String },

    #[error("failed to encode {text:?}: {message}")]
    Encode { text: String, message: String },

    #[error("Tokenizer has no pad token {0:?}")]
    MissingPad(String),

    #[error("Sequence length must be at least 1")]
    ZeroLength,
}

/// Fixed-length token ids with their attention mask, row-major `[batch, len]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    pub ids: Vec<u32>,
    pub mask: Vec<bool>,
    pub batch: usize,
    pub len: usize,
}

impl TokenBatch {
    /// Ids of row `i`
    pub fn row(&self, i: usize) -> &[u32] {
        &self.ids[i * self.len..(i + 1) * self.len]
    }

    /// Number of real (unmasked) tokens in row `i`
    pub fn real_tokens(&self, i: usize) -> usize {
        self.mask[i * self.len..(i + 1) * self.len]
            .iter()
            .filter(|m| **m)
            .count()
    }

    /// Upload as `[batch, len]` id and mask tensors
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2, Int>, Tensor<B, 2, Bool>) {
        let ids: Vec<i32> = self.ids.iter().map(|&id| id as i32).collect();
        let ids = Tensor::from_data(TensorData::new(ids, [self.batch, self.len]), device);
        let mask = Tensor::from_data(TensorData::new(self.mask.clone(), [self.batch, self.len]), device);
        (ids, mask)
    }
}

/// Text tokenizer for conditioning prompts
pub struct PromptTokenizer {
    inner: tokenizers::Tokenizer,
    pad_id: u32,
    eos_id: Option<u32>,
}

impl PromptTokenizer {
    /// Load a `tokenizer.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| TokenizerError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::new(inner)
    }

    /// Wrap an already built tokenizer, resolving `<pad>` and `</s>`
    pub fn new(inner: tokenizers::Tokenizer) -> Result<Self, TokenizerError> {
        let pad_id = inner
            .token_to_id(PAD_TOKEN)
            .ok_or_else(|| TokenizerError::MissingPad(PAD_TOKEN.to_string()))?;
        let eos_id = inner.token_to_id(EOS_TOKEN);
        if eos_id.is_none() {
            tracing::warn!("tokenizer has no {} token; prompts are not terminated", EOS_TOKEN);
        }
        Ok(Self {
            inner,
            pad_id,
            eos_id,
        })
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Token ids of `text`, terminated by EOS when the vocabulary has one
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| TokenizerError::Encode {
                text: text.chars().take(64).collect(),
                message: e.to_string(),
            })?;
        let mut ids = encoding.get_ids().to_vec();
        ids.extend(self.eos_id);
        Ok(ids)
    }

    /// Encode every text to exactly `len` tokens
    ///
    /// Long texts are truncated with EOS kept in the last slot; short ones
    /// are right-padded with the pad id and a `false` mask.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S], len: usize) -> Result<TokenBatch, TokenizerError> {
        if len == 0 {
            return Err(TokenizerError::ZeroLength);
        }

        let mut ids = Vec::with_capacity(texts.len() * len);
        let mut mask = Vec::with_capacity(texts.len() * len);
        for text in texts {
            let mut row = self.encode(text.as_ref())?;
            if row.len() > len {
                row.truncate(len);
                if let Some(eos) = self.eos_id {
                    row[len - 1] = eos;
                }
            }
            let real = row.len();
            row.resize(len, self.pad_id);
            ids.extend(row);
            mask.extend((0..len).map(|i| i < real));
        }

        Ok(TokenBatch {
            ids,
            mask,
            batch: texts.len(),
            len,
        })
    }
}
