//! Text Conditioning for ldmol
//!
//! Tokenizes natural-language descriptions, encodes them with a T5 encoder
//! and exposes the result as [`ldmol_core::ConditioningEmbedding`]s.
//!
//! # Modules
//!
//! - [`tokenizer`] - HuggingFace tokenizer wrapper with fixed-length batching
//! - [`t5`] - T5 v1.1 encoder and safetensors loader
//! - [`encoder`] - [`TextEncoder`] trait and the [`ConditioningEncoder`] adapter

pub mod encoder;
pub mod t5;
pub mod tokenizer;

use std::path::PathBuf;

use thiserror::Error;

pub use encoder::{ConditioningEncoder, NULL_PROMPT, TextEncoder};
pub use t5::{T5Config, T5Encoder};
pub use tokenizer::{PromptTokenizer, TokenBatch, TokenizerError};

#[derive(Error, Debug)]
pub enum TextError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Load(#[from] ldmol_convert::LoadError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}
