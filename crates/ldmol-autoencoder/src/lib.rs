//! Latent Decoding for ldmol
//!
//! Turns denoised latents back into SMILES strings with the autoencoder's
//! BERT decoder.
//!
//! # Modules
//!
//! - [`tokenizer`] - Regex SMILES tokenizer over a fixed vocabulary
//! - [`predictor`] - [`TokenPredictor`], the contract every decoder model meets
//! - [`bert`] - BERT decoder with latent cross-attention and its loader
//! - [`strategy`] - Greedy, beam and top-k token selection
//! - [`decoder`] - [`LatentDecoder`], latent tensors in, strings out

pub mod bert;
pub mod decoder;
pub mod predictor;
pub mod strategy;
pub mod tokenizer;

use thiserror::Error;

pub use bert::{BertDecoderConfig, BertSmilesDecoder, load_bert_decoder};
pub use decoder::LatentDecoder;
pub use predictor::TokenPredictor;
pub use strategy::DecodeStrategy;
pub use tokenizer::{SmilesTokenizer, SpecialTokens, TokenizerError};

/// Failure while decoding a batch
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("could not read logits back to host: {0}")]
    Data(String),
}

/// Failure while loading the decoder
#[derive(Error, Debug)]
pub enum AutoencoderError {
    #[error(transparent)]
    Load(#[from] ldmol_convert::LoadError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error("vocabulary has {tokenizer} tokens but the decoder predicts {model}")]
    VocabMismatch { tokenizer: usize, model: usize },
}
