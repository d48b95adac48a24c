//! Conditioning encoder adapter
//!
//! Turns raw descriptions into fixed-shape [`ConditioningEmbedding`]s and
//! keeps the unconditional embedding used for classifier-free guidance.

use burn::prelude::*;
use burn::tensor::Int;
use ldmol_core::ConditioningEmbedding;
use ldmol_samplers::UnconditionalSource;

use crate::tokenizer::{PromptTokenizer, TokenizerError};

/// Prompt used for the unconditional embedding
///
/// The misspelling matches what the diffusion checkpoints were trained with.
pub const NULL_PROMPT: &str = "no dsecription.";

/// Token-level text encoder
pub trait TextEncoder<B: Backend> {
    /// `ids`, `mask`: `[N, L]` -> hidden states `[N, L, D]`
    fn forward(&self, ids: Tensor<B, 2, Int>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3>;

    /// Hidden size `D`
    fn embed_dim(&self) -> usize;
}

/// Tokenizer + encoder pair with a fixed description length
pub struct ConditioningEncoder<B: Backend, E: TextEncoder<B>> {
    tokenizer: PromptTokenizer,
    encoder: E,
    max_length: usize,
    device: B::Device,
    null: ConditioningEmbedding<B>,
}

impl<B: Backend, E: TextEncoder<B>> ConditioningEncoder<B, E> {
    /// Wraps the encoder and computes the null embedding once
    pub fn new(
        tokenizer: PromptTokenizer,
        encoder: E,
        max_length: usize,
        device: &B::Device,
    ) -> Result<Self, TokenizerError> {
        let null = embed(&tokenizer, &encoder, &[NULL_PROMPT], max_length, device)?;
        tracing::debug!(max_length, dim = null.dim(), "computed null conditioning");
        Ok(Self {
            tokenizer,
            encoder,
            max_length,
            device: device.clone(),
            null,
        })
    }

    /// Embed a batch of descriptions as `[N, L, D]` vectors and `[N, L]` mask
    pub fn encode<S: AsRef<str>>(&self, texts: &[S]) -> Result<ConditioningEmbedding<B>, TokenizerError> {
        embed(&self.tokenizer, &self.encoder, texts, self.max_length, &self.device)
    }

    /// The cached unconditional embedding (`N = 1`)
    pub fn null_embedding(&self) -> &ConditioningEmbedding<B> {
        &self.null
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn embed_dim(&self) -> usize {
        self.encoder.embed_dim()
    }

    pub fn tokenizer(&self) -> &PromptTokenizer {
        &self.tokenizer
    }
}

impl<B: Backend, E: TextEncoder<B>> UnconditionalSource<B> for ConditioningEncoder<B, E> {
    fn null_batch(&self, n: usize) -> ConditioningEmbedding<B> {
        self.null.repeat(n)
    }
}

fn embed<B: Backend, E: TextEncoder<B>, S: AsRef<str>>(
    tokenizer: &PromptTokenizer,
    encoder: &E,
    texts: &[S],
    max_length: usize,
    device: &B::Device,
) -> Result<ConditioningEmbedding<B>, TokenizerError> {
    let batch = tokenizer.encode_batch(texts, max_length)?;
    let (ids, mask) = batch.to_tensors::<B>(device);
    let vectors = encoder.forward(ids, mask.clone());
    Ok(ConditioningEmbedding::new(vectors, mask))
}
