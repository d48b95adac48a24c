//! Next-token prediction contract used by the decoding strategies

use burn::prelude::*;
use burn::tensor::Int;

/// Autoregressive token model conditioned on a latent
pub trait TokenPredictor<B: Backend> {
    /// Project latents `[N, S, C]` to decoder memory `[N, S, H]`
    fn memory(&self, latent: Tensor<B, 3>) -> Tensor<B, 3>;

    /// Logits `[N, V]` for the token following `tokens` (`[N, T]`)
    fn next_logits(&self, tokens: Tensor<B, 2, Int>, memory: Tensor<B, 3>) -> Tensor<B, 2>;

    /// Vocabulary size `V`
    fn vocab_size(&self) -> usize;
}
