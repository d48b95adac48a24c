//! Denoiser contract
//!
//! The sampler drives any network that maps a noisy latent, a timestep and
//! text conditioning to a noise prediction.

use burn::prelude::*;
use ldmol_core::ConditioningEmbedding;

/// Noise-prediction network over `[B, C, S, 1]` latents
pub trait Denoiser<B: Backend> {
    /// Latent channels `C`
    fn in_channels(&self) -> usize;

    /// Whether the output carries `C` extra variance channels (`2C` total)
    fn learns_sigma(&self) -> bool;

    /// Predict noise for a batch
    ///
    /// * `x` - noisy latents `[B, C, S, 1]`
    /// * `timesteps` - original training timestep per row (`len == B`)
    /// * `cond` - conditioning with batch `B`
    ///
    /// Returns `[B, C, S, 1]`, or `[B, 2C, S, 1]` when [`Self::learns_sigma`].
    fn forward(
        &self,
        x: Tensor<B, 4>,
        timesteps: &[usize],
        cond: &ConditioningEmbedding<B>,
    ) -> Tensor<B, 4>;

    /// Channels in the prediction
    fn out_channels(&self) -> usize {
        if self.learns_sigma() {
            2 * self.in_channels()
        } else {
            self.in_channels()
        }
    }
}

/// Source of the unconditional ("null") embedding for guidance
///
/// Only consulted when guidance is enabled.
pub trait UnconditionalSource<B: Backend> {
    /// Null conditioning replicated to `n` rows
    fn null_batch(&self, n: usize) -> ConditioningEmbedding<B>;
}

impl<B: Backend> UnconditionalSource<B> for ConditioningEmbedding<B> {
    fn null_batch(&self, n: usize) -> ConditioningEmbedding<B> {
        self.repeat(n)
    }
}
