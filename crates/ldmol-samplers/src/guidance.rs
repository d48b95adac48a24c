//! Classifier-free guidance
//!
//! The conditional and unconditional passes share one denoiser call on a
//! doubled batch: rows `0..N` carry the text conditioning, rows `N..2N` the
//! null conditioning.
//!
//! ```text
//! eps = eps_uncond + w * (eps_cond - eps_uncond)
//! ```
//!
//! Guidance touches only the first `C` (noise) channels. Learned-variance
//! channels pass through unchanged.

use burn::prelude::*;

use crate::SamplerError;

/// Guidance weight `w >= 1.0`
///
/// `w == 1.0` means plain conditional sampling: no doubled batch and no
/// unconditional pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceScale(f64);

impl GuidanceScale {
    pub fn new(w: f64) -> Result<Self, SamplerError> {
        if !w.is_finite() || w < 1.0 {
            return Err(SamplerError::InvalidGuidanceScale(w));
        }
        Ok(Self(w))
    }

    /// Scale that disables guidance
    pub fn disabled() -> Self {
        Self(1.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_enabled(&self) -> bool {
        self.0 > 1.0
    }
}

/// `[N, ...]` -> `[2N, ...]` by stacking the batch onto itself
pub fn double_batch<B: Backend>(half: Tensor<B, 4>) -> Tensor<B, 4> {
    Tensor::cat(vec![half.clone(), half], 0)
}

/// First `N` rows of a `[2N, ...]` batch
pub fn take_conditional_half<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, c, s, w] = x.dims();
    let half = batch / 2;
    x.slice([0..half, 0..c, 0..s, 0..w])
}

/// Apply guidance to a doubled-batch prediction
///
/// `output` is `[2N, C_out, S, W]`; the first `eps_channels` channels are
/// noise. Returns the same shape with the guided noise in both halves and
/// the remaining channels untouched.
pub fn guided_output<B: Backend>(output: Tensor<B, 4>, scale: GuidanceScale, eps_channels: usize) -> Tensor<B, 4> {
    let [batch, channels, s, w] = output.dims();
    let half = batch / 2;

    let eps = output.clone().slice([0..batch, 0..eps_channels, 0..s, 0..w]);
    let cond = eps.clone().slice([0..half, 0..eps_channels, 0..s, 0..w]);
    let uncond = eps.slice([half..batch, 0..eps_channels, 0..s, 0..w]);

    let guided = uncond.clone() + (cond - uncond) * scale.value();
    let eps = double_batch(guided);

    if channels == eps_channels {
        eps
    } else {
        let rest = output.slice([0..batch, eps_channels..channels, 0..s, 0..w]);
        Tensor::cat(vec![eps, rest], 1)
    }
}
