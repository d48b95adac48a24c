//! Root Mean Square Layer Normalization
//!
//! T5 calls this `T5LayerNorm`: no mean subtraction and no bias.

use burn::prelude::*;

/// RMS normalization
///
/// ```text
/// y = x / sqrt(mean(x^2) + eps) * weight
/// ```
#[derive(Module, Debug)]
pub struct RmsNorm<B: Backend> {
    weight: Tensor<B, 1>,
    eps: f64,
}

impl<B: Backend> RmsNorm<B> {
    /// Creates a new RMSNorm with unit weight
    pub fn new(size: usize, eps: f64, device: &B::Device) -> Self {
        Self {
            weight: Tensor::ones([size], device),
            eps,
        }
    }

    /// Creates RMSNorm from a loaded weight
    pub fn from_weight(weight: Tensor<B, 1>, eps: f64) -> Self {
        Self { weight, eps }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let mean_sq = x.clone().powf_scalar(2.0).mean_dim(D - 1);
        let x_norm = x / (mean_sq + self.eps).sqrt();
        x_norm * self.weight.clone().unsqueeze()
    }
}
