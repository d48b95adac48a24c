//! Layer normalization
//!
//! Normalizes across the last dimension. DiT blocks use the non-affine
//! variant (modulation supplies scale and shift), BERT uses the affine one.

use burn::prelude::*;

/// Layer normalization module
///
/// ```text
/// y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias
/// ```
///
/// The variance is the biased estimator, matching PyTorch.
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    /// Scale parameter
    pub weight: Tensor<B, 1>,
    /// Shift parameter
    pub bias: Tensor<B, 1>,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl<B: Backend> LayerNorm<B> {
    /// Creates an affine layer norm initialized to identity
    pub fn new(size: usize, eps: f64, device: &B::Device) -> Self {
        Self {
            weight: Tensor::ones([size], device),
            bias: Tensor::zeros([size], device),
            eps,
        }
    }

    /// Creates a layer norm without learned affine parameters
    ///
    /// Same as [`LayerNorm::new`]; kept distinct so loaders know there is
    /// nothing to read for it.
    pub fn without_affine(size: usize, eps: f64, device: &B::Device) -> Self {
        Self::new(size, eps, device)
    }

    /// Creates layer norm from pre-loaded weight and bias
    pub fn from_weight_bias(weight: Tensor<B, 1>, bias: Tensor<B, 1>, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let last_dim = D - 1;
        let mean = x.clone().mean_dim(last_dim);
        let centered = x - mean;
        let var = centered.clone().powf_scalar(2.0).mean_dim(last_dim);

        let x_norm = centered / (var + self.eps).sqrt();
        x_norm * self.weight.clone().unsqueeze() + self.bias.clone().unsqueeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_layernorm_zero_mean_unit_var() {
        let device = Default::default();
        let norm = LayerNorm::<TestBackend>::new(4, 1e-6, &device);

        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0, 4.0]], &device);
        let y: Vec<f32> = norm.forward(x).into_data().to_vec().unwrap();

        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        let var: f32 = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3, "biased variance should be 1, got {}", var);
    }

    #[test]
    fn test_layernorm_shape() {
        let device = Default::default();
        let norm = LayerNorm::<TestBackend>::without_affine(8, 1e-6, &device);
        let x = Tensor::<TestBackend, 3>::zeros([2, 5, 8], &device);
        assert_eq!(norm.forward(x).dims(), [2, 5, 8]);
    }
}
