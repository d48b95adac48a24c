//! Sinusoidal embeddings
//!
//! Computed on the host and uploaded, since both depend only on integer
//! positions and step indices.

use burn::prelude::*;

/// Sinusoidal timestep embedding `[batch, dim]`, cosine half first
///
/// `freq_i = exp(-ln(max_period) * i / (dim / 2))`. Odd `dim` gets a zero
/// pad column.
pub fn timestep_embedding<B: Backend>(
    timesteps: &[f32],
    dim: usize,
    max_period: f32,
    device: &B::Device,
) -> Tensor<B, 2> {
    let half = dim / 2;
    let freqs: Vec<f32> = (0..half)
        .map(|i| (-(max_period.ln()) * i as f32 / half as f32).exp())
        .collect();

    let mut data = Vec::with_capacity(timesteps.len() * dim);
    for &t in timesteps {
        data.extend(freqs.iter().map(|f| (t * f).cos()));
        data.extend(freqs.iter().map(|f| (t * f).sin()));
        if dim % 2 == 1 {
            data.push(0.0);
        }
    }
    Tensor::from_data(TensorData::new(data, [timesteps.len(), dim]), device)
}

/// Fixed 1-D sin-cos position table `[len, dim]`, sine half first
pub fn sincos_position_embedding<B: Backend>(
    len: usize,
    dim: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let half = dim / 2;
    let omega: Vec<f64> = (0..half)
        .map(|i| 1.0 / 10000f64.powf(i as f64 / half as f64))
        .collect();

    let mut data = Vec::with_capacity(len * dim);
    for pos in 0..len {
        data.extend(omega.iter().map(|w| (pos as f64 * w).sin() as f32));
        data.extend(omega.iter().map(|w| (pos as f64 * w).cos() as f32));
    }
    Tensor::from_data(TensorData::new(data, [len, dim]), device)
}
