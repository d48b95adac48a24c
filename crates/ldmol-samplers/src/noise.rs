//! Seeded Gaussian noise
//!
//! Noise is drawn on the host from a caller-owned RNG so that a run is
//! reproducible across backends for a fixed seed.

use burn::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Standard-normal tensor of `shape` drawn from `rng`
pub fn standard_normal<B: Backend, const D: usize, R: Rng + ?Sized>(
    shape: [usize; D],
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, D> {
    let len: usize = shape.iter().product();
    let values: Vec<f32> = (0..len).map(|_| StandardNormal.sample(rng)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}
