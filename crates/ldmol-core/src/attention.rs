//! Attention primitives
//!
//! Multi-head attention helpers shared by the T5 encoder, the DiT
//! cross-attention and the BERT decoder. Masks are expressed as additive
//! biases broadcast over `[batch, heads, q_len, k_len]`.

use burn::prelude::*;

/// Additive value for masked positions
///
/// Large enough to zero a softmax entry, small enough to stay finite in f16.
pub const MASK_VALUE: f32 = -1.0e4;

/// Split the last dimension into heads
///
/// `[batch, seq, heads * head_dim]` -> `[batch, heads, seq, head_dim]`
pub fn split_heads<B: Backend>(x: Tensor<B, 3>, num_heads: usize) -> Tensor<B, 4> {
    let [batch, seq_len, hidden] = x.dims();
    let head_dim = hidden / num_heads;
    x.reshape([batch, seq_len, num_heads, head_dim]).swap_dims(1, 2)
}

/// Inverse of [`split_heads`]
pub fn merge_heads<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, heads, seq_len, head_dim] = x.dims();
    x.swap_dims(1, 2).reshape([batch, seq_len, heads * head_dim])
}

/// Builds an additive bias from a key-padding mask
///
/// `mask` is `[batch, k_len]` with `true` for positions that may be attended.
/// Returns `[batch, 1, 1, k_len]` with 0 for kept keys and [`MASK_VALUE`]
/// for padding.
pub fn key_padding_bias<B: Backend>(mask: Tensor<B, 2, Bool>) -> Tensor<B, 4> {
    let [batch, k_len] = mask.dims();
    let keep = mask.float();
    let bias = (keep.ones_like() - keep) * MASK_VALUE;
    bias.reshape([batch, 1, 1, k_len])
}

/// Causal bias `[1, 1, len, len]` (upper triangle masked)
pub fn causal_bias<B: Backend>(len: usize, device: &B::Device) -> Tensor<B, 4> {
    let mut data = vec![0.0f32; len * len];
    for i in 0..len {
        for j in (i + 1)..len {
            data[i * len + j] = MASK_VALUE;
        }
    }
    Tensor::from_data(TensorData::new(data, [1, 1, len, len]), device)
}

/// Scaled dot-product attention over pre-split heads
///
/// # Arguments
///
/// * `q` - `[batch, heads, q_len, head_dim]`
/// * `k`, `v` - `[batch, heads, k_len, head_dim]`
/// * `bias` - optional additive bias broadcastable to `[batch, heads, q_len, k_len]`
/// * `scale` - multiplier applied to the raw scores (T5 uses 1.0)
pub fn scaled_dot_product<B: Backend>(
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
    bias: Option<Tensor<B, 4>>,
    scale: f32,
) -> Tensor<B, 4> {
    let scores = q.matmul(k.swap_dims(2, 3)) * scale;
    let scores = match bias {
        Some(b) => scores + b,
        None => scores,
    };
    let weights = burn::tensor::activation::softmax(scores, 3);
    weights.matmul(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_split_merge_heads() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random(
            [2, 5, 12],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let heads = split_heads(x.clone(), 3);
        assert_eq!(heads.dims(), [2, 3, 5, 4]);

        let merged = merge_heads(heads);
        let a: Vec<f32> = x.into_data().to_vec().unwrap();
        let b: Vec<f32> = merged.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_padding_keys_get_no_weight() {
        let device = Default::default();
        let q = Tensor::<TestBackend, 4>::ones([1, 1, 1, 2], &device);
        let k = Tensor::<TestBackend, 4>::ones([1, 1, 3, 2], &device);
        // Values: key 0 -> 1.0, key 1 -> 2.0, key 2 (padding) -> 100.0
        let v = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, 1.0], [2.0, 2.0], [100.0, 100.0]]]],
            &device,
        );
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![true, true, false], [1, 3]),
            &device,
        );

        let out = scaled_dot_product(q, k, v, Some(key_padding_bias(mask)), 1.0);
        let out: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!((out[0] - 1.5).abs() < 1e-3, "got {}", out[0]);
    }

    #[test]
    fn test_causal_bias_masks_future() {
        let device = Default::default();
        let bias = causal_bias::<TestBackend>(3, &device);
        let data: Vec<f32> = bias.into_data().to_vec().unwrap();
        assert_eq!(data[0], 0.0);
        assert_eq!(data[1], MASK_VALUE);
        assert_eq!(data[3], 0.0);
        assert_eq!(data[5], MASK_VALUE);
        assert_eq!(data[8], 0.0);
    }
}
