//! Conditioning tensors passed from the text encoder to the denoiser

use burn::prelude::*;

/// Per-token text embeddings plus their padding mask
///
/// `vectors` is `[N, L, D]`, `mask` is `[N, L]` with `true` on real tokens.
/// Both always share `N` and `L`.
#[derive(Debug, Clone)]
pub struct ConditioningEmbedding<B: Backend> {
    pub vectors: Tensor<B, 3>,
    pub mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> ConditioningEmbedding<B> {
    /// Pairs vectors with a mask, checking that batch and length agree
    pub fn new(vectors: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Self {
        let [n, l, _] = vectors.dims();
        assert_eq!(
            mask.dims(),
            [n, l],
            "conditioning mask must match vectors [N, L]"
        );
        Self { vectors, mask }
    }

    pub fn batch_size(&self) -> usize {
        self.vectors.dims()[0]
    }

    pub fn seq_len(&self) -> usize {
        self.vectors.dims()[1]
    }

    pub fn dim(&self) -> usize {
        self.vectors.dims()[2]
    }

    /// Replicates every row `n` times along the batch axis
    pub fn repeat(&self, n: usize) -> Self {
        Self {
            vectors: self.vectors.clone().repeat_dim(0, n),
            mask: self.mask.clone().repeat_dim(0, n),
        }
    }

    /// Stacks `self` over `other` along the batch axis
    pub fn concat(&self, other: &Self) -> Self {
        Self::new(
            Tensor::cat(vec![self.vectors.clone(), other.vectors.clone()], 0),
            Tensor::cat(vec![self.mask.clone(), other.mask.clone()], 0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_repeat_and_concat() {
        let device = Default::default();
        let single = ConditioningEmbedding::<TestBackend>::new(
            Tensor::ones([1, 4, 8], &device),
            Tensor::<TestBackend, 2, Bool>::from_data(
                TensorData::new(vec![true, true, false, false], [1, 4]),
                &device,
            ),
        );

        let batch = single.repeat(3);
        assert_eq!(batch.vectors.dims(), [3, 4, 8]);
        assert_eq!(batch.mask.dims(), [3, 4]);

        let doubled = batch.concat(&single.repeat(3));
        assert_eq!(doubled.batch_size(), 6);
        assert_eq!(doubled.seq_len(), 4);
        assert_eq!(doubled.dim(), 8);
    }

    #[test]
    #[should_panic(expected = "conditioning mask")]
    fn test_mismatched_mask_rejected() {
        let device = Default::default();
        ConditioningEmbedding::<TestBackend>::new(
            Tensor::ones([2, 4, 8], &device),
            Tensor::<TestBackend, 2, Bool>::from_data(
                TensorData::new(vec![true; 3], [1, 3]),
                &device,
            ),
        );
    }
}
