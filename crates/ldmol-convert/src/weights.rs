//! Scoped layer loading
//!
//! PyTorch checkpoints name parameters by dotted module paths
//! (`blocks.3.attn.qkv.weight`). A [`WeightScope`] carries the current prefix
//! so model loaders can mirror their module tree.

use burn::module::Param;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use ldmol_core::{LayerNorm, RmsNorm};

use crate::loader::{LoadError, SafeTensorFile};

/// A view into a [`SafeTensorFile`] rooted at a module prefix
#[derive(Clone)]
pub struct WeightScope<'a> {
    file: &'a SafeTensorFile,
    prefix: String,
}

impl<'a> WeightScope<'a> {
    /// Scope at the root of the file
    pub fn root(file: &'a SafeTensorFile) -> Self {
        Self {
            file,
            prefix: String::new(),
        }
    }

    /// Descend into a child module
    pub fn push(&self, name: impl std::fmt::Display) -> Self {
        Self {
            file: self.file,
            prefix: self.key(&name.to_string()),
        }
    }

    /// Fully qualified parameter name
    pub fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.file.contains(&self.key(name))
    }

    /// Load a tensor with an exact expected shape
    pub fn tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        shape: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>, LoadError> {
        self.file.load_f32_checked(&self.key(name), shape, device)
    }

    /// Load `{name}.weight` / `{name}.bias` into a burn [`Linear`]
    ///
    /// PyTorch stores `[out, in]`; burn expects `[in, out]`.
    pub fn linear<B: Backend>(
        &self,
        name: &str,
        in_features: usize,
        out_features: usize,
        bias: bool,
        device: &B::Device,
    ) -> Result<Linear<B>, LoadError> {
        let scope = self.push(name);
        let weight: Tensor<B, 2> = scope.tensor("weight", [out_features, in_features], device)?;

        let mut linear = LinearConfig::new(in_features, out_features)
            .with_bias(bias)
            .init(device);
        linear.weight = Param::from_tensor(weight.transpose());
        if bias {
            let b: Tensor<B, 1> = scope.tensor("bias", [out_features], device)?;
            linear.bias = Some(Param::from_tensor(b));
        }
        Ok(linear)
    }

    /// Load `{name}.weight` into a burn [`Embedding`]
    pub fn embedding<B: Backend>(
        &self,
        name: &str,
        num_embeddings: usize,
        dim: usize,
        device: &B::Device,
    ) -> Result<Embedding<B>, LoadError> {
        let weight: Tensor<B, 2> = self.push(name).tensor("weight", [num_embeddings, dim], device)?;
        let mut embedding = EmbeddingConfig::new(num_embeddings, dim).init(device);
        embedding.weight = Param::from_tensor(weight);
        Ok(embedding)
    }

    /// Load an affine layer norm (`weight`, `bias`)
    pub fn layer_norm<B: Backend>(
        &self,
        name: &str,
        size: usize,
        eps: f64,
        device: &B::Device,
    ) -> Result<LayerNorm<B>, LoadError> {
        let scope = self.push(name);
        Ok(LayerNorm::from_weight_bias(
            scope.tensor("weight", [size], device)?,
            scope.tensor("bias", [size], device)?,
            eps,
        ))
    }

    /// Load an RMS norm (`weight` only)
    pub fn rms_norm<B: Backend>(
        &self,
        name: &str,
        size: usize,
        eps: f64,
        device: &B::Device,
    ) -> Result<RmsNorm<B>, LoadError> {
        let weight = self.push(name).tensor("weight", [size], device)?;
        Ok(RmsNorm::from_weight(weight, eps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::write_fixture;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_scope_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        write_fixture(&path, &[("x", vec![1], vec![0.0])]);
        let file = SafeTensorFile::open(&path).unwrap();

        let root = WeightScope::root(&file);
        assert_eq!(root.key("x"), "x");
        let block = root.push("blocks").push(3);
        assert_eq!(block.key("attn.qkv.weight"), "blocks.3.attn.qkv.weight");
    }

    #[test]
    fn test_linear_is_transposed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        // torch Linear(2 -> 3): weight [3, 2]
        write_fixture(
            &path,
            &[
                ("proj.weight", vec![3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
                ("proj.bias", vec![3], vec![0.0, 0.0, 10.0]),
            ],
        );
        let file = SafeTensorFile::open(&path).unwrap();
        let device = Default::default();

        let linear: Linear<TestBackend> = WeightScope::root(&file)
            .linear("proj", 2, 3, true, &device)
            .unwrap();
        let x = Tensor::<TestBackend, 2>::from_floats([[2.0, 5.0]], &device);
        let y: Vec<f32> = linear.forward(x).into_data().to_vec().unwrap();
        assert_eq!(y, vec![2.0, 5.0, 17.0]);
    }

    #[test]
    fn test_linear_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        write_fixture(&path, &[("proj.weight", vec![2, 2], vec![0.0; 4])]);
        let file = SafeTensorFile::open(&path).unwrap();
        let device = Default::default();

        let result = WeightScope::root(&file).linear::<TestBackend>("proj", 2, 3, false, &device);
        assert!(matches!(result, Err(LoadError::ShapeMismatch { .. })));
    }
}
