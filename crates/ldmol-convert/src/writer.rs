//! Write f32 tensors to a .safetensors file
//!
//! Used to export weights and to build checkpoints in loader tests.

use std::collections::HashMap;
use std::path::Path;

use burn::prelude::*;
use safetensors::Dtype;
use safetensors::tensor::TensorView;

use crate::loader::LoadError;

/// Accumulates named f32 tensors, then serializes them in one go
#[derive(Debug, Default, Clone)]
pub struct SafeTensorWriter {
    entries: Vec<(String, Vec<usize>, Vec<u8>)>,
}

impl SafeTensorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add raw values with their shape
    pub fn add(&mut self, name: impl Into<String>, shape: &[usize], values: &[f32]) -> &mut Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.into(), shape.to_vec(), bytes));
        self
    }

    /// Add a burn tensor, converting its elements to f32
    pub fn add_tensor<B: Backend, const D: usize>(
        &mut self,
        name: impl Into<String>,
        tensor: &Tensor<B, D>,
    ) -> &mut Self {
        let shape = tensor.dims();
        let values: Vec<f32> = tensor
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap_or_default();
        self.add(name, &shape, &values)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to `path`
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        let mut views = HashMap::with_capacity(self.entries.len());
        for (name, shape, bytes) in &self.entries {
            views.insert(name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes)?);
        }
        let out = safetensors::serialize(&views, &None::<HashMap<String, String>>)?;
        std::fs::write(path, out).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SafeTensorFile;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_written_tensors_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.safetensors");
        let device = Default::default();
        let t = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);

        let mut writer = SafeTensorWriter::new();
        writer.add("bias", &[2], &[0.5, -0.5]).add_tensor("weight", &t);
        writer.write(&path).unwrap();

        let file = SafeTensorFile::open(&path).unwrap();
        assert_eq!(file.shape("weight"), Some(&[2, 2][..]));
        assert_eq!(file.read_f32("bias").unwrap(), vec![0.5, -0.5]);
    }
}
