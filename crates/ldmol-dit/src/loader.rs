//! MolDit weight loading
//!
//! Reads a DiT checkpoint exported with PyTorch parameter names
//! (`blocks.{i}.attn.qkv.weight`, `final_layer.adaLN_modulation.1.weight`, ...).
//! Shapes not fixed by the architecture are inferred from the file.

use std::path::Path;

use burn::prelude::*;
use ldmol_convert::{LoadError, SafeTensorFile, WeightScope};
use ldmol_core::{GeluMlp, LayerNorm};
use thiserror::Error;

use crate::model::{
    CrossAttention, DitBlock, FinalLayer, MolDit, MolDitConfig, NORM_EPS, SelfAttention, TimestepEmbedder,
};

#[derive(Error, Debug)]
pub enum DitLoadError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

fn shape_of(file: &SafeTensorFile, name: &str) -> Result<Vec<usize>, DitLoadError> {
    file.shape(name)
        .map(|s| s.to_vec())
        .ok_or_else(|| DitLoadError::MissingTensor(name.to_string()))
}

fn matrix(file: &SafeTensorFile, name: &str) -> Result<(usize, usize), DitLoadError> {
    match shape_of(file, name)?.as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(DitLoadError::InvalidCheckpoint(format!(
            "{} should be a matrix, got {:?}",
            name, other
        ))),
    }
}

impl MolDitConfig {
    /// Infer the configuration from tensor shapes
    ///
    /// The head count cannot be recovered from the weights and is taken as
    /// given; the latent length comes from `pos_embed` when the checkpoint
    /// stores it.
    pub fn infer(file: &SafeTensorFile, num_heads: usize) -> Result<Self, DitLoadError> {
        let (hidden_size, in_channels) = matrix(file, "x_embedder.weight")?;
        let (_, text_dim) = matrix(file, "y_embedder.weight")?;
        let (_, frequency_embedding_size) = matrix(file, "t_embedder.mlp.0.weight")?;
        let (out_channels, _) = matrix(file, "final_layer.linear.weight")?;
        let (mlp_hidden, _) = matrix(file, "blocks.0.mlp.fc1.weight")?;

        let depth = (0..)
            .take_while(|i| file.contains(&format!("blocks.{}.attn.qkv.weight", i)))
            .count();

        let learn_sigma = match out_channels {
            c if c == in_channels => false,
            c if c == 2 * in_channels => true,
            c => {
                return Err(DitLoadError::InvalidCheckpoint(format!(
                    "final layer emits {} channels for {} input channels",
                    c, in_channels
                )))
            }
        };

        let seq_len = match file.shape("pos_embed") {
            Some([1, len, _]) => *len,
            _ => MolDitConfig::ldmol().seq_len,
        };

        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(DitLoadError::InvalidCheckpoint(format!(
                "hidden size {} is not divisible into {} heads",
                hidden_size, num_heads
            )));
        }

        Ok(Self {
            in_channels,
            seq_len,
            hidden_size,
            depth,
            num_heads,
            mlp_ratio: mlp_hidden as f32 / hidden_size as f32,
            text_dim,
            learn_sigma,
            frequency_embedding_size,
        })
    }
}

/// Load a MolDit from a safetensors checkpoint
///
/// # Arguments
///
/// * `path` - Path to the checkpoint
/// * `num_heads` - Attention heads (16 for the released model)
/// * `device` - Device to load onto
pub fn load_mol_dit<B: Backend, P: AsRef<Path>>(
    path: P,
    num_heads: usize,
    device: &B::Device,
) -> Result<(MolDit<B>, MolDitConfig), DitLoadError> {
    let file = SafeTensorFile::open(path)?;
    let config = MolDitConfig::infer(&file, num_heads)?;
    let model = load_with_config(&file, &config, device)?;
    tracing::info!(
        depth = config.depth,
        hidden = config.hidden_size,
        learn_sigma = config.learn_sigma,
        parameters = file.num_parameters(),
        "loaded MolDit"
    );
    Ok((model, config))
}

/// Build the model from an open file and an explicit configuration
pub fn load_with_config<B: Backend>(
    file: &SafeTensorFile,
    config: &MolDitConfig,
    device: &B::Device,
) -> Result<MolDit<B>, DitLoadError> {
    let root = WeightScope::root(file);
    let h = config.hidden_size;

    let t_mlp = root.push("t_embedder").push("mlp");
    let t_embedder = TimestepEmbedder {
        mlp0: t_mlp.linear("0", config.frequency_embedding_size, h, true, device)?,
        mlp2: t_mlp.linear("2", h, h, true, device)?,
        frequency_size: config.frequency_embedding_size,
    };

    let pos_embed = if root.contains("pos_embed") {
        root.tensor::<B, 3>("pos_embed", [1, config.seq_len, h], device)?
            .reshape([config.seq_len, h])
    } else {
        ldmol_core::sincos_position_embedding(config.seq_len, h, device)
    };

    let mut blocks = Vec::with_capacity(config.depth);
    for i in 0..config.depth {
        blocks.push(load_block(&root.push("blocks").push(i), config, device)?);
    }

    let final_scope = root.push("final_layer");
    let final_layer = FinalLayer {
        norm: LayerNorm::without_affine(h, NORM_EPS, device),
        linear: final_scope.linear("linear", h, config.out_channels(), true, device)?,
        ada_ln_modulation: final_scope.push("adaLN_modulation").linear("1", h, 2 * h, true, device)?,
    };

    Ok(MolDit {
        x_embedder: root.linear("x_embedder", config.in_channels, h, true, device)?,
        t_embedder,
        y_embedder: root.linear("y_embedder", config.text_dim, h, true, device)?,
        pos_embed,
        blocks,
        final_layer,
        in_channels: config.in_channels,
        learn_sigma: config.learn_sigma,
    })
}

fn load_block<B: Backend>(
    scope: &WeightScope<'_>,
    config: &MolDitConfig,
    device: &B::Device,
) -> Result<DitBlock<B>, DitLoadError> {
    let h = config.hidden_size;
    let attn = scope.push("attn");
    let cross = scope.push("cross_attn");
    let mlp = scope.push("mlp");

    Ok(DitBlock {
        norm1: LayerNorm::without_affine(h, NORM_EPS, device),
        attn: SelfAttention {
            qkv: attn.linear("qkv", h, 3 * h, true, device)?,
            proj: attn.linear("proj", h, h, true, device)?,
            num_heads: config.num_heads,
        },
        norm2: LayerNorm::without_affine(h, NORM_EPS, device),
        cross_attn: CrossAttention {
            q: cross.linear("q", h, h, true, device)?,
            kv: cross.linear("kv", h, 2 * h, true, device)?,
            proj: cross.linear("proj", h, h, true, device)?,
            num_heads: config.num_heads,
        },
        norm3: LayerNorm::without_affine(h, NORM_EPS, device),
        mlp: GeluMlp {
            fc1: mlp.linear("fc1", h, config.mlp_hidden(), true, device)?,
            fc2: mlp.linear("fc2", config.mlp_hidden(), h, true, device)?,
            approximate: true,
        },
        ada_ln_modulation: scope.push("adaLN_modulation").linear("1", h, 6 * h, true, device)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ldmol_convert::SafeTensorWriter;

    type TestBackend = NdArray<f32>;

    /// Exports a random-init model under checkpoint names
    fn export(model: &MolDit<TestBackend>, path: &Path, with_pos_embed: bool) {
        let mut w = SafeTensorWriter::new();
        let mut linear = |name: &str, l: &burn::nn::Linear<TestBackend>| {
            w.add_tensor(format!("{}.weight", name), &l.weight.val().transpose());
            if let Some(b) = &l.bias {
                w.add_tensor(format!("{}.bias", name), &b.val());
            }
        };
        linear("x_embedder", &model.x_embedder);
        linear("y_embedder", &model.y_embedder);
        linear("t_embedder.mlp.0", &model.t_embedder.mlp0);
        linear("t_embedder.mlp.2", &model.t_embedder.mlp2);
        for (i, b) in model.blocks.iter().enumerate() {
            linear(&format!("blocks.{i}.attn.qkv"), &b.attn.qkv);
            linear(&format!("blocks.{i}.attn.proj"), &b.attn.proj);
            linear(&format!("blocks.{i}.cross_attn.q"), &b.cross_attn.q);
            linear(&format!("blocks.{i}.cross_attn.kv"), &b.cross_attn.kv);
            linear(&format!("blocks.{i}.cross_attn.proj"), &b.cross_attn.proj);
            linear(&format!("blocks.{i}.mlp.fc1"), &b.mlp.fc1);
            linear(&format!("blocks.{i}.mlp.fc2"), &b.mlp.fc2);
            linear(&format!("blocks.{i}.adaLN_modulation.1"), &b.ada_ln_modulation);
        }
        linear("final_layer.linear", &model.final_layer.linear);
        linear("final_layer.adaLN_modulation.1", &model.final_layer.ada_ln_modulation);
        if with_pos_embed {
            let [s, h] = model.pos_embed.dims();
            w.add_tensor("pos_embed", &model.pos_embed.clone().reshape([1, s, h]));
        }
        w.write(path).unwrap();
    }

    #[test]
    fn test_infer_and_reload_matches_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dit.safetensors");
        let device = Default::default();
        let config = MolDitConfig::tiny();
        let model = config.init::<TestBackend>(&device);
        export(&model, &path, true);

        let (loaded, inferred) = load_mol_dit::<TestBackend, _>(&path, config.num_heads, &device).unwrap();
        assert_eq!(inferred, config);

        let x = Tensor::<TestBackend, 4>::random([2, 4, 6, 1], burn::tensor::Distribution::Normal(0.0, 1.0), &device);
        let ctx = Tensor::<TestBackend, 3>::random([2, 3, 8], burn::tensor::Distribution::Normal(0.0, 1.0), &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true; 6], [2, 3]), &device);

        let a: Vec<f32> = model.forward(x.clone(), &[5, 700], ctx.clone(), mask.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.forward(x, &[5, 700], ctx, mask).into_data().to_vec().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_default_length_without_pos_embed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dit.safetensors");
        let device = Default::default();
        export(&MolDitConfig::tiny().init::<TestBackend>(&device), &path, false);

        let file = SafeTensorFile::open(&path).unwrap();
        let config = MolDitConfig::infer(&file, 2).unwrap();
        assert_eq!(config.seq_len, 127);
        assert_eq!(config.depth, 2);
        assert!(config.learn_sigma);
    }

    #[test]
    fn test_bad_head_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dit.safetensors");
        let device = Default::default();
        export(&MolDitConfig::tiny().init::<TestBackend>(&device), &path, true);

        let file = SafeTensorFile::open(&path).unwrap();
        assert!(matches!(MolDitConfig::infer(&file, 3), Err(DitLoadError::InvalidCheckpoint(_))));
    }

    #[test]
    fn test_missing_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.safetensors");
        SafeTensorWriter::new().add("other", &[1], &[0.0]).write(&path).unwrap();

        let file = SafeTensorFile::open(&path).unwrap();
        match MolDitConfig::infer(&file, 2) {
            Err(DitLoadError::MissingTensor(name)) => assert_eq!(name, "x_embedder.weight"),
            other => panic!("expected MissingTensor, got {:?}", other),
        }
    }
}
