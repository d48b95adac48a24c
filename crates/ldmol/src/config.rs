//! Run configuration for text-to-molecule sampling

use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use ldmol_autoencoder::DecodeStrategy;
use ldmol_samplers::{DebugConfig, DiffusionConfig, DiffusionSampler, GuidanceScale, SamplerError, VarianceType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{kind} checkpoint not found at {path}")]
    MissingCheckpoint { kind: &'static str, path: PathBuf },

    #[error("per-process batch size must be at least 1")]
    ZeroBatchSize,

    #[error("description length must be at least 1")]
    ZeroDescriptionLength,

    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

/// Float precision of the compute backend
///
/// F16 trades accuracy of the matmuls for speed; backends without half
/// support run in f32.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    F32,
    F16,
}

impl Precision {
    /// Precision a backend actually computes in, judged by its float width
    pub fn of_backend<B: Backend>() -> Option<Self> {
        match std::mem::size_of::<B::FloatElem>() {
            4 => Some(Precision::F32),
            2 => Some(Precision::F16),
            _ => None,
        }
    }
}

/// Locations of the three networks
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPaths {
    /// Denoiser weights (`.safetensors`)
    pub dit: PathBuf,
    /// Autoencoder weights (`.safetensors`)
    pub autoencoder: PathBuf,
    /// SMILES vocabulary, one token per line
    pub vocab: PathBuf,
    /// Directory with `model.safetensors`, `config.json` and `tokenizer.json`
    pub text_encoder: PathBuf,
}

impl CheckpointPaths {
    /// Fail on the first path that does not exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        let entries: [(&'static str, &Path); 4] = [
            ("denoiser", &self.dit),
            ("autoencoder", &self.autoencoder),
            ("vocabulary", &self.vocab),
            ("text encoder", &self.text_encoder),
        ];
        for (kind, path) in entries {
            if !path.exists() {
                return Err(ConfigError::MissingCheckpoint {
                    kind,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}

/// Sampling, decoding and batching settings for one run
#[derive(Debug, Clone)]
pub struct Text2MolConfig {
    pub checkpoints: CheckpointPaths,
    /// Classifier-free guidance weight, `>= 1.0`
    pub cfg_scale: f64,
    /// Timestep respacing, e.g. `"100"`
    pub num_sampling_steps: String,
    pub per_proc_batch_size: usize,
    /// Token length of every description embedding
    pub description_length: usize,
    pub global_seed: u64,
    /// Beam width, or the candidate count when `stochastic`
    pub k: usize,
    pub stochastic: bool,
    pub precision: Precision,
    pub dit_heads: usize,
    pub decoder_heads: usize,
    pub debug: DebugConfig,
}

impl Text2MolConfig {
    pub fn new(checkpoints: CheckpointPaths) -> Self {
        Self {
            checkpoints,
            cfg_scale: 7.5,
            num_sampling_steps: "100".to_string(),
            per_proc_batch_size: 64,
            description_length: 256,
            global_seed: 0,
            k: 1,
            stochastic: false,
            precision: Precision::F32,
            dit_heads: 16,
            decoder_heads: 12,
            debug: DebugConfig::default(),
        }
    }

    /// Check everything that can be checked before loading weights
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.checkpoints.validate()?;
        if self.per_proc_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.description_length == 0 {
            return Err(ConfigError::ZeroDescriptionLength);
        }
        self.guidance()?;
        self.sampler()?;
        Ok(())
    }

    pub fn guidance(&self) -> Result<GuidanceScale, SamplerError> {
        GuidanceScale::new(self.cfg_scale)
    }

    pub fn diffusion(&self) -> DiffusionConfig {
        DiffusionConfig::default()
            .with_sampling_steps(self.num_sampling_steps.clone())
            .with_variance_type(VarianceType::LearnedRange)
            .with_debug(self.debug)
    }

    pub fn sampler(&self) -> Result<DiffusionSampler, SamplerError> {
        DiffusionSampler::new(&self.diffusion())
    }

    pub fn strategy(&self) -> DecodeStrategy {
        DecodeStrategy::from_options(self.stochastic, self.k)
    }
}
