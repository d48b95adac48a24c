//! ldmol: text-conditioned molecule generation in pure Rust
//!
//! Descriptions are embedded by a T5 encoder, a DiT denoises molecular
//! latents under classifier-free guidance, and a BERT decoder turns the
//! latents into SMILES. Runs shard a dataset over ranks and score the
//! result against the reference molecules.
//!
//! # Example
//!
//! ```ignore
//! use ldmol::{CheckpointPaths, LdmolPipeline, Text2MolConfig};
//! use ldmol::backends::{DefaultBackend, default_device};
//!
//! let config = Text2MolConfig::new(CheckpointPaths {
//!     dit: "ldmol_dit.safetensors".into(),
//!     autoencoder: "ldmol_ae.safetensors".into(),
//!     vocab: "vocab_bpe_300_sc.txt".into(),
//!     text_encoder: "molt5-large-caption2smiles".into(),
//! });
//! let device = default_device();
//! let pipeline = LdmolPipeline::<DefaultBackend>::load(&config, &device)?;
//! let smiles = pipeline.generate(&["The molecule is an alcohol."], &mut rng)?;
//! ```

pub use ldmol_autoencoder as autoencoder;
pub use ldmol_chem as chem;
pub use ldmol_convert as convert;
pub use ldmol_core as core;
pub use ldmol_dist as dist;
pub use ldmol_dit as dit;
pub use ldmol_eval as eval;
pub use ldmol_samplers as samplers;
pub use ldmol_text as text;

pub mod backends;
pub mod config;
pub mod dataset;
pub mod pipeline;
pub mod worker;

use thiserror::Error;

pub use config::{CheckpointPaths, ConfigError, Precision, Text2MolConfig};
pub use dataset::{Dataset, DatasetError, Sample};
pub use pipeline::{LdmolPipeline, Text2Mol};
pub use worker::{BatchProgress, WorkerSummary, evaluate_on_main, run_worker};

#[derive(Error, Debug)]
pub enum LdmolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Text(#[from] ldmol_text::TextError),

    #[error(transparent)]
    Denoiser(#[from] ldmol_dit::DitLoadError),

    #[error(transparent)]
    Autoencoder(#[from] ldmol_autoencoder::AutoencoderError),

    #[error(transparent)]
    Decode(#[from] ldmol_autoencoder::DecodeError),

    #[error(transparent)]
    Sampler(#[from] ldmol_samplers::SamplerError),

    #[error(transparent)]
    Dist(#[from] ldmol_dist::DistError),

    #[error(transparent)]
    Eval(#[from] ldmol_eval::EvalError),

    #[error("{what} mismatch: expected {expected}, got {actual}")]
    Incompatible {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}
