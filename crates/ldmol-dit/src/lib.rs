//! Latent Denoiser for ldmol
//!
//! A DiT-style transformer that predicts noise (and a variance
//! interpolation) for molecular latents, conditioned on text through
//! masked cross-attention.
//!
//! # Architecture
//!
//! - Latents `[B, 64, 127, 1]` are treated as 127 tokens of 64 channels
//! - adaLN-Zero modulation from the timestep embedding
//! - Cross-attention to projected T5 states, padding masked out
//! - Fixed 1-D sin-cos positions

pub mod loader;
pub mod model;

pub use loader::{DitLoadError, load_mol_dit, load_with_config};
pub use model::{MolDit, MolDitConfig};
