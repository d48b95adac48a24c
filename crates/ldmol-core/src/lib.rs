//! Core Building Blocks for ldmol
//!
//! Shared layers used by the text encoder, the latent denoiser and the
//! SMILES decoder.
//!
//! # Modules
//!
//! - [`attention`] - Head splitting, key-padding masks, scaled dot-product attention
//! - [`conditioning`] - Text conditioning tensors (`[N, L, D]` vectors, `[N, L]` mask)
//! - [`layernorm`] - Layer normalization (affine and non-affine)
//! - [`rmsnorm`] - RMS normalization (T5 style)
//! - [`ffn`] - GELU MLP and gated-GELU feed-forward networks
//! - [`timestep`] - Sinusoidal timestep and position embeddings
//! - [`debug`] - Tensor statistics and NaN checks

pub mod attention;
pub mod conditioning;
pub mod debug;
pub mod ffn;
pub mod layernorm;
pub mod rmsnorm;
pub mod timestep;

pub use attention::{causal_bias, key_padding_bias, merge_heads, scaled_dot_product, split_heads};
pub use conditioning::ConditioningEmbedding;
pub use debug::{check_tensor_if, tensor_stats};
pub use ffn::{GatedGeluFfn, GatedGeluFfnConfig, GeluMlp, GeluMlpConfig, gelu_tanh};
pub use layernorm::LayerNorm;
pub use rmsnorm::RmsNorm;
pub use timestep::{sincos_position_embedding, timestep_embedding};
