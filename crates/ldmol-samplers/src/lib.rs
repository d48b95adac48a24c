//! Latent diffusion sampling
//!
//! Reverse diffusion for `[N, C, S, 1]` molecular latents:
//!
//! - [`scheduler`] - linear beta schedule, timestep respacing, posterior tables
//! - [`ddpm`] - one ancestral DDPM step with fixed or learned variance
//! - [`guidance`] - classifier-free guidance on the doubled batch
//! - [`denoiser`] - the denoiser contract
//! - [`sampler`] - the full reverse loop
//! - [`noise`] - seeded standard-normal tensors

pub mod ddpm;
pub mod denoiser;
pub mod guidance;
pub mod noise;
pub mod sampler;
pub mod scheduler;

use thiserror::Error;

pub use ddpm::{DdpmSampler, VarianceType};
pub use denoiser::{Denoiser, UnconditionalSource};
pub use guidance::{GuidanceScale, double_batch, guided_output, take_conditional_half};
pub use noise::standard_normal;
pub use sampler::{DebugConfig, DiffusionConfig, DiffusionSampler, StepInfo};
pub use scheduler::{GaussianDiffusion, NoiseSchedule, space_timesteps};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error("guidance scale must be a finite value >= 1.0, got {0}")]
    InvalidGuidanceScale(f64),

    #[error("invalid timestep respacing {spec:?}: {reason}")]
    InvalidRespacing { spec: String, reason: String },
}
