//! Reverse-diffusion loop with classifier-free guidance

use burn::prelude::*;
use ldmol_core::{ConditioningEmbedding, check_tensor_if, tensor_stats};
use rand::Rng;

use crate::SamplerError;
use crate::ddpm::{DdpmSampler, VarianceType};
use crate::denoiser::{Denoiser, UnconditionalSource};
use crate::guidance::{GuidanceScale, double_batch, guided_output, take_conditional_half};
use crate::noise::standard_normal;
use crate::scheduler::{GaussianDiffusion, NoiseSchedule, space_timesteps};

/// Debug output for the sampling loop
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugConfig {
    /// Log latent statistics at every step
    pub sampler: bool,
    /// Panic on NaN/Inf latents
    pub nan: bool,
}

/// Diffusion process configuration
#[derive(Debug, Clone)]
pub struct DiffusionConfig {
    /// Timesteps the denoiser was trained on
    pub num_train_timesteps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    /// Respacing spec, e.g. `"100"` or `"ddim50"`
    pub sampling_steps: String,
    pub variance_type: VarianceType,
    /// Clamp predicted x0 to `[-1, 1]`
    pub clip_denoised: bool,
    pub debug: DebugConfig,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 1e-4,
            beta_end: 0.02,
            sampling_steps: "100".to_string(),
            variance_type: VarianceType::LearnedRange,
            clip_denoised: false,
            debug: DebugConfig::default(),
        }
    }
}

impl DiffusionConfig {
    pub fn with_sampling_steps(mut self, steps: impl Into<String>) -> Self {
        self.sampling_steps = steps.into();
        self
    }

    pub fn with_variance_type(mut self, variance_type: VarianceType) -> Self {
        self.variance_type = variance_type;
        self
    }

    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }
}

/// Progress report passed to the step callback
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    /// 1-based step counter
    pub step: usize,
    pub total: usize,
    /// Training timestep the denoiser was called with
    pub timestep: usize,
}

/// Ancestral DDPM sampler over a respaced schedule
#[derive(Debug, Clone)]
pub struct DiffusionSampler {
    ddpm: DdpmSampler,
    debug: DebugConfig,
}

impl DiffusionSampler {
    pub fn new(config: &DiffusionConfig) -> Result<Self, SamplerError> {
        let schedule = NoiseSchedule::linear(config.num_train_timesteps, config.beta_start, config.beta_end);
        let keep = space_timesteps(config.num_train_timesteps, &config.sampling_steps)?;
        let diffusion = GaussianDiffusion::new(&schedule, &keep);
        Ok(Self {
            ddpm: DdpmSampler::new(diffusion, config.variance_type, config.clip_denoised),
            debug: config.debug,
        })
    }

    pub fn num_steps(&self) -> usize {
        self.ddpm.diffusion().num_steps()
    }

    pub fn ddpm(&self) -> &DdpmSampler {
        &self.ddpm
    }

    /// Denoise `noise` into a clean latent
    ///
    /// * `noise` - initial latent `[N, C, S, 1]`
    /// * `cond` - text conditioning with batch `N`
    /// * `null` - unconditional embedding, only consulted when `scale` is enabled
    /// * `rng` - source of per-step noise
    ///
    /// Returns `[N, C, S, 1]`.
    pub fn sample<B, D, U, R>(
        &self,
        denoiser: &D,
        noise: Tensor<B, 4>,
        cond: &ConditioningEmbedding<B>,
        null: &U,
        scale: GuidanceScale,
        rng: &mut R,
    ) -> Tensor<B, 4>
    where
        B: Backend,
        D: Denoiser<B>,
        U: UnconditionalSource<B> + ?Sized,
        R: Rng + ?Sized,
    {
        self.sample_with_callback(denoiser, noise, cond, null, scale, rng, |_| {})
    }

    /// [`Self::sample`] with a per-step progress callback
    #[allow(clippy::too_many_arguments)]
    pub fn sample_with_callback<B, D, U, R, F>(
        &self,
        denoiser: &D,
        noise: Tensor<B, 4>,
        cond: &ConditioningEmbedding<B>,
        null: &U,
        scale: GuidanceScale,
        rng: &mut R,
        mut on_step: F,
    ) -> Tensor<B, 4>
    where
        B: Backend,
        D: Denoiser<B>,
        U: UnconditionalSource<B> + ?Sized,
        R: Rng + ?Sized,
        F: FnMut(StepInfo),
    {
        let n = noise.dims()[0];
        assert_eq!(
            cond.batch_size(),
            n,
            "conditioning batch must match the latent batch"
        );
        let device = noise.device();
        let eps_channels = denoiser.in_channels();

        let guided = scale.is_enabled();
        let (mut x, cond) = if guided {
            let doubled = cond.concat(&null.null_batch(n));
            (double_batch(noise), doubled)
        } else {
            (noise, cond.clone())
        };
        let batch = x.dims()[0];

        let diffusion = self.ddpm.diffusion();
        let total = diffusion.num_steps();
        tracing::debug!(steps = total, guidance = scale.value(), batch, "reverse diffusion");

        for (i, t) in diffusion.reverse_indices().enumerate() {
            let timestep = diffusion.timestep_map[t];
            let timesteps = vec![timestep; batch];

            let output = if guided {
                // Both halves denoise the conditional-half latent
                let input = double_batch(take_conditional_half(x.clone()));
                let raw = denoiser.forward(input, &timesteps, &cond);
                guided_output(raw, scale, eps_channels)
            } else {
                denoiser.forward(x.clone(), &timesteps, &cond)
            };

            let z = (t > 0).then(|| standard_normal(x.dims(), &mut *rng, &device));
            x = self.ddpm.step(output, x, t, z);

            check_tensor_if(&x, &format!("latent at step {}", i + 1), self.debug.nan);
            if self.debug.sampler {
                tracing::info!(step = i + 1, timestep, "latent {}", tensor_stats(&x));
            }
            on_step(StepInfo {
                step: i + 1,
                total,
                timestep,
            });
        }

        if guided {
            take_conditional_half(x)
        } else {
            x
        }
    }
}
