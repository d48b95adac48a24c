//! DDPM ancestral step
//!
//! Given a noise prediction at respaced step `t`, computes
//!
//! ```text
//! x0     = sqrt(1/ᾱ_t) x_t - sqrt(1/ᾱ_t - 1) eps
//! mean   = c1_t x0 + c2_t x_t
//! x_t-1  = mean + 1[t > 0] exp(log σ²_t / 2) z
//! ```
//!
//! with the variance chosen by [`VarianceType`].

use burn::prelude::*;

use crate::scheduler::GaussianDiffusion;

/// Variance used for the reverse step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VarianceType {
    /// Posterior variance β̃_t
    FixedSmall,
    /// β_t (with β̃_1 at t = 0)
    FixedLarge,
    /// Model interpolates between log β̃_t and log β_t; needs `2C` outputs
    #[default]
    LearnedRange,
}

/// Reverse-step math over a [`GaussianDiffusion`] table
#[derive(Debug, Clone)]
pub struct DdpmSampler {
    diffusion: GaussianDiffusion,
    variance_type: VarianceType,
    clip_denoised: bool,
}

impl DdpmSampler {
    pub fn new(diffusion: GaussianDiffusion, variance_type: VarianceType, clip_denoised: bool) -> Self {
        Self {
            diffusion,
            variance_type,
            clip_denoised,
        }
    }

    pub fn diffusion(&self) -> &GaussianDiffusion {
        &self.diffusion
    }

    pub fn variance_type(&self) -> VarianceType {
        self.variance_type
    }

    /// Predicted clean latent from `x_t` and the noise prediction
    pub fn predict_xstart<B: Backend>(&self, x: Tensor<B, 4>, eps: Tensor<B, 4>, t: usize) -> Tensor<B, 4> {
        let d = &self.diffusion;
        let x0 = x * d.sqrt_recip_alphas_cumprod[t] - eps * d.sqrt_recipm1_alphas_cumprod[t];
        if self.clip_denoised {
            x0.clamp(-1.0, 1.0)
        } else {
            x0
        }
    }

    /// Posterior mean `c1 x0 + c2 x_t`
    pub fn posterior_mean<B: Backend>(&self, x0: Tensor<B, 4>, x: Tensor<B, 4>, t: usize) -> Tensor<B, 4> {
        let d = &self.diffusion;
        x0 * d.posterior_mean_coef1[t] + x * d.posterior_mean_coef2[t]
    }

    fn fixed_log_variance(&self, t: usize) -> f64 {
        let d = &self.diffusion;
        match self.variance_type {
            VarianceType::FixedLarge => {
                if t == 0 && d.num_steps() > 1 {
                    d.posterior_variance[1].ln()
                } else {
                    d.betas[t].ln()
                }
            }
            _ => d.posterior_log_variance_clipped[t],
        }
    }

    /// Standard deviation of the reverse step, `[B, C, S, W]`
    ///
    /// `var_values` is the raw variance output in `[-1, 1]`; required for
    /// [`VarianceType::LearnedRange`] and ignored otherwise.
    pub fn step_std<B: Backend>(
        &self,
        var_values: Option<Tensor<B, 4>>,
        like: &Tensor<B, 4>,
        t: usize,
    ) -> Tensor<B, 4> {
        match (self.variance_type, var_values) {
            (VarianceType::LearnedRange, Some(v)) => {
                let min_log = self.diffusion.posterior_log_variance_clipped[t];
                let max_log = self.diffusion.betas[t].ln();
                let frac = (v + 1.0) * 0.5;
                let log_var = frac.clone() * max_log + (frac.ones_like() - frac) * min_log;
                (log_var * 0.5).exp()
            }
            _ => like.ones_like() * (0.5 * self.fixed_log_variance(t)).exp(),
        }
    }

    /// One reverse step at respaced index `t`
    ///
    /// `model_output` is `[B, C, ...]` or `[B, 2C, ...]` for learned variance.
    /// `noise` is ignored at `t == 0`.
    pub fn step<B: Backend>(
        &self,
        model_output: Tensor<B, 4>,
        x: Tensor<B, 4>,
        t: usize,
        noise: Option<Tensor<B, 4>>,
    ) -> Tensor<B, 4> {
        let [batch, channels, s, w] = x.dims();
        let out_channels = model_output.dims()[1];

        let eps = model_output
            .clone()
            .slice([0..batch, 0..channels, 0..s, 0..w]);
        let var_values = (out_channels == 2 * channels)
            .then(|| model_output.slice([0..batch, channels..2 * channels, 0..s, 0..w]));

        let x0 = self.predict_xstart(x.clone(), eps, t);
        let mean = self.posterior_mean(x0, x, t);

        match noise {
            Some(z) if t > 0 => {
                let std = self.step_std(var_values, &mean, t);
                mean + std * z
            }
            _ => mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{NoiseSchedule, space_timesteps};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn sampler(variance_type: VarianceType) -> DdpmSampler {
        let schedule = NoiseSchedule::linear(1000, 1e-4, 0.02);
        let keep = space_timesteps(1000, "10").unwrap();
        DdpmSampler::new(GaussianDiffusion::new(&schedule, &keep), variance_type, false)
    }

    #[test]
    fn test_zero_noise_prediction_at_last_step_returns_x0() {
        // With eps = 0 at t = 0 the mean is x / sqrt(ᾱ_0) scaled by c1 + c2 * sqrt(ᾱ_0)
        let s = sampler(VarianceType::FixedSmall);
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 3, 1], &device);
        let eps = Tensor::<TestBackend, 4>::zeros([1, 2, 3, 1], &device);

        let out = s.step(eps, x, 0, None);
        let d = s.diffusion();
        let expected = d.sqrt_recip_alphas_cumprod[0] * d.posterior_mean_coef1[0] + d.posterior_mean_coef2[0];
        let values: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (*v as f64 - expected).abs() < 1e-5));
    }

    #[test]
    fn test_learned_range_endpoints() {
        let s = sampler(VarianceType::LearnedRange);
        let device = Default::default();
        let like = Tensor::<TestBackend, 4>::zeros([1, 1, 1, 1], &device);
        let t = 5;
        let d = s.diffusion();

        let hi = s.step_std(Some(like.ones_like()), &like, t);
        let lo = s.step_std(Some(like.ones_like().neg()), &like, t);
        let hi: Vec<f32> = hi.into_data().to_vec().unwrap();
        let lo: Vec<f32> = lo.into_data().to_vec().unwrap();

        assert!((hi[0] as f64 - d.betas[t].sqrt()).abs() < 1e-5);
        assert!((lo[0] as f64 - d.posterior_variance[t].sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_noise_only_added_before_final_step() {
        let s = sampler(VarianceType::FixedLarge);
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 1], &device);
        let eps = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 1], &device);
        let z = Tensor::<TestBackend, 4>::ones([1, 1, 2, 1], &device);

        let final_step: Vec<f32> = s
            .step(eps.clone(), x.clone(), 0, Some(z.clone()))
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(final_step, vec![0.0, 0.0]);

        let mid: Vec<f32> = s.step(eps, x, 3, Some(z)).into_data().to_vec().unwrap();
        let expected = s.diffusion().betas[3].sqrt() as f32;
        assert!((mid[0] - expected).abs() < 1e-5);
    }
}
