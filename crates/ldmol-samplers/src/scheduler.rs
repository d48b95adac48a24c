//! Noise schedules for latent diffusion
//!
//! Tables are kept on the host in f64: every row of a batch shares the same
//! timestep, so each step only needs scalar coefficients.

use std::collections::BTreeSet;

use crate::SamplerError;

/// Beta schedule over the training timesteps
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    pub betas: Vec<f64>,
}

impl NoiseSchedule {
    /// Linear schedule, scaled so that 1000 steps spans `[beta_start, beta_end]`
    ///
    /// Matches the DiT `get_named_beta_schedule("linear", n)` convention.
    pub fn linear(num_train_steps: usize, beta_start: f64, beta_end: f64) -> Self {
        let scale = 1000.0 / num_train_steps as f64;
        let (start, end) = (beta_start * scale, beta_end * scale);
        let betas = if num_train_steps == 1 {
            vec![start]
        } else {
            (0..num_train_steps)
                .map(|i| start + (end - start) * i as f64 / (num_train_steps - 1) as f64)
                .collect()
        };
        Self { betas }
    }

    pub fn num_train_steps(&self) -> usize {
        self.betas.len()
    }

    /// Cumulative products of `1 - beta`
    pub fn alphas_cumprod(&self) -> Vec<f64> {
        let mut acc = 1.0;
        self.betas
            .iter()
            .map(|b| {
                acc *= 1.0 - b;
                acc
            })
            .collect()
    }

    /// Restrict the schedule to `use_timesteps`
    ///
    /// Returns the respaced schedule and the map from respaced index to the
    /// original training timestep. Respaced betas preserve `ᾱ` at every kept
    /// step: `beta_i = 1 - ᾱ[t_i] / ᾱ[t_{i-1}]`.
    pub fn respace(&self, use_timesteps: &BTreeSet<usize>) -> (Self, Vec<usize>) {
        let mut last = 1.0;
        let mut betas = Vec::with_capacity(use_timesteps.len());
        let mut timestep_map = Vec::with_capacity(use_timesteps.len());
        for (t, ac) in self.alphas_cumprod().into_iter().enumerate() {
            if use_timesteps.contains(&t) {
                betas.push(1.0 - ac / last);
                last = ac;
                timestep_map.push(t);
            }
        }
        (Self { betas }, timestep_map)
    }
}

/// Select the training timesteps to keep when sampling with fewer steps
///
/// `spec` is either a comma-separated list of per-section step counts
/// (`"100"`, `"10,15,20"`) splitting `0..num_train_steps` into equal
/// sections, or `"ddimN"` for a fixed integer stride giving exactly N steps.
pub fn space_timesteps(num_train_steps: usize, spec: &str) -> Result<BTreeSet<usize>, SamplerError> {
    let err = |reason: String| SamplerError::InvalidRespacing {
        spec: spec.to_string(),
        reason,
    };

    if let Some(rest) = spec.strip_prefix("ddim") {
        let desired: usize = rest
            .parse()
            .map_err(|_| err(format!("{rest:?} is not a step count")))?;
        for stride in 1..num_train_steps {
            if (0..num_train_steps).step_by(stride).count() == desired {
                return Ok((0..num_train_steps).step_by(stride).collect());
            }
        }
        return Err(err(format!("cannot create exactly {desired} steps with an integer stride")));
    }

    let counts: Vec<usize> = spec
        .split(',')
        .map(|s| s.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|e| err(e.to_string()))?;
    if counts.is_empty() || counts.iter().all(|&c| c == 0) {
        return Err(err("no steps requested".to_string()));
    }

    let size_per = num_train_steps / counts.len();
    let extra = num_train_steps % counts.len();
    let mut start = 0usize;
    let mut steps = BTreeSet::new();
    for (i, &count) in counts.iter().enumerate() {
        let size = size_per + usize::from(i < extra);
        if size < count {
            return Err(err(format!("cannot divide section of {size} steps into {count}")));
        }
        let stride = if count <= 1 {
            1.0
        } else {
            (size - 1) as f64 / (count - 1) as f64
        };
        let mut cur = 0.0f64;
        for _ in 0..count {
            steps.insert(start + cur.round_ties_even() as usize);
            cur += stride;
        }
        start += size;
    }
    Ok(steps)
}

/// Precomputed diffusion coefficients for a (possibly respaced) schedule
#[derive(Debug, Clone)]
pub struct GaussianDiffusion {
    pub betas: Vec<f64>,
    pub alphas_cumprod: Vec<f64>,
    pub alphas_cumprod_prev: Vec<f64>,
    pub posterior_variance: Vec<f64>,
    pub posterior_log_variance_clipped: Vec<f64>,
    pub posterior_mean_coef1: Vec<f64>,
    pub posterior_mean_coef2: Vec<f64>,
    pub sqrt_recip_alphas_cumprod: Vec<f64>,
    pub sqrt_recipm1_alphas_cumprod: Vec<f64>,
    /// Respaced index -> original training timestep
    pub timestep_map: Vec<usize>,
}

impl GaussianDiffusion {
    /// Build tables for `schedule` restricted to `use_timesteps`
    pub fn new(schedule: &NoiseSchedule, use_timesteps: &BTreeSet<usize>) -> Self {
        let (spaced, timestep_map) = schedule.respace(use_timesteps);
        Self::from_betas(spaced.betas, timestep_map)
    }

    fn from_betas(betas: Vec<f64>, timestep_map: Vec<usize>) -> Self {
        let n = betas.len();
        let alphas_cumprod = NoiseSchedule {
            betas: betas.clone(),
        }
        .alphas_cumprod();
        let alphas_cumprod_prev: Vec<f64> = std::iter::once(1.0)
            .chain(alphas_cumprod.iter().take(n.saturating_sub(1)).copied())
            .collect();

        let posterior_variance: Vec<f64> = (0..n)
            .map(|t| betas[t] * (1.0 - alphas_cumprod_prev[t]) / (1.0 - alphas_cumprod[t]))
            .collect();
        // The variance at t=0 is zero; reuse t=1 so the log stays finite
        let posterior_log_variance_clipped = if n > 1 {
            (0..n)
                .map(|t| posterior_variance[t.max(1)].ln())
                .collect()
        } else {
            betas.iter().map(|b| b.ln()).collect()
        };

        let posterior_mean_coef1 = (0..n)
            .map(|t| betas[t] * alphas_cumprod_prev[t].sqrt() / (1.0 - alphas_cumprod[t]))
            .collect();
        let posterior_mean_coef2 = (0..n)
            .map(|t| {
                (1.0 - alphas_cumprod_prev[t]) * (1.0 - betas[t]).sqrt() / (1.0 - alphas_cumprod[t])
            })
            .collect();
        let sqrt_recip_alphas_cumprod = alphas_cumprod.iter().map(|a| (1.0 / a).sqrt()).collect();
        let sqrt_recipm1_alphas_cumprod = alphas_cumprod
            .iter()
            .map(|a| (1.0 / a - 1.0).sqrt())
            .collect();

        Self {
            betas,
            alphas_cumprod,
            alphas_cumprod_prev,
            posterior_variance,
            posterior_log_variance_clipped,
            posterior_mean_coef1,
            posterior_mean_coef2,
            sqrt_recip_alphas_cumprod,
            sqrt_recipm1_alphas_cumprod,
            timestep_map,
        }
    }

    /// Number of sampling steps
    pub fn num_steps(&self) -> usize {
        self.betas.len()
    }

    /// Sampling order: respaced indices from last to first
    pub fn reverse_indices(&self) -> impl Iterator<Item = usize> {
        (0..self.num_steps()).rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule_endpoints() {
        let schedule = NoiseSchedule::linear(1000, 1e-4, 0.02);
        assert_eq!(schedule.num_train_steps(), 1000);
        assert!((schedule.betas[0] - 1e-4).abs() < 1e-12);
        assert!((schedule.betas[999] - 0.02).abs() < 1e-12);

        let ac = schedule.alphas_cumprod();
        assert!(ac.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_space_timesteps_even_sections() {
        let steps = space_timesteps(1000, "100").unwrap();
        assert_eq!(steps.len(), 100);
        assert_eq!(steps.first(), Some(&0));
        assert_eq!(steps.last(), Some(&999));

        let steps = space_timesteps(10, "5,5").unwrap();
        assert_eq!(steps.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_space_timesteps_ddim() {
        let steps = space_timesteps(1000, "ddim50").unwrap();
        assert_eq!(steps.len(), 50);
        assert!(steps.contains(&980));
        assert!(space_timesteps(1000, "ddim700").is_err());
    }

    #[test]
    fn test_space_timesteps_rejects_oversized_section() {
        assert!(space_timesteps(10, "11").is_err());
        assert!(space_timesteps(10, "abc").is_err());
    }

    #[test]
    fn test_respacing_preserves_alpha_cumprod() {
        let schedule = NoiseSchedule::linear(1000, 1e-4, 0.02);
        let keep = space_timesteps(1000, "100").unwrap();
        let diffusion = GaussianDiffusion::new(&schedule, &keep);

        let full = schedule.alphas_cumprod();
        for (i, &t) in diffusion.timestep_map.iter().enumerate() {
            assert!((diffusion.alphas_cumprod[i] - full[t]).abs() < 1e-9);
        }
        assert_eq!(diffusion.num_steps(), 100);
        assert_eq!(diffusion.reverse_indices().next(), Some(99));
    }

    #[test]
    fn test_full_schedule_is_identity_map() {
        let schedule = NoiseSchedule::linear(20, 1e-4, 0.02);
        let keep: BTreeSet<usize> = (0..20).collect();
        let diffusion = GaussianDiffusion::new(&schedule, &keep);
        assert_eq!(diffusion.timestep_map, (0..20).collect::<Vec<_>>());
        for (a, b) in diffusion.betas.iter().zip(&schedule.betas) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(diffusion.posterior_log_variance_clipped.iter().all(|v| v.is_finite()));
    }
}
