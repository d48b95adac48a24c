//! Text-to-molecule pipeline
//!
//! ```text
//! descriptions -> ConditioningEncoder -> DiffusionSampler (+ null, w)
//!              -> LatentDecoder -> SMILES
//! ```

use burn::prelude::*;
use ldmol_autoencoder::{BertSmilesDecoder, LatentDecoder, TokenPredictor};
use ldmol_dit::{MolDit, load_mol_dit};
use ldmol_samplers::{Denoiser, DiffusionSampler, GuidanceScale, StepInfo, standard_normal};
use ldmol_text::{ConditioningEncoder, PromptTokenizer, T5Encoder, TextEncoder, TextError};
use rand::Rng;

use crate::LdmolError;
use crate::config::{Precision, Text2MolConfig};

/// Pipeline with the bundled T5 / DiT / BERT networks
pub type LdmolPipeline<B> = Text2Mol<B, T5Encoder<B>, MolDit<B>, BertSmilesDecoder<B>>;

pub struct Text2Mol<B, E, D, P>
where
    B: Backend,
    E: TextEncoder<B>,
    D: Denoiser<B>,
    P: TokenPredictor<B>,
{
    conditioning: ConditioningEncoder<B, E>,
    denoiser: D,
    decoder: LatentDecoder<B, P>,
    sampler: DiffusionSampler,
    guidance: GuidanceScale,
    seq_len: usize,
    device: B::Device,
}

impl<B, E, D, P> Text2Mol<B, E, D, P>
where
    B: Backend,
    E: TextEncoder<B>,
    D: Denoiser<B>,
    P: TokenPredictor<B>,
{
    /// Assemble a pipeline; latents are `[N, denoiser.in_channels(), seq_len, 1]`
    pub fn new(
        conditioning: ConditioningEncoder<B, E>,
        denoiser: D,
        decoder: LatentDecoder<B, P>,
        sampler: DiffusionSampler,
        guidance: GuidanceScale,
        seq_len: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conditioning,
            denoiser,
            decoder,
            sampler,
            guidance,
            seq_len,
            device: device.clone(),
        }
    }

    pub fn guidance(&self) -> GuidanceScale {
        self.guidance
    }

    pub fn num_steps(&self) -> usize {
        self.sampler.num_steps()
    }

    pub fn latent_shape(&self, n: usize) -> [usize; 4] {
        [n, self.denoiser.in_channels(), self.seq_len, 1]
    }

    pub fn conditioning(&self) -> &ConditioningEncoder<B, E> {
        &self.conditioning
    }

    /// Generate one SMILES string per description, in order
    pub fn generate<S, R>(&self, descriptions: &[S], rng: &mut R) -> Result<Vec<String>, LdmolError>
    where
        S: AsRef<str>,
        R: Rng,
    {
        self.generate_with_callback(descriptions, rng, |_| {})
    }

    /// [`Self::generate`] with a per-step progress callback
    pub fn generate_with_callback<S, R, F>(
        &self,
        descriptions: &[S],
        rng: &mut R,
        on_step: F,
    ) -> Result<Vec<String>, LdmolError>
    where
        S: AsRef<str>,
        R: Rng,
        F: FnMut(StepInfo),
    {
        if descriptions.is_empty() {
            return Ok(Vec::new());
        }
        let cond = self.conditioning.encode(descriptions).map_err(TextError::from)?;
        let noise = standard_normal(self.latent_shape(descriptions.len()), &mut *rng, &self.device);

        let latent = self.sampler.sample_with_callback(
            &self.denoiser,
            noise,
            &cond,
            &self.conditioning,
            self.guidance,
            &mut *rng,
            on_step,
        );
        Ok(self.decoder.decode(latent, rng)?)
    }
}

impl<B: Backend> LdmolPipeline<B> {
    /// Load all three networks from the configured checkpoints
    pub fn load(config: &Text2MolConfig, device: &B::Device) -> Result<Self, LdmolError> {
        config.validate()?;
        let paths = &config.checkpoints;
        let precision = Precision::of_backend::<B>();
        if precision != Some(config.precision) {
            tracing::warn!(requested = ?config.precision, actual = ?precision, "backend runs at a different precision");
        }

        let (t5, t5_config) = T5Encoder::load_dir(&paths.text_encoder, device)?;
        let tokenizer = PromptTokenizer::from_file(paths.text_encoder.join("tokenizer.json")).map_err(TextError::from)?;
        let conditioning =
            ConditioningEncoder::new(tokenizer, t5, config.description_length, device).map_err(TextError::from)?;

        let (dit, dit_config) = load_mol_dit(&paths.dit, config.dit_heads, device)?;
        if dit_config.text_dim != t5_config.d_model {
            return Err(LdmolError::Incompatible {
                what: "text embedding width",
                expected: dit_config.text_dim,
                actual: t5_config.d_model,
            });
        }

        let decoder = LatentDecoder::load(
            &paths.autoencoder,
            &paths.vocab,
            config.decoder_heads,
            config.strategy(),
            device,
        )?;

        tracing::info!(
            steps = config.num_sampling_steps.as_str(),
            cfg_scale = config.cfg_scale,
            strategy = ?config.strategy(),
            precision = ?config.precision,
            "pipeline ready"
        );
        Ok(Self::new(
            conditioning,
            dit,
            decoder,
            config.sampler()?,
            config.guidance()?,
            dit_config.seq_len,
            device,
        ))
    }
}
