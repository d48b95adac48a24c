//! Molecular DiT
//!
//! A diffusion transformer over the `S` latent positions of a molecule.
//! Each block applies adaLN-Zero modulated self-attention, masked
//! cross-attention to the projected text condition and a modulated MLP.
//!
//! ```text
//! x [B, C, S, 1] -> [B, S, C] -> x_embedder + pos_embed
//!        ↓
//! [DiT blocks] <- t_embedder(t) (adaLN), y_embedder(text) (cross-attn)
//!        ↓
//! final_layer -> [B, S, 2C] -> [B, 2C, S, 1]
//! ```

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;

use ldmol_core::attention::{key_padding_bias, merge_heads, scaled_dot_product, split_heads};
use ldmol_core::{ConditioningEmbedding, GeluMlp, GeluMlpConfig, LayerNorm};
use ldmol_core::{sincos_position_embedding, timestep_embedding};
use ldmol_samplers::Denoiser;

pub(crate) const NORM_EPS: f64 = 1e-6;
const MAX_PERIOD: f32 = 10000.0;

/// MolDit configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MolDitConfig {
    /// Latent channels `C`
    pub in_channels: usize,
    /// Latent positions `S`
    pub seq_len: usize,
    pub hidden_size: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f32,
    /// Width of the text encoder output
    pub text_dim: usize,
    /// Predict a variance interpolation alongside the noise
    pub learn_sigma: bool,
    /// Width of the sinusoidal timestep features
    pub frequency_embedding_size: usize,
}

impl MolDitConfig {
    /// DiT-B over 64x127 latents, conditioned on MolT5-large
    pub fn ldmol() -> Self {
        Self {
            in_channels: 64,
            seq_len: 127,
            hidden_size: 768,
            depth: 12,
            num_heads: 16,
            mlp_ratio: 4.0,
            text_dim: 1024,
            learn_sigma: true,
            frequency_embedding_size: 256,
        }
    }

    /// Tiny model for testing
    pub fn tiny() -> Self {
        Self {
            in_channels: 4,
            seq_len: 6,
            hidden_size: 16,
            depth: 2,
            num_heads: 2,
            mlp_ratio: 2.0,
            text_dim: 8,
            learn_sigma: true,
            frequency_embedding_size: 8,
        }
    }

    pub fn out_channels(&self) -> usize {
        if self.learn_sigma {
            2 * self.in_channels
        } else {
            self.in_channels
        }
    }

    pub fn mlp_hidden(&self) -> usize {
        (self.hidden_size as f32 * self.mlp_ratio) as usize
    }

    /// Random-init model
    pub fn init<B: Backend>(&self, device: &B::Device) -> MolDit<B> {
        let h = self.hidden_size;
        let linear = |i, o| LinearConfig::new(i, o).init(device);

        MolDit {
            x_embedder: linear(self.in_channels, h),
            t_embedder: TimestepEmbedder {
                mlp0: linear(self.frequency_embedding_size, h),
                mlp2: linear(h, h),
                frequency_size: self.frequency_embedding_size,
            },
            y_embedder: linear(self.text_dim, h),
            pos_embed: sincos_position_embedding(self.seq_len, h, device),
            blocks: (0..self.depth)
                .map(|_| DitBlock {
                    norm1: LayerNorm::without_affine(h, NORM_EPS, device),
                    attn: SelfAttention {
                        qkv: linear(h, 3 * h),
                        proj: linear(h, h),
                        num_heads: self.num_heads,
                    },
                    norm2: LayerNorm::without_affine(h, NORM_EPS, device),
                    cross_attn: CrossAttention {
                        q: linear(h, h),
                        kv: linear(h, 2 * h),
                        proj: linear(h, h),
                        num_heads: self.num_heads,
                    },
                    norm3: LayerNorm::without_affine(h, NORM_EPS, device),
                    mlp: GeluMlpConfig::new(h, self.mlp_hidden())
                        .with_approximate(true)
                        .init(device),
                    ada_ln_modulation: linear(h, 6 * h),
                })
                .collect(),
            final_layer: FinalLayer {
                norm: LayerNorm::without_affine(h, NORM_EPS, device),
                linear: linear(h, self.out_channels()),
                ada_ln_modulation: linear(h, 2 * h),
            },
            in_channels: self.in_channels,
            learn_sigma: self.learn_sigma,
        }
    }
}

/// `x * (1 + scale) + shift`, with `shift`/`scale` as `[B, 1, H]`
fn modulate<B: Backend>(x: Tensor<B, 3>, shift: Tensor<B, 3>, scale: Tensor<B, 3>) -> Tensor<B, 3> {
    x * (scale + 1.0) + shift
}

/// Split adaLN parameters `[B, N*H]` into `N` tensors of `[B, 1, H]`
fn modulation_chunks<B: Backend, const N: usize>(params: Tensor<B, 2>) -> [Tensor<B, 3>; N] {
    let [batch, width] = params.dims();
    let hidden = width / N;
    std::array::from_fn(|i| {
        params
            .clone()
            .slice([0..batch, i * hidden..(i + 1) * hidden])
            .unsqueeze_dim::<3>(1)
    })
}

/// Sinusoidal timestep features followed by a SiLU MLP
#[derive(Module, Debug)]
pub struct TimestepEmbedder<B: Backend> {
    pub mlp0: Linear<B>,
    pub mlp2: Linear<B>,
    #[module(skip)]
    pub frequency_size: usize,
}

impl<B: Backend> TimestepEmbedder<B> {
    pub fn forward(&self, timesteps: &[f32], device: &B::Device) -> Tensor<B, 2> {
        let freq = timestep_embedding(timesteps, self.frequency_size, MAX_PERIOD, device);
        self.mlp2.forward(silu(self.mlp0.forward(freq)))
    }
}

/// Multi-head self-attention with a fused qkv projection
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    pub qkv: Linear<B>,
    pub proj: Linear<B>,
    #[module(skip)]
    pub num_heads: usize,
}

impl<B: Backend> SelfAttention<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq_len, hidden] = x.dims();
        let qkv = self.qkv.forward(x);
        let part = |i: usize| {
            split_heads(
                qkv.clone().slice([0..batch, 0..seq_len, i * hidden..(i + 1) * hidden]),
                self.num_heads,
            )
        };
        let (q, k, v) = (part(0), part(1), part(2));

        let scale = ((hidden / self.num_heads) as f32).sqrt().recip();
        let out = scaled_dot_product(q, k, v, None, scale);
        self.proj.forward(merge_heads(out))
    }
}

/// Cross-attention from latent positions to text tokens
#[derive(Module, Debug)]
pub struct CrossAttention<B: Backend> {
    pub q: Linear<B>,
    pub kv: Linear<B>,
    pub proj: Linear<B>,
    #[module(skip)]
    pub num_heads: usize,
}

impl<B: Backend> CrossAttention<B> {
    /// * `x` - `[B, S, H]`
    /// * `context` - projected text `[B, L, H]`
    /// * `mask` - `[B, L]`, `true` on real tokens
    pub fn forward(&self, x: Tensor<B, 3>, context: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let [_, _, hidden] = x.dims();
        let [batch, ctx_len, _] = context.dims();

        let q = split_heads(self.q.forward(x), self.num_heads);
        let kv = self.kv.forward(context);
        let k = split_heads(kv.clone().slice([0..batch, 0..ctx_len, 0..hidden]), self.num_heads);
        let v = split_heads(kv.slice([0..batch, 0..ctx_len, hidden..2 * hidden]), self.num_heads);

        let scale = ((hidden / self.num_heads) as f32).sqrt().recip();
        let out = scaled_dot_product(q, k, v, Some(key_padding_bias(mask)), scale);
        self.proj.forward(merge_heads(out))
    }
}

/// DiT block with adaLN-Zero conditioning on the timestep
#[derive(Module, Debug)]
pub struct DitBlock<B: Backend> {
    pub norm1: LayerNorm<B>,
    pub attn: SelfAttention<B>,
    pub norm2: LayerNorm<B>,
    pub cross_attn: CrossAttention<B>,
    pub norm3: LayerNorm<B>,
    pub mlp: GeluMlp<B>,
    pub ada_ln_modulation: Linear<B>,
}

impl<B: Backend> DitBlock<B> {
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        c: Tensor<B, 2>,
        context: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let [shift_msa, scale_msa, gate_msa, shift_mlp, scale_mlp, gate_mlp] =
            modulation_chunks::<B, 6>(self.ada_ln_modulation.forward(silu(c)));

        let h = modulate(self.norm1.forward(x.clone()), shift_msa, scale_msa);
        let x = x + gate_msa * self.attn.forward(h);

        let x = x.clone() + self.cross_attn.forward(self.norm2.forward(x), context, mask);

        let h = modulate(self.norm3.forward(x.clone()), shift_mlp, scale_mlp);
        x + gate_mlp * self.mlp.forward(h)
    }
}

/// Modulated norm and projection to the output channels
#[derive(Module, Debug)]
pub struct FinalLayer<B: Backend> {
    pub norm: LayerNorm<B>,
    pub linear: Linear<B>,
    pub ada_ln_modulation: Linear<B>,
}

impl<B: Backend> FinalLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, c: Tensor<B, 2>) -> Tensor<B, 3> {
        let [shift, scale] = modulation_chunks::<B, 2>(self.ada_ln_modulation.forward(silu(c)));
        self.linear.forward(modulate(self.norm.forward(x), shift, scale))
    }
}

/// Text-conditioned diffusion transformer over `[B, C, S, 1]` latents
#[derive(Module, Debug)]
pub struct MolDit<B: Backend> {
    pub x_embedder: Linear<B>,
    pub t_embedder: TimestepEmbedder<B>,
    pub y_embedder: Linear<B>,
    /// Fixed 1-D sin-cos table `[S, H]`
    pub pos_embed: Tensor<B, 2>,
    pub blocks: Vec<DitBlock<B>>,
    pub final_layer: FinalLayer<B>,
    #[module(skip)]
    pub in_channels: usize,
    #[module(skip)]
    pub learn_sigma: bool,
}

impl<B: Backend> MolDit<B> {
    /// Noise (and variance) prediction
    ///
    /// # Arguments
    ///
    /// * `x` - Noisy latents `[B, C, S, 1]`
    /// * `timesteps` - Training-scale timestep per row
    /// * `context` - Text encoder output `[B, L, D]`
    /// * `mask` - Text padding mask `[B, L]`
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        timesteps: &[usize],
        context: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Tensor<B, 4> {
        let [batch, channels, seq_len, _] = x.dims();
        let device = x.device();
        let [pos_len, hidden] = self.pos_embed.dims();
        assert_eq!(seq_len, pos_len, "latent length must match the position table");
        assert_eq!(timesteps.len(), batch, "one timestep per latent row");

        let x = x.reshape([batch, channels, seq_len]).swap_dims(1, 2);
        let mut x = self.x_embedder.forward(x) + self.pos_embed.clone().reshape([1, seq_len, hidden]);

        let t: Vec<f32> = timesteps.iter().map(|&t| t as f32).collect();
        let c = self.t_embedder.forward(&t, &device);
        let context = self.y_embedder.forward(context);

        for block in &self.blocks {
            x = block.forward(x, c.clone(), context.clone(), mask.clone());
        }

        let out = self.final_layer.forward(x, c);
        let [_, _, out_channels] = out.dims();
        out.swap_dims(1, 2).reshape([batch, out_channels, seq_len, 1])
    }
}

impl<B: Backend> Denoiser<B> for MolDit<B> {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn learns_sigma(&self) -> bool {
        self.learn_sigma
    }

    fn forward(&self, x: Tensor<B, 4>, timesteps: &[usize], cond: &ConditioningEmbedding<B>) -> Tensor<B, 4> {
        MolDit::forward(self, x, timesteps, cond.vectors.clone(), cond.mask.clone())
    }
}
