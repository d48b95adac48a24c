//! T5 Encoder
//!
//! Encoder half of T5 v1.1 (as used by MolT5): RMS layer norms, unscaled
//! attention with a learned relative position bias shared by all layers,
//! and a gated-GELU feed-forward block.

use std::path::Path;

use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Int;
use serde::Deserialize;

use ldmol_convert::{LoadError, SafeTensorFile, WeightScope};
use ldmol_core::attention::{key_padding_bias, merge_heads, scaled_dot_product, split_heads};
use ldmol_core::{GatedGeluFfn, GatedGeluFfnConfig, RmsNorm};

use crate::TextError;
use crate::encoder::TextEncoder;

/// T5 configuration, read from a HuggingFace `config.json`
///
/// Missing fields default to MolT5-large.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct T5Config {
    pub vocab_size: usize,
    pub d_model: usize,
    pub d_kv: usize,
    pub d_ff: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub relative_attention_num_buckets: usize,
    pub relative_attention_max_distance: usize,
    pub layer_norm_epsilon: f64,
    pub feed_forward_proj: String,
}

impl Default for T5Config {
    fn default() -> Self {
        Self {
            vocab_size: 32128,
            d_model: 1024,
            d_kv: 64,
            d_ff: 2816,
            num_layers: 24,
            num_heads: 16,
            relative_attention_num_buckets: 32,
            relative_attention_max_distance: 128,
            layer_norm_epsilon: 1e-6,
            feed_forward_proj: "gated-gelu".to_string(),
        }
    }
}

impl T5Config {
    /// Parse a `config.json` string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Width of the concatenated attention heads
    pub fn inner_dim(&self) -> usize {
        self.num_heads * self.d_kv
    }

    /// Small random-init configuration for tests
    pub fn tiny() -> Self {
        Self {
            vocab_size: 16,
            d_model: 8,
            d_kv: 4,
            d_ff: 12,
            num_layers: 2,
            num_heads: 2,
            ..Self::default()
        }
    }
}

/// Bidirectional relative position bucket (T5 `_relative_position_bucket`)
///
/// Half the buckets encode direction. Within each half, offsets below
/// `num_buckets / 4` get their own bucket and larger ones are binned
/// logarithmically up to `max_distance`.
pub fn relative_position_bucket(relative_position: i64, num_buckets: usize, max_distance: usize) -> usize {
    let half = num_buckets / 2;
    let mut bucket = if relative_position > 0 { half } else { 0 };
    let n = relative_position.unsigned_abs() as usize;

    let max_exact = half / 2;
    if n < max_exact {
        bucket += n;
    } else {
        let scaled = (n as f64 / max_exact as f64).ln() / (max_distance as f64 / max_exact as f64).ln()
            * (half - max_exact) as f64;
        bucket += (max_exact + scaled as usize).min(half - 1);
    }
    bucket
}

/// Self-attention with optional relative position bias table
#[derive(Module, Debug)]
pub struct T5Attention<B: Backend> {
    pub q: Linear<B>,
    pub k: Linear<B>,
    pub v: Linear<B>,
    pub o: Linear<B>,
    /// `[num_buckets, num_heads]`; only present in the first layer
    pub relative_attention_bias: Option<Embedding<B>>,
    #[module(skip)]
    pub num_heads: usize,
    #[module(skip)]
    pub num_buckets: usize,
    #[module(skip)]
    pub max_distance: usize,
}

impl<B: Backend> T5Attention<B> {
    pub fn new(config: &T5Config, has_relative_bias: bool, device: &B::Device) -> Self {
        let proj = |i, o| LinearConfig::new(i, o).with_bias(false).init(device);
        let inner = config.inner_dim();
        Self {
            q: proj(config.d_model, inner),
            k: proj(config.d_model, inner),
            v: proj(config.d_model, inner),
            o: proj(inner, config.d_model),
            relative_attention_bias: has_relative_bias.then(|| {
                EmbeddingConfig::new(config.relative_attention_num_buckets, config.num_heads).init(device)
            }),
            num_heads: config.num_heads,
            num_buckets: config.relative_attention_num_buckets,
            max_distance: config.relative_attention_max_distance,
        }
    }

    /// Position bias `[1, heads, len, len]`, or `None` without a bias table
    pub fn position_bias(&self, len: usize, device: &B::Device) -> Option<Tensor<B, 4>> {
        let table = self.relative_attention_bias.as_ref()?;
        let buckets: Vec<i32> = (0..len)
            .flat_map(|q| {
                (0..len).map(move |k| {
                    relative_position_bucket(k as i64 - q as i64, self.num_buckets, self.max_distance) as i32
                })
            })
            .collect();
        let buckets = Tensor::<B, 2, Int>::from_data(TensorData::new(buckets, [1, len * len]), device);

        // [1, len*len, heads] -> [heads, len, len]
        let bias = table
            .forward(buckets)
            .reshape([len, len, self.num_heads])
            .swap_dims(0, 2)
            .swap_dims(1, 2);
        Some(bias.unsqueeze::<4>())
    }

    /// `bias` already combines position bias and key padding
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let q = split_heads(self.q.forward(x.clone()), self.num_heads);
        let k = split_heads(self.k.forward(x.clone()), self.num_heads);
        let v = split_heads(self.v.forward(x), self.num_heads);

        let out = scaled_dot_product(q, k, v, Some(bias), 1.0);
        self.o.forward(merge_heads(out))
    }
}

/// One encoder block: pre-norm attention then pre-norm feed-forward
#[derive(Module, Debug)]
pub struct T5Block<B: Backend> {
    pub attn_norm: RmsNorm<B>,
    pub attn: T5Attention<B>,
    pub ffn_norm: RmsNorm<B>,
    pub ffn: GatedGeluFfn<B>,
}

impl<B: Backend> T5Block<B> {
    pub fn new(config: &T5Config, has_relative_bias: bool, device: &B::Device) -> Self {
        Self {
            attn_norm: RmsNorm::new(config.d_model, config.layer_norm_epsilon, device),
            attn: T5Attention::new(config, has_relative_bias, device),
            ffn_norm: RmsNorm::new(config.d_model, config.layer_norm_epsilon, device),
            ffn: GatedGeluFfnConfig::new(config.d_model, config.d_ff).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.attn_norm.forward(x), bias);
        x.clone() + self.ffn.forward(self.ffn_norm.forward(x))
    }
}

/// T5 encoder stack
#[derive(Module, Debug)]
pub struct T5Encoder<B: Backend> {
    pub shared: Embedding<B>,
    pub blocks: Vec<T5Block<B>>,
    pub final_layer_norm: RmsNorm<B>,
    #[module(skip)]
    pub d_model: usize,
}

impl<B: Backend> T5Encoder<B> {
    /// Random-init encoder with the given shape
    pub fn new(config: &T5Config, device: &B::Device) -> Self {
        Self {
            shared: EmbeddingConfig::new(config.vocab_size, config.d_model).init(device),
            blocks: (0..config.num_layers)
                .map(|i| T5Block::new(config, i == 0, device))
                .collect(),
            final_layer_norm: RmsNorm::new(config.d_model, config.layer_norm_epsilon, device),
            d_model: config.d_model,
        }
    }

    /// Load from a HuggingFace T5 (or T5EncoderModel) checkpoint
    pub fn load(file: &SafeTensorFile, config: &T5Config, device: &B::Device) -> Result<Self, LoadError> {
        let root = WeightScope::root(file);
        let shared = if root.contains("shared.weight") {
            root.embedding("shared", config.vocab_size, config.d_model, device)?
        } else {
            root.push("encoder")
                .embedding("embed_tokens", config.vocab_size, config.d_model, device)?
        };

        let encoder = root.push("encoder");
        let eps = config.layer_norm_epsilon;
        let inner = config.inner_dim();
        let mut blocks = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let layer = encoder.push("block").push(i).push("layer");
            let attn_scope = layer.push(0);
            let sa = attn_scope.push("SelfAttention");
            let relative_attention_bias = if i == 0 {
                Some(sa.embedding(
                    "relative_attention_bias",
                    config.relative_attention_num_buckets,
                    config.num_heads,
                    device,
                )?)
            } else {
                None
            };
            let attn = T5Attention {
                q: sa.linear("q", config.d_model, inner, false, device)?,
                k: sa.linear("k", config.d_model, inner, false, device)?,
                v: sa.linear("v", config.d_model, inner, false, device)?,
                o: sa.linear("o", inner, config.d_model, false, device)?,
                relative_attention_bias,
                num_heads: config.num_heads,
                num_buckets: config.relative_attention_num_buckets,
                max_distance: config.relative_attention_max_distance,
            };

            let ffn_scope = layer.push(1);
            let dense = ffn_scope.push("DenseReluDense");
            let ffn = GatedGeluFfn {
                gate_proj: dense.linear("wi_0", config.d_model, config.d_ff, false, device)?,
                up_proj: dense.linear("wi_1", config.d_model, config.d_ff, false, device)?,
                down_proj: dense.linear("wo", config.d_ff, config.d_model, false, device)?,
            };

            blocks.push(T5Block {
                attn_norm: attn_scope.rms_norm("layer_norm", config.d_model, eps, device)?,
                attn,
                ffn_norm: ffn_scope.rms_norm("layer_norm", config.d_model, eps, device)?,
                ffn,
            });
        }

        tracing::info!(
            layers = config.num_layers,
            d_model = config.d_model,
            parameters = file.num_parameters(),
            "loaded T5 encoder"
        );

        Ok(Self {
            shared,
            blocks,
            final_layer_norm: encoder.rms_norm("final_layer_norm", config.d_model, eps, device)?,
            d_model: config.d_model,
        })
    }

    /// Load `model.safetensors` with the config from `config.json`
    pub fn load_dir(dir: impl AsRef<Path>, device: &B::Device) -> Result<(Self, T5Config), TextError> {
        let dir = dir.as_ref();
        let config_path = dir.join("config.json");
        let json = std::fs::read_to_string(&config_path).map_err(|source| TextError::Io {
            path: config_path.clone(),
            source,
        })?;
        let config = T5Config::from_json(&json).map_err(|source| TextError::Config {
            path: config_path,
            source,
        })?;

        let file = SafeTensorFile::open(dir.join("model.safetensors"))?;
        Ok((Self::load(&file, &config, device)?, config))
    }

    /// Encode token ids
    ///
    /// * `ids` - `[batch, len]`
    /// * `mask` - `[batch, len]`, `true` on real tokens
    ///
    /// Returns `[batch, len, d_model]`.
    pub fn forward(&self, ids: Tensor<B, 2, Int>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let [_, len] = ids.dims();
        let device = ids.device();
        let mut x = self.shared.forward(ids);

        let padding = key_padding_bias(mask);
        let bias = match self.blocks.first().and_then(|b| b.attn.position_bias(len, &device)) {
            Some(position) => position + padding,
            None => padding,
        };

        for block in &self.blocks {
            x = block.forward(x, bias.clone());
        }
        self.final_layer_norm.forward(x)
    }
}

impl<B: Backend> TextEncoder<B> for T5Encoder<B> {
    fn forward(&self, ids: Tensor<B, 2, Int>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        T5Encoder::forward(self, ids, mask)
    }

    fn embed_dim(&self) -> usize {
        self.d_model
    }
}
