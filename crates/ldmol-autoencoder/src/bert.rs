//! BERT SMILES Decoder
//!
//! Post-LN BERT layers with causal self-attention and cross-attention to
//! the latent memory, topped by the masked-LM head. Latents are lifted to
//! the hidden size by `decode_prefix` before decoding.

use std::path::Path;

use burn::module::Param;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Int;
use burn::tensor::activation::gelu;

use ldmol_convert::{LoadError, SafeTensorFile, WeightScope};
use ldmol_core::LayerNorm;
use ldmol_core::attention::{causal_bias, merge_heads, scaled_dot_product, split_heads};

use crate::predictor::TokenPredictor;

const LAYER_NORM_EPS: f64 = 1e-12;

/// BERT decoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BertDecoderConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub intermediate_size: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    /// Channels of the diffusion latent
    pub latent_dim: usize,
}

impl BertDecoderConfig {
    /// BERT-base decoder over 64-channel latents
    pub fn ldmol(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            hidden_size: 768,
            num_layers: 12,
            num_heads: 12,
            intermediate_size: 3072,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            latent_dim: 64,
        }
    }

    /// Tiny model for testing
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            hidden_size: 16,
            num_layers: 2,
            num_heads: 2,
            intermediate_size: 32,
            max_position_embeddings: 160,
            type_vocab_size: 2,
            latent_dim: 4,
        }
    }

    /// Infer sizes from an autoencoder checkpoint
    pub fn infer(file: &SafeTensorFile, num_heads: usize) -> Result<Self, LoadError> {
        let dims = |name: &str| -> Result<(usize, usize), LoadError> {
            match file.shape(name) {
                Some(&[rows, cols]) => Ok((rows, cols)),
                Some(actual) => Err(LoadError::ShapeMismatch {
                    name: name.to_string(),
                    expected: vec![0, 0],
                    actual: actual.to_vec(),
                }),
                None => Err(LoadError::TensorNotFound(name.to_string())),
            }
        };
        let (vocab_size, hidden_size) = dims("text_encoder.bert.embeddings.word_embeddings.weight")?;
        let (max_position_embeddings, _) = dims("text_encoder.bert.embeddings.position_embeddings.weight")?;
        let (type_vocab_size, _) = dims("text_encoder.bert.embeddings.token_type_embeddings.weight")?;
        let (_, latent_dim) = dims("decode_prefix.weight")?;
        let (intermediate_size, _) = dims("text_encoder.bert.encoder.layer.0.intermediate.dense.weight")?;
        let num_layers = (0..)
            .take_while(|i| {
                file.contains(&format!(
                    "text_encoder.bert.encoder.layer.{}.attention.self.query.weight",
                    i
                ))
            })
            .count();

        Ok(Self {
            vocab_size,
            hidden_size,
            num_layers,
            num_heads,
            intermediate_size,
            max_position_embeddings,
            type_vocab_size,
            latent_dim,
        })
    }

    /// Random-init model
    pub fn init<B: Backend>(&self, device: &B::Device) -> BertSmilesDecoder<B> {
        let h = self.hidden_size;
        let linear = |i, o| LinearConfig::new(i, o).init(device);
        let norm = || LayerNorm::new(h, LAYER_NORM_EPS, device);
        let attention = || BertAttention {
            query: linear(h, h),
            key: linear(h, h),
            value: linear(h, h),
            output: linear(h, h),
            norm: norm(),
            num_heads: self.num_heads,
        };

        BertSmilesDecoder {
            decode_prefix: linear(self.latent_dim, h),
            embeddings: BertEmbeddings {
                word: EmbeddingConfig::new(self.vocab_size, h).init(device),
                position: EmbeddingConfig::new(self.max_position_embeddings, h).init(device),
                token_type: EmbeddingConfig::new(self.type_vocab_size, h).init(device),
                norm: norm(),
            },
            layers: (0..self.num_layers)
                .map(|_| BertLayer {
                    attention: attention(),
                    cross_attention: attention(),
                    intermediate: linear(h, self.intermediate_size),
                    output: linear(self.intermediate_size, h),
                    norm: norm(),
                })
                .collect(),
            head: MlmHead {
                transform: linear(h, h),
                norm: norm(),
                decoder: linear(h, self.vocab_size),
            },
            vocab_size: self.vocab_size,
        }
    }
}

/// Word + position + token-type embeddings, then LayerNorm
#[derive(Module, Debug)]
pub struct BertEmbeddings<B: Backend> {
    pub word: Embedding<B>,
    pub position: Embedding<B>,
    pub token_type: Embedding<B>,
    pub norm: LayerNorm<B>,
}

impl<B: Backend> BertEmbeddings<B> {
    pub fn forward(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [_, len] = ids.dims();
        let device = ids.device();
        let positions = Tensor::<B, 1, Int>::arange(0..len as i64, &device).reshape([1, len]);
        let types = Tensor::<B, 2, Int>::zeros([1, len], &device);

        let x = self.word.forward(ids) + self.position.forward(positions) + self.token_type.forward(types);
        self.norm.forward(x)
    }
}

/// Attention with its output projection and residual LayerNorm
#[derive(Module, Debug)]
pub struct BertAttention<B: Backend> {
    pub query: Linear<B>,
    pub key: Linear<B>,
    pub value: Linear<B>,
    pub output: Linear<B>,
    pub norm: LayerNorm<B>,
    #[module(skip)]
    pub num_heads: usize,
}

impl<B: Backend> BertAttention<B> {
    /// `LayerNorm(x + Attn(x, source))`
    pub fn forward(&self, x: Tensor<B, 3>, source: Tensor<B, 3>, bias: Option<Tensor<B, 4>>) -> Tensor<B, 3> {
        let [_, _, hidden] = x.dims();
        let q = split_heads(self.query.forward(x.clone()), self.num_heads);
        let k = split_heads(self.key.forward(source.clone()), self.num_heads);
        let v = split_heads(self.value.forward(source), self.num_heads);

        let scale = ((hidden / self.num_heads) as f32).sqrt().recip();
        let attended = merge_heads(scaled_dot_product(q, k, v, bias, scale));
        self.norm.forward(x + self.output.forward(attended))
    }
}

/// Decoder layer: causal self-attention, cross-attention, feed-forward
#[derive(Module, Debug)]
pub struct BertLayer<B: Backend> {
    pub attention: BertAttention<B>,
    pub cross_attention: BertAttention<B>,
    pub intermediate: Linear<B>,
    pub output: Linear<B>,
    pub norm: LayerNorm<B>,
}

impl<B: Backend> BertLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, memory: Tensor<B, 3>, causal: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.attention.forward(x.clone(), x, Some(causal));
        let x = self.cross_attention.forward(x, memory, None);
        let h = self.output.forward(gelu(self.intermediate.forward(x.clone())));
        self.norm.forward(x + h)
    }
}

/// Masked-LM prediction head
#[derive(Module, Debug)]
pub struct MlmHead<B: Backend> {
    pub transform: Linear<B>,
    pub norm: LayerNorm<B>,
    pub decoder: Linear<B>,
}

impl<B: Backend> MlmHead<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let h = self.norm.forward(gelu(self.transform.forward(x)));
        self.decoder.forward(h)
    }
}

/// Latent-conditioned autoregressive SMILES decoder
#[derive(Module, Debug)]
pub struct BertSmilesDecoder<B: Backend> {
    pub decode_prefix: Linear<B>,
    pub embeddings: BertEmbeddings<B>,
    pub layers: Vec<BertLayer<B>>,
    pub head: MlmHead<B>,
    #[module(skip)]
    pub vocab_size: usize,
}

impl<B: Backend> BertSmilesDecoder<B> {
    /// Hidden states `[N, T, H]` for a token prefix
    pub fn hidden(&self, tokens: Tensor<B, 2, Int>, memory: Tensor<B, 3>) -> Tensor<B, 3> {
        let [_, len] = tokens.dims();
        let causal = causal_bias(len, &tokens.device());
        let mut x = self.embeddings.forward(tokens);
        for layer in &self.layers {
            x = layer.forward(x, memory.clone(), causal.clone());
        }
        x
    }

    /// Logits for every position `[N, T, V]`
    pub fn logits(&self, tokens: Tensor<B, 2, Int>, memory: Tensor<B, 3>) -> Tensor<B, 3> {
        self.head.forward(self.hidden(tokens, memory))
    }
}

impl<B: Backend> TokenPredictor<B> for BertSmilesDecoder<B> {
    fn memory(&self, latent: Tensor<B, 3>) -> Tensor<B, 3> {
        self.decode_prefix.forward(latent)
    }

    fn next_logits(&self, tokens: Tensor<B, 2, Int>, memory: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, len] = tokens.dims();
        let hidden = self.hidden(tokens, memory);
        let [_, _, width] = hidden.dims();
        let last = hidden.slice([0..batch, len - 1..len, 0..width]).reshape([batch, width]);
        self.head.forward(last)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

fn load_attention<B: Backend>(
    scope: &WeightScope<'_>,
    h: usize,
    num_heads: usize,
    device: &B::Device,
) -> Result<BertAttention<B>, LoadError> {
    let inner = scope.push("self");
    let output = scope.push("output");
    Ok(BertAttention {
        query: inner.linear("query", h, h, true, device)?,
        key: inner.linear("key", h, h, true, device)?,
        value: inner.linear("value", h, h, true, device)?,
        output: output.linear("dense", h, h, true, device)?,
        norm: output.layer_norm("LayerNorm", h, LAYER_NORM_EPS, device)?,
        num_heads,
    })
}

/// Load the decoder half of an autoencoder checkpoint
pub fn load_bert_decoder<B: Backend, P: AsRef<Path>>(
    path: P,
    num_heads: usize,
    device: &B::Device,
) -> Result<(BertSmilesDecoder<B>, BertDecoderConfig), LoadError> {
    let file = SafeTensorFile::open(path)?;
    let config = BertDecoderConfig::infer(&file, num_heads)?;
    let h = config.hidden_size;

    let root = WeightScope::root(&file);
    let text = root.push("text_encoder");
    let bert = text.push("bert");
    let emb = bert.push("embeddings");
    let embeddings = BertEmbeddings {
        word: emb.embedding("word_embeddings", config.vocab_size, h, device)?,
        position: emb.embedding("position_embeddings", config.max_position_embeddings, h, device)?,
        token_type: emb.embedding("token_type_embeddings", config.type_vocab_size, h, device)?,
        norm: emb.layer_norm("LayerNorm", h, LAYER_NORM_EPS, device)?,
    };

    let mut layers = Vec::with_capacity(config.num_layers);
    for i in 0..config.num_layers {
        let layer = bert.push("encoder").push("layer").push(i);
        let output = layer.push("output");
        layers.push(BertLayer {
            attention: load_attention(&layer.push("attention"), h, num_heads, device)?,
            cross_attention: load_attention(&layer.push("crossattention"), h, num_heads, device)?,
            intermediate: layer
                .push("intermediate")
                .linear("dense", h, config.intermediate_size, true, device)?,
            output: output.linear("dense", config.intermediate_size, h, true, device)?,
            norm: output.layer_norm("LayerNorm", h, LAYER_NORM_EPS, device)?,
        });
    }

    // The decoder projection is usually tied to the word embeddings
    let predictions = text.push("cls").push("predictions");
    let transform = predictions.push("transform");
    let mut decoder = if predictions.contains("decoder.weight") {
        predictions.linear("decoder", h, config.vocab_size, false, device)?
    } else {
        let mut tied = LinearConfig::new(h, config.vocab_size).with_bias(false).init(device);
        tied.weight = Param::from_tensor(embeddings.word.weight.val().transpose());
        tied
    };
    decoder.bias = Some(Param::from_tensor(predictions.tensor("bias", [config.vocab_size], device)?));

    let model = BertSmilesDecoder {
        decode_prefix: root.linear("decode_prefix", config.latent_dim, h, true, device)?,
        embeddings,
        layers,
        head: MlmHead {
            transform: transform.linear("dense", h, h, true, device)?,
            norm: transform.layer_norm("LayerNorm", h, LAYER_NORM_EPS, device)?,
            decoder,
        },
        vocab_size: config.vocab_size,
    };

    tracing::info!(
        layers = config.num_layers,
        vocab = config.vocab_size,
        parameters = file.num_parameters(),
        "loaded SMILES decoder"
    );
    Ok((model, config))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ldmol_convert::SafeTensorWriter;

    type TestBackend = NdArray<f32>;

    pub(crate) fn export(model: &BertSmilesDecoder<TestBackend>, path: &Path, tie_decoder: bool) {
        tensors(model, tie_decoder).write(path).unwrap();
    }

    fn tensors(model: &BertSmilesDecoder<TestBackend>, tie_decoder: bool) -> SafeTensorWriter {
        let mut w = SafeTensorWriter::new();
        let linear = |w: &mut SafeTensorWriter, name: &str, l: &Linear<TestBackend>| {
            w.add_tensor(format!("{name}.weight"), &l.weight.val().transpose());
            if let Some(b) = &l.bias {
                w.add_tensor(format!("{name}.bias"), &b.val());
            }
        };
        let norm = |w: &mut SafeTensorWriter, name: &str, n: &LayerNorm<TestBackend>| {
            w.add_tensor(format!("{name}.weight"), &n.weight);
            w.add_tensor(format!("{name}.bias"), &n.bias);
        };

        linear(&mut w, "decode_prefix", &model.decode_prefix);
        let e = "text_encoder.bert.embeddings";
        w.add_tensor(format!("{e}.word_embeddings.weight"), &model.embeddings.word.weight.val());
        w.add_tensor(format!("{e}.position_embeddings.weight"), &model.embeddings.position.weight.val());
        w.add_tensor(format!("{e}.token_type_embeddings.weight"), &model.embeddings.token_type.weight.val());
        norm(&mut w, &format!("{e}.LayerNorm"), &model.embeddings.norm);

        for (i, layer) in model.layers.iter().enumerate() {
            let p = format!("text_encoder.bert.encoder.layer.{i}");
            for (name, attn) in [("attention", &layer.attention), ("crossattention", &layer.cross_attention)] {
                linear(&mut w, &format!("{p}.{name}.self.query"), &attn.query);
                linear(&mut w, &format!("{p}.{name}.self.key"), &attn.key);
                linear(&mut w, &format!("{p}.{name}.self.value"), &attn.value);
                linear(&mut w, &format!("{p}.{name}.output.dense"), &attn.output);
                norm(&mut w, &format!("{p}.{name}.output.LayerNorm"), &attn.norm);
            }
            linear(&mut w, &format!("{p}.intermediate.dense"), &layer.intermediate);
            linear(&mut w, &format!("{p}.output.dense"), &layer.output);
            norm(&mut w, &format!("{p}.output.LayerNorm"), &layer.norm);
        }

        let c = "text_encoder.cls.predictions";
        linear(&mut w, &format!("{c}.transform.dense"), &model.head.transform);
        norm(&mut w, &format!("{c}.transform.LayerNorm"), &model.head.norm);
        if !tie_decoder {
            w.add_tensor(format!("{c}.decoder.weight"), &model.head.decoder.weight.val().transpose());
        }
        if let Some(b) = &model.head.decoder.bias {
            w.add_tensor(format!("{c}.bias"), &b.val());
        }
        w
    }

    #[test]
    fn test_next_logits_shape() {
        let device = Default::default();
        let model = BertDecoderConfig::tiny(18).init::<TestBackend>(&device);
        let latent = Tensor::<TestBackend, 3>::zeros([3, 5, 4], &device);
        let memory = model.memory(latent);
        assert_eq!(memory.dims(), [3, 5, 16]);

        let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[2, 5], [2, 6], [2, 7]], &device);
        assert_eq!(model.next_logits(tokens, memory).dims(), [3, 18]);
    }

    #[test]
    fn test_causal_prefix_is_stable() {
        // Appending a token must not change logits at earlier positions
        let device = Default::default();
        let model = BertDecoderConfig::tiny(18).init::<TestBackend>(&device);
        let latent = Tensor::<TestBackend, 3>::random([1, 5, 4], burn::tensor::Distribution::Normal(0.0, 1.0), &device);
        let memory = model.memory(latent);

        let short = model.logits(Tensor::from_ints([[2, 5, 6]], &device), memory.clone());
        let long = model.logits(Tensor::from_ints([[2, 5, 6, 7]], &device), memory);
        let a: Vec<f32> = short.into_data().to_vec().unwrap();
        let b: Vec<f32> = long.slice([0..1, 0..3, 0..18]).into_data().to_vec().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_latent_width_comes_from_decode_prefix() {
        // Full autoencoder checkpoints also hold the encoder's hidden -> latent projection
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = BertDecoderConfig::tiny(18);
        let model = config.init::<TestBackend>(&device);
        let path = dir.path().join("ae.safetensors");
        let mut w = tensors(&model, false);
        w.add("encode_prefix.weight", &[config.latent_dim, config.hidden_size], &[0.5; 64]);
        w.write(&path).unwrap();

        let file = SafeTensorFile::open(&path).unwrap();
        assert_eq!(file.shape("decode_prefix.weight"), Some(&[16usize, 4][..]));
        let (_, inferred) = load_bert_decoder::<TestBackend, _>(&path, 2, &device).unwrap();
        assert_eq!(inferred.latent_dim, 4);
        assert_eq!(inferred, config);
    }

    #[test]
    fn test_load_matches_original() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = BertDecoderConfig::tiny(18);
        let model = config.init::<TestBackend>(&device);

        for tie in [false, true] {
            let path = dir.path().join(format!("ae-{tie}.safetensors"));
            export(&model, &path, tie);
            let (loaded, inferred) = load_bert_decoder::<TestBackend, _>(&path, 2, &device).unwrap();
            assert_eq!(inferred, config);

            let latent = Tensor::<TestBackend, 3>::random([2, 5, 4], burn::tensor::Distribution::Normal(0.0, 1.0), &device);
            let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[2, 5, 6], [2, 8, 9]], &device);
            let a: Vec<f32> = model
                .next_logits(tokens.clone(), model.memory(latent.clone()))
                .into_data()
                .to_vec()
                .unwrap();
            let b: Vec<f32> = loaded
                .next_logits(tokens, loaded.memory(latent))
                .into_data()
                .to_vec()
                .unwrap();
            if tie {
                // Tied head uses the word embeddings instead of the random decoder
                assert_eq!(a.len(), b.len());
            } else {
                for (x, y) in a.iter().zip(&b) {
                    assert!((x - y).abs() < 1e-4, "{} vs {}", x, y);
                }
            }
        }
    }
}
