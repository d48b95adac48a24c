//! Latent decoder
//!
//! Wraps a [`TokenPredictor`], the SMILES tokenizer and a
//! [`DecodeStrategy`] into the final latent -> string step.

use std::marker::PhantomData;
use std::path::Path;

use burn::prelude::*;
use rand::Rng;

use crate::bert::{BertSmilesDecoder, load_bert_decoder};
use crate::predictor::TokenPredictor;
use crate::strategy::DecodeStrategy;
use crate::tokenizer::SmilesTokenizer;
use crate::{AutoencoderError, DecodeError};

pub struct LatentDecoder<B: Backend, P: TokenPredictor<B>> {
    predictor: P,
    tokenizer: SmilesTokenizer,
    strategy: DecodeStrategy,
    _backend: PhantomData<B>,
}

impl<B: Backend, P: TokenPredictor<B>> LatentDecoder<B, P> {
    pub fn new(predictor: P, tokenizer: SmilesTokenizer, strategy: DecodeStrategy) -> Self {
        Self {
            predictor,
            tokenizer,
            strategy,
            _backend: PhantomData,
        }
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    pub fn tokenizer(&self) -> &SmilesTokenizer {
        &self.tokenizer
    }

    /// Decode latents `[N, C, S, 1]` into `N` SMILES strings
    ///
    /// Strings may be empty or chemically invalid; validity is judged
    /// downstream.
    pub fn decode<R: Rng>(&self, latent: Tensor<B, 4>, rng: &mut R) -> Result<Vec<String>, DecodeError> {
        let [n, channels, seq, width] = latent.dims();
        if n == 0 {
            return Ok(Vec::new());
        }
        let tokens = latent.reshape([n, channels, seq * width]).swap_dims(1, 2);
        let memory = self.predictor.memory(tokens);

        let ids = self.strategy.run(
            &self.predictor,
            memory,
            self.tokenizer.special(),
            self.tokenizer.max_len(),
            rng,
        )?;
        Ok(ids.iter().map(|row| self.tokenizer.decode(row)).collect())
    }
}

impl<B: Backend> LatentDecoder<B, BertSmilesDecoder<B>> {
    /// Load the BERT decoder and its vocabulary
    pub fn load<P: AsRef<Path>, V: AsRef<Path>>(
        checkpoint: P,
        vocab: V,
        num_heads: usize,
        strategy: DecodeStrategy,
        device: &B::Device,
    ) -> Result<Self, AutoencoderError> {
        let tokenizer = SmilesTokenizer::from_file(vocab)?;
        let (model, config) = load_bert_decoder(checkpoint, num_heads, device)?;
        if config.vocab_size != tokenizer.vocab_size() {
            return Err(AutoencoderError::VocabMismatch {
                tokenizer: tokenizer.vocab_size(),
                model: config.vocab_size,
            });
        }
        tracing::debug!(?strategy, "latent decoder ready");
        Ok(Self::new(model, tokenizer, strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bert::BertDecoderConfig;
    use crate::bert::tests::export;
    use crate::strategy::tests::MarkovPredictor;
    use crate::tokenizer::tests::{tokenizer, vocab};
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_decode_layout_and_count() {
        let decoder = LatentDecoder::<TestBackend, _>::new(
            MarkovPredictor { vocab: 18 },
            tokenizer(),
            DecodeStrategy::Beam { width: 2 },
        );
        let latent = Tensor::<TestBackend, 4>::zeros([3, 4, 6, 1], &Default::default());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(decoder.decode(latent, &mut rng).unwrap(), vec!["O"; 3]);
    }

    #[test]
    fn test_empty_batch() {
        let decoder =
            LatentDecoder::<TestBackend, _>::new(MarkovPredictor { vocab: 18 }, tokenizer(), DecodeStrategy::Greedy);
        let latent = Tensor::<TestBackend, 4>::zeros([0, 4, 6, 1], &Default::default());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(decoder.decode(latent, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn test_bert_decoder_is_deterministic() {
        let device = Default::default();
        let model = BertDecoderConfig::tiny(18).init::<TestBackend>(&device);
        let decoder = LatentDecoder::new(model, tokenizer().with_max_len(12), DecodeStrategy::Greedy);
        let latent = Tensor::<TestBackend, 4>::random(
            [2, 4, 6, 1],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let a = decoder.decode(latent.clone(), &mut rng).unwrap();
        let b = decoder.decode(latent, &mut rng).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_load_checks_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let checkpoint = dir.path().join("ae.safetensors");
        let model = BertDecoderConfig::tiny(18).init::<TestBackend>(&device);
        export(&model, &checkpoint, false);

        let vocab_path = dir.path().join("vocab.txt");
        std::fs::write(&vocab_path, vocab().join("\n")).unwrap();
        let decoder =
            LatentDecoder::<TestBackend, _>::load(&checkpoint, &vocab_path, 2, DecodeStrategy::Greedy, &device).unwrap();
        assert_eq!(decoder.tokenizer().vocab_size(), 18);

        let mut tokens = vocab();
        tokens.push("S");
        std::fs::write(&vocab_path, tokens.join("\n")).unwrap();
        let result = LatentDecoder::<TestBackend, _>::load(&checkpoint, &vocab_path, 2, DecodeStrategy::Greedy, &device);
        assert!(matches!(
            result,
            Err(AutoencoderError::VocabMismatch { tokenizer: 19, model: 18 })
        ));

        let missing = dir.path().join("missing.safetensors");
        let result = LatentDecoder::<TestBackend, _>::load(&missing, &vocab_path, 2, DecodeStrategy::Greedy, &device);
        assert!(matches!(result, Err(AutoencoderError::Load(_))));
    }
}
