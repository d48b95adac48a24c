//! Decoding random latents through a freshly initialized BERT decoder

use burn::prelude::*;
use burn_ndarray::NdArray;
use ldmol_autoencoder::{BertDecoderConfig, DecodeStrategy, LatentDecoder, SmilesTokenizer};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

type TestBackend = NdArray<f32>;

const VOCAB: &str = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\nC\nc\nO\nN\n(\n)\n=\n1\n[nH]\nCl\nBr\n";
const MAX_LEN: usize = 10;

fn decoder(strategy: DecodeStrategy) -> LatentDecoder<TestBackend, ldmol_autoencoder::BertSmilesDecoder<TestBackend>> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocab.txt");
    std::fs::write(&path, VOCAB).unwrap();
    let tokenizer = SmilesTokenizer::from_file(&path).unwrap().with_max_len(MAX_LEN);
    assert_eq!(tokenizer.vocab_size(), 16);

    let model = BertDecoderConfig::tiny(tokenizer.vocab_size()).init(&Default::default());
    LatentDecoder::new(model, tokenizer, strategy)
}

fn latent() -> Tensor<TestBackend, 4> {
    let values: Vec<f32> = (0..96).map(|i| (i as f32 * 0.73).sin() * 1.5).collect();
    Tensor::from_data(TensorData::new(values, [3, 4, 8, 1]), &Default::default())
}

#[test]
fn test_every_strategy_yields_vocabulary_smiles() {
    let latent = latent();
    for strategy in [
        DecodeStrategy::Greedy,
        DecodeStrategy::Beam { width: 3 },
        DecodeStrategy::TopK { k: 4 },
    ] {
        let decoder = decoder(strategy);
        let out = decoder
            .decode(latent.clone(), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert_eq!(out.len(), 3, "{:?}", strategy);

        let tokenizer = decoder.tokenizer();
        let unk = tokenizer.special().unk;
        for smiles in &out {
            assert!(tokenizer.tokenize(smiles).len() < MAX_LEN, "{:?}: {}", strategy, smiles);
            assert!(!tokenizer.encode(smiles).contains(&unk), "{:?}: {}", strategy, smiles);
        }
    }
}

#[test]
fn test_decoding_is_reproducible() {
    let latent = latent();

    let greedy = decoder(DecodeStrategy::Greedy);
    let a = greedy.decode(latent.clone(), &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
    let b = greedy.decode(latent.clone(), &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
    assert_eq!(a, b);

    let sampled = decoder(DecodeStrategy::TopK { k: 5 });
    let a = sampled.decode(latent.clone(), &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
    let b = sampled.decode(latent, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
    assert_eq!(a, b);
}
