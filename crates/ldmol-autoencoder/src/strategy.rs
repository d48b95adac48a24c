//! Token selection strategies
//!
//! All strategies grow every sequence from `[CLS]` one token at a time and
//! stop once each row has emitted `[SEP]` or reached the length cap. Token
//! choice happens on the host so ties break the same way on every backend.

use burn::prelude::*;
use burn::tensor::Int;
use burn::tensor::activation::log_softmax;
use rand::Rng;

use crate::DecodeError;
use crate::predictor::TokenPredictor;
use crate::tokenizer::SpecialTokens;

/// How the next token is picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Arg-max at every step
    Greedy,
    /// Beam search, highest summed log-probability wins
    Beam { width: usize },
    /// Sample from the `k` most likely tokens
    TopK { k: usize },
}

impl DecodeStrategy {
    /// Map the sampling flags onto a strategy
    ///
    /// `k` below 1 is treated as 1.
    pub fn from_options(stochastic: bool, k: usize) -> Self {
        let k = k.max(1);
        match (stochastic, k) {
            (true, k) => Self::TopK { k },
            (false, 1) => Self::Greedy,
            (false, width) => Self::Beam { width },
        }
    }

    /// Decode token ids for every row of `memory` (`[N, S, H]`)
    ///
    /// Each returned sequence starts with `[CLS]` and holds at most
    /// `max_len` ids.
    pub fn run<B, P, R>(
        &self,
        predictor: &P,
        memory: Tensor<B, 3>,
        special: SpecialTokens,
        max_len: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<u32>>, DecodeError>
    where
        B: Backend,
        P: TokenPredictor<B>,
        R: Rng,
    {
        match *self {
            Self::Greedy => greedy(predictor, memory, special, max_len),
            Self::Beam { width } => beam(predictor, memory, special, max_len, width),
            Self::TopK { k } => top_k(predictor, memory, special, max_len, k, rng),
        }
    }
}

fn token_tensor<B: Backend>(sequences: &[Vec<u32>], device: &B::Device) -> Tensor<B, 2, Int> {
    let len = sequences.first().map_or(0, Vec::len);
    let data: Vec<i32> = sequences.iter().flatten().map(|&id| id as i32).collect();
    Tensor::from_data(TensorData::new(data, [sequences.len(), len]), device)
}

/// Log-probabilities of the next token, one host row per sequence
fn next_log_probs<B, P>(
    predictor: &P,
    sequences: &[Vec<u32>],
    memory: &Tensor<B, 3>,
) -> Result<Vec<Vec<f32>>, DecodeError>
where
    B: Backend,
    P: TokenPredictor<B>,
{
    let tokens = token_tensor::<B>(sequences, &memory.device());
    let logits = predictor.next_logits(tokens, memory.clone());
    let [rows, vocab] = logits.dims();
    let values: Vec<f32> = log_softmax(logits, 1)
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| DecodeError::Data(format!("{:?}", e)))?;
    debug_assert_eq!(values.len(), rows * vocab);
    Ok(values.chunks(vocab).map(<[f32]>::to_vec).collect())
}

/// Index of the first maximum
fn argmax(row: &[f32]) -> u32 {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best as u32
}

/// Token ids ordered by descending score, first index wins ties
fn ranked(row: &[f32]) -> Vec<u32> {
    let mut order: Vec<u32> = (0..row.len() as u32).collect();
    order.sort_by(|&a, &b| row[b as usize].total_cmp(&row[a as usize]));
    order
}

fn greedy<B, P>(
    predictor: &P,
    memory: Tensor<B, 3>,
    special: SpecialTokens,
    max_len: usize,
) -> Result<Vec<Vec<u32>>, DecodeError>
where
    B: Backend,
    P: TokenPredictor<B>,
{
    let rows = memory.dims()[0];
    let mut sequences = vec![vec![special.cls]; rows];
    let mut finished = vec![false; rows];

    for _ in 1..max_len {
        let log_probs = next_log_probs(predictor, &sequences, &memory)?;
        for ((seq, done), row) in sequences.iter_mut().zip(finished.iter_mut()).zip(&log_probs) {
            let next = if *done { special.pad } else { argmax(row) };
            *done |= next == special.sep;
            seq.push(next);
        }
        if finished.iter().all(|&d| d) {
            break;
        }
    }
    Ok(sequences)
}

fn top_k<B, P, R>(
    predictor: &P,
    memory: Tensor<B, 3>,
    special: SpecialTokens,
    max_len: usize,
    k: usize,
    rng: &mut R,
) -> Result<Vec<Vec<u32>>, DecodeError>
where
    B: Backend,
    P: TokenPredictor<B>,
    R: Rng,
{
    let rows = memory.dims()[0];
    let mut sequences = vec![vec![special.cls]; rows];
    let mut finished = vec![false; rows];

    for _ in 1..max_len {
        let log_probs = next_log_probs(predictor, &sequences, &memory)?;
        for ((seq, done), row) in sequences.iter_mut().zip(finished.iter_mut()).zip(&log_probs) {
            let next = if *done { special.pad } else { sample_top_k(row, k, rng) };
            *done |= next == special.sep;
            seq.push(next);
        }
        if finished.iter().all(|&d| d) {
            break;
        }
    }
    Ok(sequences)
}

/// Draw one of the `k` best tokens with probability renormalized over them
fn sample_top_k<R: Rng>(row: &[f32], k: usize, rng: &mut R) -> u32 {
    let candidates: Vec<u32> = ranked(row).into_iter().take(k).collect();
    let top = row[candidates[0] as usize];
    let weights: Vec<f32> = candidates.iter().map(|&id| (row[id as usize] - top).exp()).collect();
    let total: f32 = weights.iter().sum();

    let mut target = rng.random::<f32>() * total;
    for (&id, &w) in candidates.iter().zip(&weights) {
        if target < w {
            return id;
        }
        target -= w;
    }
    // Rounding left the draw past the last bucket
    candidates[candidates.len() - 1]
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
    finished: bool,
}

fn beam<B, P>(
    predictor: &P,
    memory: Tensor<B, 3>,
    special: SpecialTokens,
    max_len: usize,
    width: usize,
) -> Result<Vec<Vec<u32>>, DecodeError>
where
    B: Backend,
    P: TokenPredictor<B>,
{
    let [rows, seq, hidden] = memory.dims();
    // Row r's beams occupy r * width .. (r + 1) * width
    let memory = memory
        .unsqueeze_dim::<4>(1)
        .repeat_dim(1, width)
        .reshape([rows * width, seq, hidden]);

    // Only the first beam is live at the start so duplicates never compete
    let mut beams: Vec<Vec<Beam>> = (0..rows)
        .map(|_| {
            (0..width)
                .map(|b| Beam {
                    tokens: vec![special.cls],
                    score: if b == 0 { 0.0 } else { f32::NEG_INFINITY },
                    finished: false,
                })
                .collect()
        })
        .collect();

    for _ in 1..max_len {
        if beams.iter().flatten().all(|b| b.finished) {
            break;
        }
        let sequences: Vec<Vec<u32>> = beams.iter().flatten().map(|b| b.tokens.clone()).collect();
        let log_probs = next_log_probs(predictor, &sequences, &memory)?;

        for (r, row_beams) in beams.iter_mut().enumerate() {
            let mut candidates: Vec<Beam> = Vec::with_capacity(width * width);
            for (b, current) in row_beams.iter().enumerate() {
                if current.finished {
                    let mut tokens = current.tokens.clone();
                    tokens.push(special.pad);
                    candidates.push(Beam {
                        tokens,
                        score: current.score,
                        finished: true,
                    });
                    continue;
                }
                let scores = &log_probs[r * width + b];
                for id in ranked(scores).into_iter().take(width) {
                    let mut tokens = current.tokens.clone();
                    tokens.push(id);
                    candidates.push(Beam {
                        tokens,
                        score: current.score + scores[id as usize],
                        finished: id == special.sep,
                    });
                }
            }
            // Stable sort keeps earlier beams ahead on equal scores
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            candidates.truncate(width);
            *row_beams = candidates;
        }
    }

    Ok(beams
        .into_iter()
        .map(|row_beams| {
            row_beams
                .into_iter()
                .next()
                .map(|b| b.tokens)
                .unwrap_or_else(|| vec![special.cls])
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tokenizer::tests::tokenizer;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray<f32>;

    const CLS: u32 = 2;
    const SEP: u32 = 3;
    const C: u32 = 5;
    const LOWER_C: u32 = 6;
    const O: u32 = 7;
    const N: u32 = 8;

    /// Next-token distribution that only depends on the previous token
    ///
    /// After `[CLS]`: C 0.55, O 0.45. After C: five-way tie between
    /// `[SEP]`, C, c, O and N. After O: `[SEP]` 0.9. Otherwise `[SEP]`.
    pub(crate) struct MarkovPredictor {
        pub vocab: usize,
    }

    impl MarkovPredictor {
        fn distribution(&self, last: u32) -> Vec<f32> {
            let mut p = vec![1e-6f32; self.vocab];
            match last {
                CLS => {
                    p[C as usize] = 0.55;
                    p[O as usize] = 0.45;
                }
                C => {
                    for id in [SEP, C, LOWER_C, O, N] {
                        p[id as usize] = 0.2;
                    }
                }
                O => {
                    p[SEP as usize] = 0.9;
                    p[N as usize] = 0.1;
                }
                _ => p[SEP as usize] = 1.0,
            }
            p.into_iter().map(f32::ln).collect()
        }
    }

    impl TokenPredictor<TestBackend> for MarkovPredictor {
        fn memory(&self, latent: Tensor<TestBackend, 3>) -> Tensor<TestBackend, 3> {
            latent
        }

        fn next_logits(
            &self,
            tokens: Tensor<TestBackend, 2, Int>,
            _memory: Tensor<TestBackend, 3>,
        ) -> Tensor<TestBackend, 2> {
            let [rows, len] = tokens.dims();
            let ids: Vec<i64> = tokens.into_data().convert::<i64>().to_vec().unwrap();
            let logits: Vec<f32> = (0..rows)
                .flat_map(|r| self.distribution(ids[r * len + len - 1] as u32))
                .collect();
            Tensor::from_data(TensorData::new(logits, [rows, self.vocab]), &Default::default())
        }

        fn vocab_size(&self) -> usize {
            self.vocab
        }
    }

    /// Always predicts C, never `[SEP]`
    struct EndlessPredictor;

    impl TokenPredictor<TestBackend> for EndlessPredictor {
        fn memory(&self, latent: Tensor<TestBackend, 3>) -> Tensor<TestBackend, 3> {
            latent
        }

        fn next_logits(
            &self,
            tokens: Tensor<TestBackend, 2, Int>,
            _memory: Tensor<TestBackend, 3>,
        ) -> Tensor<TestBackend, 2> {
            let rows = tokens.dims()[0];
            let mut logits = vec![0.0f32; rows * 18];
            for r in 0..rows {
                logits[r * 18 + C as usize] = 10.0;
            }
            Tensor::from_data(TensorData::new(logits, [rows, 18]), &Default::default())
        }

        fn vocab_size(&self) -> usize {
            18
        }
    }

    fn memory(rows: usize) -> Tensor<TestBackend, 3> {
        Tensor::zeros([rows, 3, 4], &Default::default())
    }

    fn run(strategy: DecodeStrategy, rows: usize, seed: u64) -> Vec<String> {
        let tok = tokenizer();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        strategy
            .run(&MarkovPredictor { vocab: 18 }, memory(rows), tok.special(), 10, &mut rng)
            .unwrap()
            .iter()
            .map(|ids| tok.decode(ids))
            .collect()
    }

    #[test]
    fn test_from_options() {
        assert_eq!(DecodeStrategy::from_options(false, 1), DecodeStrategy::Greedy);
        assert_eq!(DecodeStrategy::from_options(false, 0), DecodeStrategy::Greedy);
        assert_eq!(DecodeStrategy::from_options(false, 4), DecodeStrategy::Beam { width: 4 });
        assert_eq!(DecodeStrategy::from_options(true, 1), DecodeStrategy::TopK { k: 1 });
        assert_eq!(DecodeStrategy::from_options(true, 5), DecodeStrategy::TopK { k: 5 });
    }

    #[test]
    fn test_greedy_takes_first_maximum() {
        // C wins the first step, then the tie resolves to [SEP]
        assert_eq!(run(DecodeStrategy::Greedy, 2, 0), vec!["C", "C"]);
    }

    #[test]
    fn test_beam_finds_higher_probability_sequence() {
        // O [SEP] has 0.405 against 0.11 for C [SEP]
        assert_eq!(run(DecodeStrategy::Beam { width: 2 }, 3, 0), vec!["O", "O", "O"]);
    }

    #[test]
    fn test_beam_width_one_matches_greedy() {
        assert_eq!(run(DecodeStrategy::Beam { width: 1 }, 1, 0), run(DecodeStrategy::Greedy, 1, 0));
    }

    #[test]
    fn test_top_k_is_reproducible() {
        let a = run(DecodeStrategy::TopK { k: 3 }, 8, 42);
        let b = run(DecodeStrategy::TopK { k: 3 }, 8, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_top_one_matches_greedy() {
        assert_eq!(run(DecodeStrategy::TopK { k: 1 }, 4, 9), run(DecodeStrategy::Greedy, 4, 9));
    }

    #[test]
    fn test_top_k_stays_in_candidates() {
        // Only C and O are reachable from [CLS] with k = 2
        for s in run(DecodeStrategy::TopK { k: 2 }, 32, 3) {
            assert!(s.starts_with('C') || s.starts_with('O'), "{}", s);
        }
    }

    #[test]
    fn test_length_cap_without_sep() {
        let tok = tokenizer();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for strategy in [DecodeStrategy::Greedy, DecodeStrategy::Beam { width: 3 }] {
            let out = strategy
                .run(&EndlessPredictor, memory(2), tok.special(), 5, &mut rng)
                .unwrap();
            assert!(out.iter().all(|ids| ids.len() == 5));
            assert_eq!(tok.decode(&out[0]), "CCCC");
        }
    }

    #[test]
    fn test_sample_top_k_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let row = [0.0, -1.0, 5.0, 4.9];
        for _ in 0..100 {
            let id = sample_top_k(&row, 2, &mut rng);
            assert!(id == 2 || id == 3);
        }
    }
}
