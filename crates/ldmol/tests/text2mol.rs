//! End-to-end runs with small stand-in networks

use std::path::Path;
use std::time::{Duration, Instant};

use burn::prelude::*;
use burn::tensor::Int;
use burn_ndarray::NdArray;
use ldmol::autoencoder::{DecodeStrategy, LatentDecoder, SmilesTokenizer, TokenPredictor};
use ldmol::core::ConditioningEmbedding;
use ldmol::dist::{Coordinator, DistConfig, OutputLog, ProcessGroup, ThreadGroup};
use ldmol::eval::records::target_key;
use ldmol::eval::{Aggregator, EvalError, dedup_by_target, parse_line};
use ldmol::samplers::{Denoiser, DiffusionConfig, DiffusionSampler, GuidanceScale};
use ldmol::text::{ConditioningEncoder, PromptTokenizer, TextEncoder};
use ldmol::{Dataset, LdmolError, Text2Mol, evaluate_on_main, run_worker};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

type TestBackend = NdArray<f32>;

const CHANNELS: usize = 4;
const SEQ_LEN: usize = 6;

fn write_tokenizer(dir: &Path) -> std::path::PathBuf {
    let json = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "<pad>": 0, "</s>": 1, "<unk>": 2, "a": 3, "molecule": 4, "no": 5, "dsecription": 6, ".": 7 },
            "unk_token": "<unk>"
        }
    }"#;
    let path = dir.join("tokenizer.json");
    std::fs::write(&path, json).unwrap();
    path
}

/// Embeds token ids as constant vectors
struct IdEncoder;

impl TextEncoder<TestBackend> for IdEncoder {
    fn forward(&self, ids: Tensor<TestBackend, 2, Int>, _mask: Tensor<TestBackend, 2, Bool>) -> Tensor<TestBackend, 3> {
        ids.float().unsqueeze_dim::<3>(2).repeat_dim(2, 3)
    }

    fn embed_dim(&self) -> usize {
        3
    }
}

/// Predicts zero noise and zero variance interpolation
struct ZeroDenoiser;

impl Denoiser<TestBackend> for ZeroDenoiser {
    fn in_channels(&self) -> usize {
        CHANNELS
    }

    fn learns_sigma(&self) -> bool {
        true
    }

    fn forward(
        &self,
        x: Tensor<TestBackend, 4>,
        timesteps: &[usize],
        cond: &ConditioningEmbedding<TestBackend>,
    ) -> Tensor<TestBackend, 4> {
        let [b, c, s, w] = x.dims();
        assert_eq!(timesteps.len(), b);
        assert_eq!(cond.batch_size(), b);
        Tensor::zeros([b, 2 * c, s, w], &x.device())
    }
}

/// `C` for latents with a positive mean, `O` otherwise, then `[SEP]`
struct SignPredictor;

impl TokenPredictor<TestBackend> for SignPredictor {
    fn memory(&self, latent: Tensor<TestBackend, 3>) -> Tensor<TestBackend, 3> {
        latent
    }

    fn next_logits(&self, tokens: Tensor<TestBackend, 2, Int>, memory: Tensor<TestBackend, 3>) -> Tensor<TestBackend, 2> {
        let [rows, len] = tokens.dims();
        let means: Vec<f32> = memory.mean_dim(1).mean_dim(2).reshape([rows]).into_data().to_vec().unwrap();
        let mut logits = vec![0.0f32; rows * 8];
        for (r, mean) in means.iter().enumerate() {
            let id = match (len, *mean > 0.0) {
                (1, true) => 5,
                (1, false) => 6,
                _ => 3,
            };
            logits[r * 8 + id] = 10.0;
        }
        Tensor::from_data(TensorData::new(logits, [rows, 8]), &Default::default())
    }

    fn vocab_size(&self) -> usize {
        8
    }
}

fn pipeline(tokenizer: &Path) -> Text2Mol<TestBackend, IdEncoder, ZeroDenoiser, SignPredictor> {
    let device = Default::default();
    let prompt = PromptTokenizer::from_file(tokenizer).unwrap();
    let conditioning = ConditioningEncoder::new(prompt, IdEncoder, 8, &device).unwrap();
    let smiles = SmilesTokenizer::from_tokens(["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "C", "O", "N"]).unwrap();
    let decoder = LatentDecoder::new(SignPredictor, smiles, DecodeStrategy::Greedy);
    let sampler = DiffusionSampler::new(&DiffusionConfig::default().with_sampling_steps("5")).unwrap();
    Text2Mol::new(
        conditioning,
        ZeroDenoiser,
        decoder,
        sampler,
        GuidanceScale::new(2.0).unwrap(),
        SEQ_LEN,
        &device,
    )
}

#[test]
fn test_generate_is_seeded() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&write_tokenizer(dir.path()));
    assert_eq!(pipeline.latent_shape(3), [3, CHANNELS, SEQ_LEN, 1]);
    let descriptions = ["a molecule .", "", "no molecule", "a a a"];

    let a = pipeline
        .generate(&descriptions, &mut ChaCha8Rng::seed_from_u64(11))
        .unwrap();
    let b = pipeline
        .generate(&descriptions, &mut ChaCha8Rng::seed_from_u64(11))
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 4);
    assert!(a.iter().all(|s| s == "C" || s == "O"));

    let mut steps = 0;
    pipeline
        .generate_with_callback(&descriptions[..1], &mut ChaCha8Rng::seed_from_u64(1), |info| {
            steps = info.step;
            assert_eq!(info.total, 5);
        })
        .unwrap();
    assert_eq!(steps, 5);
    assert!(pipeline.generate::<&str, _>(&[], &mut ChaCha8Rng::seed_from_u64(1)).unwrap().is_empty());
}

#[test]
fn test_two_ranks_cover_dataset_once() {
    let dir = tempfile::tempdir().unwrap();
    let tokenizer = write_tokenizer(dir.path());
    let output = dir.path().join("generated.txt");
    // Stale content must not survive the run
    std::fs::write(&output, "stale\tline\n").unwrap();

    let dataset = Dataset::parse(
        "[CLS]C\ta molecule .\nCC\tno molecule\nCCO\ta a\nO\tmolecule\nN\tno\n",
    )
    .unwrap();

    let results = ThreadGroup::spawn(2, |group| {
        let pipeline = pipeline(&tokenizer);
        let config = DistConfig::new(group.rank(), 2, 3).unwrap();
        let coordinator = Coordinator::init(config, group).unwrap();

        let mut batches = 0;
        let summary = run_worker(&pipeline, &coordinator, &dataset, &output, 2, |_| batches += 1).unwrap();
        assert_eq!(summary.batches, batches);
        let report = evaluate_on_main(&coordinator, &Aggregator::new(), &output).unwrap();
        (summary, report)
    })
    .unwrap();

    let written: usize = results.iter().map(|(s, _)| s.samples).sum();
    assert_eq!(written, 5);
    assert!(results[1].1.is_none());

    let report = results[0].1.as_ref().unwrap();
    assert_eq!(report.lines, 5);
    assert_eq!(report.records, 5);
    assert_eq!(report.string.validity, 1.0);

    let mut targets: Vec<String> = OutputLog::open(&output)
        .read_records()
        .unwrap()
        .into_iter()
        .map(|r| r.target)
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["C", "CC", "CCO", "N", "O"]);
}

#[test]
fn test_sampling_clock_starts_after_slowest_rank() {
    let dir = tempfile::tempdir().unwrap();
    let tokenizer = write_tokenizer(dir.path());
    let output = dir.path().join("generated.txt");
    let dataset = Dataset::parse("C\ta molecule .\nO\tno molecule\n").unwrap();
    let launched = Instant::now();

    let results = ThreadGroup::spawn(2, |group| {
        let pipeline = pipeline(&tokenizer);
        let config = DistConfig::new(group.rank(), 2, 0).unwrap();
        let coordinator = Coordinator::init(config, group).unwrap();
        if coordinator.rank() == 1 {
            // Slow model load on one rank
            std::thread::sleep(Duration::from_millis(200));
        }
        run_worker(&pipeline, &coordinator, &dataset, &output, 1, |_| {}).unwrap()
    })
    .unwrap();

    for summary in results {
        assert!(summary.started.duration_since(launched) >= Duration::from_millis(200));
    }
}

#[test]
fn test_four_samples_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let tokenizer = write_tokenizer(dir.path());
    let output = dir.path().join("generated.txt");
    let dataset = Dataset::parse(
        "C1=CC=CC=C1\ta red compound\nc1ccccc1\ta red compound\nXYZ-invalid\tunknown\nCC(=O)O\tsalt form\n",
    )
    .unwrap();

    let results = ThreadGroup::spawn(2, |group| {
        let pipeline = pipeline(&tokenizer);
        let config = DistConfig::new(group.rank(), 2, 0).unwrap();
        let coordinator = Coordinator::init(config, group).unwrap();
        let summary = run_worker(&pipeline, &coordinator, &dataset, &output, 64, |_| {}).unwrap();
        let rejected = match evaluate_on_main(&coordinator, &Aggregator::new(), &output) {
            Ok(None) => None,
            Err(LdmolError::Eval(EvalError::InvalidTarget { target, .. })) => Some(target),
            other => panic!("expected an invalid target on rank 0, got {:?}", other),
        };
        (summary, rejected)
    })
    .unwrap();

    let written: usize = results.iter().map(|(s, _)| s.samples).sum();
    assert_eq!(written, 4);
    assert_eq!(results[0].1.as_deref(), Some("XYZ-invalid"));
    assert_eq!(results[1].1, None);

    let content = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 4);
    // Both benzene drawings collapse onto one record
    let retained = dedup_by_target(lines.iter().map(|l| parse_line(l)).collect(), target_key);
    assert_eq!(retained.len(), 3);
    let expected = retained.iter().position(|r| r.target == "XYZ-invalid").unwrap();
    match Aggregator::new().run(&output) {
        Err(EvalError::InvalidTarget { index, .. }) => assert_eq!(index, expected),
        other => panic!("expected an invalid target, got {:?}", other),
    }
}
