//! `ldmol sample`: sharded generation followed by evaluation on rank 0

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::prelude::*;
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use ldmol::dist::{Coordinator, DistConfig, FileGroup, ProcessGroup, ThreadGroup};
use ldmol::eval::{Aggregator, EvaluationReport};
use ldmol::samplers::DebugConfig;
use ldmol::{CheckpointPaths, Dataset, LdmolPipeline, Text2MolConfig, evaluate_on_main, run_worker};

/// How ranks are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Launcher {
    /// All ranks as threads of this process
    Threads,
    /// One rank per process; `RANK` / `WORLD_SIZE` come from the environment
    Env,
}

/// Float precision for the compute backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Precision {
    /// 32-bit float (most stable)
    F32,
    /// 16-bit float (faster matmuls on GPU backends)
    F16,
}

impl From<Precision> for ldmol::Precision {
    fn from(p: Precision) -> Self {
        match p {
            Precision::F32 => ldmol::Precision::F32,
            Precision::F16 => ldmol::Precision::F16,
        }
    }
}

/// Compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Device {
    /// CPU (ndarray)
    #[cfg(feature = "ndarray")]
    Cpu,
    /// WebGPU (Vulkan/Metal/DX12)
    #[cfg(feature = "wgpu")]
    Wgpu,
    /// NVIDIA CUDA GPU
    #[cfg(feature = "cuda")]
    Cuda,
}

#[derive(Args, Debug, Clone)]
pub struct SampleArgs {
    /// Dataset with `target<TAB>description` lines
    #[arg(long)]
    pub data: PathBuf,

    /// Shared output log
    #[arg(short, long, default_value = "generated_molecules_t2m.txt")]
    pub output: PathBuf,

    /// Denoiser checkpoint (.safetensors)
    #[arg(long)]
    pub dit: PathBuf,

    /// Autoencoder checkpoint (.safetensors)
    #[arg(long)]
    pub autoencoder: PathBuf,

    /// SMILES vocabulary, one token per line
    #[arg(long)]
    pub vocab: PathBuf,

    /// Text encoder directory (model.safetensors, config.json, tokenizer.json)
    #[arg(long)]
    pub text_encoder: PathBuf,

    /// Classifier-free guidance scale (>= 1.0; 1.0 disables guidance)
    #[arg(long, default_value = "7.5")]
    pub cfg_scale: f64,

    /// Timestep respacing, e.g. "100" or "ddim50"
    #[arg(long, default_value = "100")]
    pub num_sampling_steps: String,

    #[arg(long, default_value = "64")]
    pub per_proc_batch_size: usize,

    /// Token length of description embeddings
    #[arg(long, default_value = "256")]
    pub description_length: usize,

    #[arg(long, default_value = "0")]
    pub global_seed: u64,

    /// Beam width (or top-k candidates with --stochastic)
    #[arg(short, long, default_value = "1")]
    pub k: usize,

    /// Sample tokens from the top k instead of searching
    #[arg(long)]
    pub stochastic: bool,

    /// Attention heads of the denoiser
    #[arg(long, default_value = "16")]
    pub dit_heads: usize,

    /// Attention heads of the SMILES decoder
    #[arg(long, default_value = "12")]
    pub decoder_heads: usize,

    #[arg(long, value_enum, default_value = "f32")]
    pub precision: Precision,

    #[arg(long, value_enum)]
    pub device: Option<Device>,

    #[arg(long, value_enum, default_value = "threads")]
    pub launcher: Launcher,

    /// Number of ranks (threads launcher, or env launcher with --rank)
    #[arg(long, default_value = "1")]
    pub world_size: usize,

    /// This process's rank (env launcher); read from `RANK` when absent
    #[arg(long)]
    pub rank: Option<usize>,

    /// Fresh directory for barrier files (env launcher)
    #[arg(long)]
    pub rendezvous: Option<PathBuf>,

    /// Also write the report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Debug modes (comma-separated): sampler, nan, all
    #[arg(long, value_delimiter = ',', num_args = 0.., default_missing_value = "all")]
    pub debug: Vec<String>,
}

impl SampleArgs {
    pub fn to_config(&self) -> Text2MolConfig {
        let mut config = Text2MolConfig::new(CheckpointPaths {
            dit: self.dit.clone(),
            autoencoder: self.autoencoder.clone(),
            vocab: self.vocab.clone(),
            text_encoder: self.text_encoder.clone(),
        });
        config.cfg_scale = self.cfg_scale;
        config.num_sampling_steps = self.num_sampling_steps.clone();
        config.per_proc_batch_size = self.per_proc_batch_size;
        config.description_length = self.description_length;
        config.global_seed = self.global_seed;
        config.k = self.k;
        config.stochastic = self.stochastic;
        config.precision = self.precision.into();
        config.dit_heads = self.dit_heads;
        config.decoder_heads = self.decoder_heads;
        config.debug = debug_flags(&self.debug);
        config
    }

    fn aggregator(&self) -> Aggregator {
        match &self.report_json {
            Some(path) => Aggregator::new().with_json_output(path),
            None => Aggregator::new(),
        }
    }
}

fn debug_flags(debug: &[String]) -> DebugConfig {
    let all = debug.iter().any(|s| s == "all");
    DebugConfig {
        sampler: all || debug.iter().any(|s| s == "sampler"),
        nan: all || debug.iter().any(|s| s == "nan"),
    }
}

fn default_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        return Ok(Device::Cuda);
    }
    #[cfg(all(feature = "wgpu", not(feature = "cuda")))]
    {
        return Ok(Device::Wgpu);
    }
    #[cfg(all(feature = "ndarray", not(any(feature = "cuda", feature = "wgpu"))))]
    {
        return Ok(Device::Cpu);
    }
    #[allow(unreachable_code)]
    {
        anyhow::bail!("No backend enabled. Enable 'ndarray', 'wgpu' or 'cuda'.")
    }
}

pub fn run(args: SampleArgs) -> Result<()> {
    let config = args.to_config();
    config.validate()?;

    let device = match args.device {
        Some(device) => device,
        None => default_device()?,
    };
    tracing::info!(?device, precision = ?args.precision, launcher = ?args.launcher, "sampling");

    match device {
        #[cfg(feature = "ndarray")]
        Device::Cpu => {
            use burn_ndarray::NdArray;
            run_with_backend::<NdArray<f32>>(&args, &config, |_| Default::default())
        }

        #[cfg(feature = "wgpu")]
        Device::Wgpu => {
            use burn_wgpu::{Wgpu, WgpuDevice};
            match args.precision {
                Precision::F16 => run_with_backend::<Wgpu<half::f16>>(&args, &config, |_| WgpuDevice::default()),
                Precision::F32 => run_with_backend::<Wgpu<f32>>(&args, &config, |_| WgpuDevice::default()),
            }
        }

        #[cfg(feature = "cuda")]
        Device::Cuda => {
            use burn_cuda::{Cuda, CudaDevice};
            match args.precision {
                Precision::F16 => run_with_backend::<Cuda<half::f16>>(&args, &config, CudaDevice::new),
                Precision::F32 => run_with_backend::<Cuda<f32>>(&args, &config, CudaDevice::new),
            }
        }
    }
}

/// `device_for` maps a local rank to its device. Thread ranks share device 0.
fn run_with_backend<B: Backend>(
    args: &SampleArgs,
    config: &Text2MolConfig,
    device_for: fn(usize) -> B::Device,
) -> Result<()> {
    match args.launcher {
        Launcher::Threads => {
            let device = device_for(0);
            let results = ThreadGroup::spawn(args.world_size, |group| {
                let dist = DistConfig::new(group.rank(), group.world_size(), config.global_seed)?;
                run_rank::<B, _>(args, config, dist, group, &device)
            })?;
            for result in results {
                result?;
            }
            Ok(())
        }
        Launcher::Env => {
            let dir = args
                .rendezvous
                .as_ref()
                .context("--rendezvous is required with --launcher env")?;
            let dist = match args.rank {
                Some(rank) => DistConfig::new(rank, args.world_size, config.global_seed)?,
                None => DistConfig::from_env(config.global_seed)?,
            };
            let group = FileGroup::join(dir, dist.rank, dist.world_size)?;
            let device = device_for(dist.device_index);
            run_rank::<B, _>(args, config, dist, group, &device).map(|_| ())
        }
    }
}

fn run_rank<B: Backend, G: ProcessGroup>(
    args: &SampleArgs,
    config: &Text2MolConfig,
    dist: DistConfig,
    group: G,
    device: &B::Device,
) -> Result<Option<EvaluationReport>> {
    let coordinator = Coordinator::init(dist, group)?;
    let dataset = Dataset::from_file(&args.data).context("failed to read dataset")?;
    let pipeline = LdmolPipeline::<B>::load(config, device).context("failed to load models")?;

    let progress = coordinator.is_main().then(progress_bar).transpose()?;
    let summary = run_worker(
        &pipeline,
        &coordinator,
        &dataset,
        &args.output,
        config.per_proc_batch_size,
        |p| {
            if let Some(pb) = &progress {
                pb.set_length(p.total as u64);
                pb.set_position(p.batch as u64);
            }
        },
    )?;
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    tracing::info!(rank = summary.rank, samples = summary.samples, "shard done");

    let report = evaluate_on_main(&coordinator, &args.aggregator(), &args.output)?;
    if let Some(report) = &report {
        print_report(report, &args.output);
        tracing::info!(elapsed = ?summary.started.elapsed(), "run complete");
    }
    coordinator.shutdown()?;
    Ok(report)
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} batches {elapsed_precise}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

pub fn print_report(report: &EvaluationReport, log: &Path) {
    println!("\nEvaluation of {}:", log.display());
    println!("{}", report);
}
