//! ldmol CLI
//!
//! Generates molecules from text descriptions with a latent diffusion
//! model and scores them against reference SMILES.

mod sample;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ldmol::convert::SafeTensorFile;
use ldmol::eval::Aggregator;
use tracing_subscriber::EnvFilter;

use crate::sample::SampleArgs;

#[derive(Parser)]
#[command(name = "ldmol")]
#[command(about = "Text-conditioned molecule generation in pure Rust", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a molecule for every dataset line and evaluate the results
    Sample(SampleArgs),

    /// Score an existing `target<TAB>generated` log
    Evaluate {
        log: PathBuf,

        /// Also write the report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// List the tensors of a safetensors checkpoint
    Info {
        path: PathBuf,

        /// Only show tensors whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,

        /// Skip dtypes and the parameter count
        #[arg(long)]
        shapes_only: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sample(args) => sample::run(args),
        Commands::Evaluate { log, json } => {
            let aggregator = match json {
                Some(path) => Aggregator::new().with_json_output(path),
                None => Aggregator::new(),
            };
            let report = aggregator
                .run(&log)
                .with_context(|| format!("failed to evaluate {}", log.display()))?;
            sample::print_report(&report, &log);
            Ok(())
        }
        Commands::Info {
            path,
            filter,
            shapes_only,
        } => {
            let file = SafeTensorFile::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            println!("{}: {} tensors", path.display(), file.len());
            for line in describe_tensors(&file, filter.as_deref(), shapes_only) {
                println!("{}", line);
            }
            if !shapes_only {
                println!("Total parameters: {}", file.num_parameters());
            }
            Ok(())
        }
    }
}

/// One line per tensor, sorted by name
fn describe_tensors(file: &SafeTensorFile, filter: Option<&str>, shapes_only: bool) -> Vec<String> {
    let mut names: Vec<&str> = file
        .names()
        .filter(|name| filter.is_none_or(|f| name.contains(f)))
        .collect();
    names.sort_unstable();

    names
        .into_iter()
        .map(|name| {
            let shape = file.shape(name).unwrap_or(&[]);
            if shapes_only {
                format!("{} {:?}", name, shape)
            } else {
                let dtype = file.dtype(name).map(|d| format!("{:?}", d)).unwrap_or_default();
                format!("{} {:?} {}", name, shape, dtype)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldmol::convert::SafeTensorWriter;

    #[test]
    fn test_describe_tensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        let mut writer = SafeTensorWriter::new();
        writer
            .add("x_embedder.proj.weight", &[4, 2], &[0.0; 8])
            .add("final_layer.linear.bias", &[3], &[0.0; 3]);
        writer.write(&path).unwrap();

        let file = SafeTensorFile::open(&path).unwrap();
        let lines = describe_tensors(&file, None, true);
        assert_eq!(lines, vec!["final_layer.linear.bias [3]", "x_embedder.proj.weight [4, 2]"]);

        let lines = describe_tensors(&file, Some("embedder"), false);
        assert_eq!(lines, vec!["x_embedder.proj.weight [4, 2] F32"]);
    }

    #[test]
    fn test_parse_evaluate() {
        let cli = Cli::try_parse_from(["ldmol", "evaluate", "log.txt", "--json", "r.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Evaluate { json: Some(_), .. }));
    }
}
