//! Per-rank sampling loop
//!
//! Every rank generates molecules for its shard and appends
//! `(target, generated)` lines to the shared log. Rank 0 truncates the log
//! before the first barrier and evaluates it after the last one.

use std::path::Path;
use std::time::Instant;

use burn::prelude::*;
use ldmol_autoencoder::TokenPredictor;
use ldmol_dist::{Coordinator, OutputLog, OutputRecord, ProcessGroup};
use ldmol_eval::{Aggregator, EvaluationReport};
use ldmol_samplers::Denoiser;
use ldmol_text::TextEncoder;

use crate::LdmolError;
use crate::dataset::Dataset;
use crate::pipeline::Text2Mol;

/// Progress after one appended batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based batch counter
    pub batch: usize,
    pub total: usize,
    /// Samples in this batch
    pub samples: usize,
}

/// What a rank wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rank: usize,
    pub batches: usize,
    pub samples: usize,
    /// When every rank had finished initializing
    pub started: Instant,
}

/// Sample this rank's shard of `dataset` into the log at `output`
///
/// Blocks at two barriers: once every rank has finished initializing, and
/// after this rank's last append.
pub fn run_worker<B, E, D, P, G, F>(
    pipeline: &Text2Mol<B, E, D, P>,
    coordinator: &Coordinator<G>,
    dataset: &Dataset,
    output: &Path,
    batch_size: usize,
    mut on_batch: F,
) -> Result<WorkerSummary, LdmolError>
where
    B: Backend,
    E: TextEncoder<B>,
    D: Denoiser<B>,
    P: TokenPredictor<B>,
    G: ProcessGroup,
    F: FnMut(BatchProgress),
{
    let rank = coordinator.rank();
    let log = if coordinator.is_main() {
        OutputLog::create(output)?
    } else {
        OutputLog::open(output)
    };
    coordinator.barrier()?;
    let started = Instant::now();

    let indices = coordinator.shard(dataset.len()).indices();
    let total = indices.len().div_ceil(batch_size.max(1));
    let mut rng = coordinator.worker_rng();
    let mut summary = WorkerSummary {
        rank,
        batches: 0,
        samples: 0,
        started,
    };
    tracing::info!(rank, samples = indices.len(), batches = total, "sampling shard");

    for (i, batch) in dataset.batches(&indices, batch_size).enumerate() {
        let descriptions: Vec<&str> = batch.iter().map(|s| s.description.as_str()).collect();
        let generated = pipeline.generate(&descriptions, &mut rng)?;
        let records: Vec<OutputRecord> = batch
            .iter()
            .zip(generated)
            .map(|(sample, smiles)| OutputRecord::new(&sample.target, smiles))
            .collect();
        log.append(&records)?;

        summary.batches += 1;
        summary.samples += records.len();
        tracing::debug!(rank, batch = i + 1, total, "appended batch");
        on_batch(BatchProgress {
            batch: i + 1,
            total,
            samples: records.len(),
        });
    }

    coordinator.barrier()?;
    tracing::info!(rank, samples = summary.samples, "rank finished");
    Ok(summary)
}

/// Score the finished log on rank 0; other ranks return `None`
pub fn evaluate_on_main<G: ProcessGroup>(
    coordinator: &Coordinator<G>,
    aggregator: &Aggregator,
    output: &Path,
) -> Result<Option<EvaluationReport>, LdmolError> {
    if !coordinator.is_main() {
        return Ok(None);
    }
    Ok(Some(aggregator.run(output)?))
}
