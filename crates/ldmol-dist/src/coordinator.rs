//! Per-rank view of a distributed run

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::DistConfig;
use crate::group::ProcessGroup;
use crate::sampler::ShardedSampler;
use crate::DistError;

/// Bundles a rank's configuration with its process group
pub struct Coordinator<G: ProcessGroup> {
    config: DistConfig,
    group: G,
}

impl<G: ProcessGroup> Coordinator<G> {
    /// Check that `config` and `group` agree on rank and world size
    pub fn init(config: DistConfig, group: G) -> Result<Self, DistError> {
        if group.world_size() != config.world_size || group.rank() != config.rank {
            return Err(DistError::InvalidRank {
                rank: config.rank,
                world_size: group.world_size(),
            });
        }
        tracing::info!(
            rank = config.rank,
            seed = config.worker_seed(),
            world_size = config.world_size,
            "starting rank"
        );
        Ok(Self { config, group })
    }

    pub fn config(&self) -> &DistConfig {
        &self.config
    }

    pub fn rank(&self) -> usize {
        self.config.rank
    }

    pub fn world_size(&self) -> usize {
        self.config.world_size
    }

    pub fn is_main(&self) -> bool {
        self.config.is_main()
    }

    pub fn barrier(&self) -> Result<(), DistError> {
        tracing::debug!(rank = self.config.rank, "barrier");
        self.group.barrier()
    }

    /// Shuffled shard of `0..len` for this rank, seeded by the global seed
    pub fn shard(&self, len: usize) -> ShardedSampler {
        ShardedSampler::new(len, self.config.world_size, self.config.rank).with_shuffle(self.config.global_seed)
    }

    pub fn worker_seed(&self) -> u64 {
        self.config.worker_seed()
    }

    /// Fresh RNG seeded with this rank's worker seed
    pub fn worker_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.worker_seed())
    }

    pub fn shutdown(self) -> Result<(), DistError> {
        tracing::debug!(rank = self.config.rank, "shutting down");
        self.group.shutdown()
    }
}
