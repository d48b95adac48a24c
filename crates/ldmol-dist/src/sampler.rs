//! Dataset sharding across ranks

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Assigns each rank a strided slice of a (optionally shuffled) index
/// permutation
///
/// Unlike padding samplers, shards are not equalized: the union over all
/// ranks is exactly `0..len`, each index once.
#[derive(Debug, Clone)]
pub struct ShardedSampler {
    len: usize,
    world_size: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
}

impl ShardedSampler {
    /// # Panics
    ///
    /// If `world_size` is 0 or `rank >= world_size`.
    pub fn new(len: usize, world_size: usize, rank: usize) -> Self {
        assert!(world_size > 0, "world size must be at least 1");
        assert!(rank < world_size, "rank {} out of range for world size {}", rank, world_size);
        Self {
            len,
            world_size,
            rank,
            shuffle: false,
            seed: 0,
            epoch: 0,
        }
    }

    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Full permutation shared by every rank for the current epoch
    pub fn permutation(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Indices owned by this rank, in visiting order
    pub fn indices(&self) -> Vec<usize> {
        self.permutation()
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }

    /// Number of indices owned by this rank
    pub fn num_samples(&self) -> usize {
        self.len.saturating_sub(self.rank).div_ceil(self.world_size)
    }
}
