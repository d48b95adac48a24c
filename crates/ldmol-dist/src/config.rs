//! Per-rank run configuration

use crate::DistError;

/// Identity of one rank within a run
///
/// Built explicitly by the launcher and handed to the [`crate::Coordinator`];
/// nothing here is read from global state after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistConfig {
    pub rank: usize,
    pub world_size: usize,
    pub global_seed: u64,
    /// Accelerator ordinal this rank should bind to
    pub device_index: usize,
}

impl DistConfig {
    pub fn new(rank: usize, world_size: usize, global_seed: u64) -> Result<Self, DistError> {
        if world_size == 0 {
            return Err(DistError::EmptyWorld);
        }
        if rank >= world_size {
            return Err(DistError::InvalidRank { rank, world_size });
        }
        Ok(Self {
            rank,
            world_size,
            global_seed,
            device_index: rank,
        })
    }

    /// Single-rank configuration
    pub fn single(global_seed: u64) -> Self {
        Self {
            rank: 0,
            world_size: 1,
            global_seed,
            device_index: 0,
        }
    }

    pub fn with_device_index(mut self, device_index: usize) -> Self {
        self.device_index = device_index;
        self
    }

    /// Read torchrun-style `RANK`, `WORLD_SIZE` and `LOCAL_RANK`
    ///
    /// Missing variables fall back to a single rank; `LOCAL_RANK` defaults
    /// to `RANK`.
    pub fn from_env(global_seed: u64) -> Result<Self, DistError> {
        Self::from_lookup(global_seed, |var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        global_seed: u64,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, DistError> {
        let read = |var: &'static str| -> Result<Option<usize>, DistError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| DistError::Env { var, value }),
            }
        };
        let rank = read("RANK")?.unwrap_or(0);
        let world_size = read("WORLD_SIZE")?.unwrap_or(1);
        let local_rank = read("LOCAL_RANK")?.unwrap_or(rank);
        Ok(Self::new(rank, world_size, global_seed)?.with_device_index(local_rank))
    }

    pub fn is_main(&self) -> bool {
        self.rank == 0
    }

    pub fn worker_seed(&self) -> u64 {
        worker_seed(self.global_seed, self.world_size, self.rank)
    }
}

/// Seed for one rank: `global_seed * world_size + rank`
pub fn worker_seed(global_seed: u64, world_size: usize, rank: usize) -> u64 {
    global_seed
        .wrapping_mul(world_size as u64)
        .wrapping_add(rank as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_seeds_are_distinct() {
        let seeds: Vec<u64> = (0..4).map(|r| worker_seed(7, 4, r)).collect();
        assert_eq!(seeds, vec![28, 29, 30, 31]);
        assert_eq!(worker_seed(0, 1, 0), 0);
    }

    #[test]
    fn test_invalid_ranks() {
        assert!(matches!(DistConfig::new(0, 0, 0), Err(DistError::EmptyWorld)));
        assert!(matches!(
            DistConfig::new(4, 4, 0),
            Err(DistError::InvalidRank { rank: 4, world_size: 4 })
        ));
    }

    #[test]
    fn test_from_env_lookup() {
        let config = DistConfig::from_lookup(3, |var| match var {
            "RANK" => Some("2".into()),
            "WORLD_SIZE" => Some("4".into()),
            "LOCAL_RANK" => Some("0".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.rank, 2);
        assert_eq!(config.world_size, 4);
        assert_eq!(config.device_index, 0);
        assert_eq!(config.worker_seed(), 14);

        let single = DistConfig::from_lookup(0, |_| None).unwrap();
        assert_eq!(single, DistConfig::single(0));

        let bad = DistConfig::from_lookup(0, |var| (var == "RANK").then(|| "x".into()));
        assert!(matches!(bad, Err(DistError::Env { var: "RANK", .. })));
    }
}
