//! Work coordination across sampling ranks
//!
//! Ranks run as threads of one process ([`ThreadGroup`]) or as separate
//! processes rendezvousing through a shared directory ([`FileGroup`]). They
//! share nothing but barriers and the append-only [`OutputLog`].

pub mod config;
pub mod coordinator;
pub mod group;
pub mod log;
pub mod sampler;

use std::path::PathBuf;

use thiserror::Error;

pub use config::{DistConfig, worker_seed};
pub use coordinator::Coordinator;
pub use group::{FileGroup, ProcessGroup, ThreadGroup};
pub use log::{OutputLog, OutputRecord};
pub use sampler::ShardedSampler;

#[derive(Error, Debug)]
pub enum DistError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rank {rank} is out of range for world size {world_size}")]
    InvalidRank { rank: usize, world_size: usize },

    #[error("world size must be at least 1")]
    EmptyWorld,

    #[error("invalid value {value:?} for environment variable {var}")]
    Env { var: &'static str, value: String },

    #[error("rank {rank} panicked")]
    RankPanicked { rank: usize },
}

impl DistError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> DistError {
        let path = path.into();
        move |source| DistError::Io { path, source }
    }
}
