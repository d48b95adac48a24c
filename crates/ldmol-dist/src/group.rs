//! Process groups: rank identity plus a global barrier

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crate::DistError;

/// A set of ranks that can wait for each other
///
/// Barriers never time out: a rank that dies leaves the others waiting.
pub trait ProcessGroup {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Block until every rank has reached this barrier
    fn barrier(&self) -> Result<(), DistError>;

    /// Release group resources; the group must not be used afterwards
    fn shutdown(&self) -> Result<(), DistError> {
        Ok(())
    }
}

/// Ranks running as threads of one process
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
}

impl ThreadGroup {
    /// Run `f` once per rank on its own thread and collect the results in
    /// rank order
    pub fn spawn<F, T>(world_size: usize, f: F) -> Result<Vec<T>, DistError>
    where
        F: Fn(ThreadGroup) -> T + Sync,
        T: Send,
    {
        if world_size == 0 {
            return Err(DistError::EmptyWorld);
        }
        let barrier = Arc::new(Barrier::new(world_size));
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..world_size)
                .map(|rank| {
                    let group = ThreadGroup {
                        rank,
                        world_size,
                        barrier: Arc::clone(&barrier),
                    };
                    thread::Builder::new()
                        .name(format!("rank-{}", rank))
                        .spawn_scoped(scope, move || f(group))
                        .map_err(DistError::io(format!("rank-{}", rank)))
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle?
                        .join()
                        .map_err(|_| DistError::RankPanicked { rank })
                })
                .collect()
        })
    }

    /// A single-rank group whose barrier returns immediately
    pub fn solo() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            barrier: Arc::new(Barrier::new(1)),
        }
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) -> Result<(), DistError> {
        self.barrier.wait();
        Ok(())
    }
}

/// Interval between marker-file polls
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Ranks running as separate processes that share a directory
///
/// Barrier `g` completes once `barrier-g-<rank>` exists for every rank.
/// The directory must be fresh for each run.
#[derive(Debug)]
pub struct FileGroup {
    dir: PathBuf,
    rank: usize,
    world_size: usize,
    generation: AtomicU64,
}

impl FileGroup {
    pub fn join(dir: impl AsRef<Path>, rank: usize, world_size: usize) -> Result<Self, DistError> {
        if world_size == 0 {
            return Err(DistError::EmptyWorld);
        }
        if rank >= world_size {
            return Err(DistError::InvalidRank { rank, world_size });
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(DistError::io(&dir))?;
        Ok(Self {
            dir,
            rank,
            world_size,
            generation: AtomicU64::new(0),
        })
    }

    fn marker(&self, generation: u64, rank: usize) -> PathBuf {
        self.dir.join(format!("barrier-{}-{}", generation, rank))
    }
}

impl ProcessGroup for FileGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) -> Result<(), DistError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let own = self.marker(generation, self.rank);
        fs::write(&own, b"").map_err(DistError::io(&own))?;

        let mut waiting: Vec<usize> = (0..self.world_size).collect();
        loop {
            waiting.retain(|&r| !self.marker(generation, r).exists());
            if waiting.is_empty() {
                break;
            }
            tracing::trace!(rank = self.rank, generation, pending = waiting.len(), "waiting at barrier");
            thread::sleep(POLL_INTERVAL);
        }

        // Every rank has arrived here, so all have left the previous barrier
        if generation > 0 {
            let stale = self.marker(generation - 1, self.rank);
            let _ = fs::remove_file(stale);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_thread_group_barrier_orders_phases() {
        let events = Mutex::new(Vec::new());
        let ranks = ThreadGroup::spawn(4, |group| {
            events.lock().unwrap().push(("before", group.rank()));
            group.barrier().unwrap();
            events.lock().unwrap().push(("after", group.rank()));
            group.rank()
        })
        .unwrap();

        assert_eq!(ranks, vec![0, 1, 2, 3]);
        let events = events.into_inner().unwrap();
        let first_after = events.iter().position(|(phase, _)| *phase == "after").unwrap();
        assert_eq!(first_after, 4);
    }

    #[test]
    fn test_thread_group_rejects_empty_world() {
        assert!(matches!(ThreadGroup::spawn(0, |_| ()), Err(DistError::EmptyWorld)));
    }

    #[test]
    fn test_file_group_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let results = ThreadGroup::spawn(3, |threads| {
            let group = FileGroup::join(&path, threads.rank(), 3).unwrap();
            group.barrier().unwrap();
            group.barrier().unwrap();
            group.world_size()
        })
        .unwrap();
        assert_eq!(results, vec![3, 3, 3]);
        assert!(dir.path().join("barrier-1-0").exists());
    }
}
