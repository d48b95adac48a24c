//! Multi-rank behavior: shard coverage and concurrent log appends

use std::collections::BTreeSet;

use ldmol_dist::{Coordinator, DistConfig, OutputLog, OutputRecord, ProcessGroup, ShardedSampler, ThreadGroup};

#[test]
fn test_shards_cover_dataset_exactly_once() {
    for len in [0usize, 1, 7, 64, 101] {
        for world_size in 1..=8 {
            let mut seen = Vec::new();
            for rank in 0..world_size {
                let shard = ShardedSampler::new(len, world_size, rank).with_shuffle(3);
                let indices = shard.indices();
                assert_eq!(indices.len(), shard.num_samples());
                seen.extend(indices);
            }
            seen.sort_unstable();
            assert_eq!(seen, (0..len).collect::<Vec<_>>(), "len {} world {}", len, world_size);
        }
    }
}

#[test]
fn test_shards_are_disjoint_across_epochs() {
    for epoch in 0..3 {
        let shards: Vec<BTreeSet<usize>> = (0..4)
            .map(|rank| {
                let mut s = ShardedSampler::new(30, 4, rank).with_shuffle(11);
                s.set_epoch(epoch);
                s.indices().into_iter().collect()
            })
            .collect();
        for i in 0..4 {
            for j in i + 1..4 {
                assert!(shards[i].is_disjoint(&shards[j]));
            }
        }
    }
}

#[test]
fn test_concurrent_ranks_append_whole_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated.txt");
    let world_size = 4;
    let len = 37;
    let batch = 5;

    ThreadGroup::spawn(world_size, |group| {
        let config = DistConfig::new(group.rank(), group.world_size(), 0).unwrap();
        let coordinator = Coordinator::init(config, group).unwrap();
        let log = if coordinator.is_main() {
            OutputLog::create(&path).unwrap()
        } else {
            OutputLog::open(&path)
        };
        coordinator.barrier().unwrap();

        let indices = coordinator.shard(len).indices();
        for chunk in indices.chunks(batch) {
            let records: Vec<OutputRecord> = chunk
                .iter()
                .map(|i| OutputRecord::new(format!("T{}", i), format!("G{}", i)))
                .collect();
            log.append(&records).unwrap();
        }
        coordinator.barrier().unwrap();
        coordinator.shutdown().unwrap();
    })
    .unwrap();

    let lines = OutputLog::open(&path).read_lines().unwrap();
    assert_eq!(lines.len(), len);
    let mut targets: Vec<usize> = lines
        .iter()
        .map(|line| {
            let (target, generated) = line.split_once('\t').unwrap();
            assert_eq!(&target[1..], &generated[1..]);
            target[1..].parse().unwrap()
        })
        .collect();
    targets.sort_unstable();
    assert_eq!(targets, (0..len).collect::<Vec<_>>());
}
