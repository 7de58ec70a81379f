//! Stress tests: concurrent writers against storage and the coordinator

use bytes::Bytes;
use hatokuse::common::ReadOrder;
use hatokuse::leader::{Coordinator, LocalConnector, MemberRegistry};
use hatokuse::{DiskStorage, IoMode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn stress_same_key_writers_never_corrupt() {
    for mode in IoMode::ALL {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DiskStorage::open(dir.path(), mode).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let body = Bytes::from(vec![b'a' + t; 4096 + t as usize * 100]);
                    for _ in 0..25 {
                        store.put("shared", body.clone()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Whatever writer won, the file holds exactly one writer's body.
        store.clear_cache();
        let body = store.get("shared").unwrap();
        let first = body[0];
        assert!(body.iter().all(|&b| b == first), "mixed body in {}", mode);
        assert_eq!(body.len(), 4096 + (first - b'a') as usize * 100);
        assert_eq!(store.count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_clients() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(LocalConnector::new(dir.path(), IoMode::Buffered));
    let registry = Arc::new(MemberRegistry::new(connector, Duration::from_secs(10)));
    for i in 1..=6 {
        registry
            .register(&format!("m{}", i), "127.0.0.1", 0)
            .unwrap();
    }
    let coordinator = Arc::new(Coordinator::new(registry.clone(), 2, ReadOrder::Shuffled));

    let clients = 8;
    let per_client = 100;
    let start = Instant::now();

    let tasks: Vec<_> = (0..clients)
        .map(|c| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                for i in 0..per_client {
                    let key = format!("c{}-k{}", c, i);
                    let body = Bytes::from(format!("body {} {}", c, i));
                    coordinator.set(&key, body.clone()).await.unwrap();
                    assert_eq!(coordinator.get(&key).await.unwrap(), body);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let elapsed = start.elapsed();
    println!("{} SET+GET pairs: {:?}", clients * per_client, elapsed);

    let stats = coordinator.stats();
    assert_eq!(stats.placements, clients * per_client);
    assert_eq!(stats.rotations, (clients * per_client) as u64);

    // Three groups of two share the writes evenly.
    let snapshot_counts: Vec<usize> = (1..=6)
        .map(|i| {
            DiskStorage::open(dir.path().join(format!("m{}", i)), IoMode::Buffered)
                .unwrap()
                .count()
        })
        .collect();
    let total: usize = snapshot_counts.iter().sum();
    assert_eq!(total, 2 * clients * per_client);
    for count in &snapshot_counts {
        assert!(
            (*count as i64 - (total / 6) as i64).abs() <= 1,
            "unbalanced: {:?}",
            snapshot_counts
        );
    }
    assert!(elapsed.as_secs_f64() < 60.0, "Too slow");
}
