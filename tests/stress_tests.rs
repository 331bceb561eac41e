// Stress Tests for lsmkv
// These tests are marked with #[ignore] and are intended to be run manually
// Run with: cargo test --release -- --ignored --nocapture

use lsmkv::config::CompactionStrategy;
use lsmkv::{Options, DB};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn init_logger() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Writers hammer the store for a fixed window
#[test]
#[ignore]
fn stress_high_frequency_writes() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_capacity(5000).sync_wal(false);
    let db = Arc::new(DB::open(dir.path(), options).unwrap());

    let duration = Duration::from_secs(30);
    let start = Instant::now();
    let operations = Arc::new(AtomicUsize::new(0));
    let stop_flag = Arc::new(AtomicBool::new(false));

    let mut handles = vec![];
    for thread_id in 0..8 {
        let db_clone = Arc::clone(&db);
        let ops_clone = Arc::clone(&operations);
        let stop_clone = Arc::clone(&stop_flag);

        handles.push(thread::spawn(move || {
            let mut local_ops = 0;
            while !stop_clone.load(Ordering::Relaxed) {
                let key = format!("stress_key_{}_{}", thread_id, local_ops);
                let value = format!("stress_value_{}", local_ops);
                if db_clone.put(&key, value.as_bytes()).unwrap() {
                    local_ops += 1;
                    ops_clone.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    thread::sleep(duration);
    stop_flag.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    let elapsed = start.elapsed();
    let total_ops = operations.load(Ordering::Relaxed);
    println!("=== High-Frequency Write Stress Test ===");
    println!("Duration: {:.2}s", elapsed.as_secs_f64());
    println!("Total operations: {}", total_ops);
    println!("Throughput: {:.0} ops/s", total_ops as f64 / elapsed.as_secs_f64());

    // Spot check the first and last writes of one thread
    assert_eq!(db.get("stress_key_0_0").unwrap(), Some(b"stress_value_0".to_vec()));
    db.verify_integrity().unwrap();
}

/// Mixed puts, deletes and reads checked against an in-memory model
#[test]
#[ignore]
fn stress_mixed_workload_against_model() {
    init_logger();
    for strategy in [CompactionStrategy::SizeTiered, CompactionStrategy::Leveled] {
        let dir = TempDir::new().unwrap();
        let options = Options::default()
            .memtable_capacity(200)
            .sstable_size(150)
            .compaction(strategy)
            .sync_wal(false);
        let db = DB::open(dir.path(), options.clone()).unwrap();

        let mut model = std::collections::BTreeMap::new();
        let mut rng = rand::rng();
        let start = Instant::now();

        for op in 0..50_000u32 {
            let key = format!("key{:05}", rng.random_range(0..5000u32));
            match rng.random_range(0..10) {
                0..=5 => {
                    let value = format!("v{}", op);
                    db.put(&key, value.as_bytes()).unwrap();
                    model.insert(key, value.into_bytes());
                }
                6 => {
                    db.delete(&key).unwrap();
                    model.remove(&key);
                }
                _ => assert_eq!(db.get(&key).unwrap(), model.get(&key).cloned(), "{}", key),
            }
        }
        println!("{:?}: 50k ops in {:.2}s", strategy, start.elapsed().as_secs_f64());

        db.close().unwrap();
        drop(db);

        let db = DB::open(dir.path(), options).unwrap();
        let all = db.range_scan("", "~", model.len().max(1), 1).unwrap();
        assert_eq!(all, model.values().cloned().collect::<Vec<_>>());
        db.verify_integrity().unwrap();
    }
}

/// Large values cycling through flush and compaction
#[test]
#[ignore]
fn stress_large_values() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default().memtable_capacity(16)).unwrap();

    let value_size = 256 * 1024;
    let start = Instant::now();
    for i in 0..200 {
        let value = vec![(i % 256) as u8; value_size];
        db.put(&format!("large_{:04}", i), &value).unwrap();
    }
    println!("Wrote 200 x {} KiB in {:.2}s", value_size / 1024, start.elapsed().as_secs_f64());

    for i in (0..200).step_by(17) {
        let value = db.get(&format!("large_{:04}", i)).unwrap().unwrap();
        assert_eq!(value.len(), value_size);
        assert!(value.iter().all(|&b| b == (i % 256) as u8));
    }
}

/// Repeated open, write, crash-free close cycles
#[test]
#[ignore]
fn stress_reopen_cycles() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_capacity(64).sync_wal(false);

    for cycle in 0..50 {
        let db = DB::open(dir.path(), options.clone()).unwrap();
        for i in 0..100 {
            db.put(&format!("cycle_{:02}_{:03}", cycle, i), b"x").unwrap();
        }
        if cycle % 2 == 0 {
            db.close().unwrap();
        }
    }

    let db = DB::open(dir.path(), options).unwrap();
    for cycle in 0..50 {
        let prefix = format!("cycle_{:02}_", cycle);
        assert_eq!(db.prefix_scan(&prefix, 1000, 1).unwrap().len(), 100, "cycle {}", cycle);
    }
}
