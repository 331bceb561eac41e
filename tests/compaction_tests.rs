//! Integration tests for compaction through the database and the compactor.

use lsmkv::compaction::Compactor;
use lsmkv::config::CompactionStrategy;
use lsmkv::record::Record;
use lsmkv::sstable::{create_sstable, list_level, SSTableReader, TableOptions};
use lsmkv::{Options, DB};
use std::path::Path;
use tempfile::TempDir;

fn init_logger() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn key_ranges(dir: &Path, level: usize) -> Vec<(String, String)> {
    let mut ranges: Vec<(String, String)> = list_level(dir, level)
        .unwrap()
        .into_iter()
        .map(|id| {
            let table = SSTableReader::open(dir, id).unwrap();
            let (lo, hi) = table.key_range();
            (lo.to_string(), hi.to_string())
        })
        .collect();
    ranges.sort();
    ranges
}

fn letters(from: char, to: char, ts: u64) -> Vec<Record> {
    (from..=to).map(|c| Record::new(c.to_string(), format!("{}@{}", c, ts), ts)).collect()
}

/// Five flushes at max_tables_per_level = 5 leave one table on L1
#[test]
fn test_size_tiered_five_flushes_to_one_table() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_capacity(4).max_tables_per_level(5);
    let db = DB::open(dir.path(), options).unwrap();

    for i in 0..16 {
        db.put(&format!("key{:02}", i), format!("v{}", i).as_bytes()).unwrap();
    }
    assert_eq!(db.level_tables().unwrap()[0].len(), 4);

    for i in 16..20 {
        db.put(&format!("key{:02}", i), format!("v{}", i).as_bytes()).unwrap();
    }
    let levels = db.level_tables().unwrap();
    assert!(levels[0].is_empty());
    assert_eq!(levels[1].len(), 1);

    for i in 0..20 {
        assert_eq!(db.get(&format!("key{:02}", i)).unwrap(), Some(format!("v{}", i).into_bytes()));
    }
}

/// Overwrites and deletes survive being folded together
#[test]
fn test_size_tiered_keeps_newest_versions() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default().memtable_capacity(3).max_tables_per_level(3);
    let db = DB::open(dir.path(), options).unwrap();

    db.put("a", b"1").unwrap();
    db.put("b", b"1").unwrap();
    db.put("c", b"1").unwrap();

    db.put("a", b"2").unwrap();
    db.delete("b").unwrap();
    db.put("d", b"2").unwrap();

    db.put("a", b"3").unwrap();
    db.put("e", b"3").unwrap();
    db.put("f", b"3").unwrap();

    let levels = db.level_tables().unwrap();
    assert!(levels[0].is_empty());
    assert_eq!(levels[1].len(), 1);

    assert_eq!(db.get("a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.get("b").unwrap(), None);
    assert_eq!(db.get("c").unwrap(), Some(b"1".to_vec()));
    assert_eq!(
        db.range_scan("a", "z", 10, 1).unwrap(),
        vec![b"3".to_vec(), b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"3".to_vec()]
    );
}

/// Leveled: [a,m] and [g,z] on L0 become disjoint L1 tables covering [a,z]
#[test]
fn test_leveled_overlapping_level_zero() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default()
        .compaction(CompactionStrategy::Leveled)
        .leveled_table_limits(vec![1, 10, 100])
        .sstable_size(5);

    create_sstable(&letters('a', 'm', 1), dir.path(), 0, TableOptions::from(&options)).unwrap();
    create_sstable(&letters('g', 'z', 2), dir.path(), 0, TableOptions::from(&options)).unwrap();

    Compactor::new(dir.path(), &options).run().unwrap();
    assert!(list_level(dir.path(), 0).unwrap().is_empty());

    let ranges = key_ranges(dir.path(), 1);
    assert_eq!(ranges.first().unwrap().0, "a");
    assert_eq!(ranges.last().unwrap().1, "z");
    for pair in ranges.windows(2) {
        assert!(pair[0].1 < pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }

    let mut total = 0;
    for id in list_level(dir.path(), 1).unwrap() {
        let table = SSTableReader::open(dir.path(), id).unwrap();
        for record in table.iter().unwrap() {
            let record = record.unwrap();
            let expected_ts = if record.key.as_str() >= "g" { 2 } else { 1 };
            assert_eq!(record.timestamp, expected_ts, "key {}", record.key);
            total += 1;
        }
    }
    assert_eq!(total, 26);
}

/// Leveled compaction driven by the database keeps every key readable
#[test]
fn test_leveled_through_database() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default()
        .compaction(CompactionStrategy::Leveled)
        .leveled_table_limits(vec![2, 3, 100])
        .memtable_capacity(6)
        .sstable_size(4);
    let db = DB::open(dir.path(), options).unwrap();

    for round in 0..5 {
        for i in 0..30 {
            if (i + round) % 7 == 0 {
                db.delete(&format!("key{:02}", i)).unwrap();
            } else {
                db.put(&format!("key{:02}", i), format!("r{}", round).as_bytes()).unwrap();
            }
        }
    }
    db.flush().unwrap();

    // The last round decides every key
    for i in 0..30 {
        let expected = if (i + 4) % 7 == 0 { None } else { Some(b"r4".to_vec()) };
        assert_eq!(db.get(&format!("key{:02}", i)).unwrap(), expected, "key{:02}", i);
    }

    for level in 1..3 {
        let ranges = key_ranges(dir.path(), level);
        for pair in ranges.windows(2) {
            assert!(pair[0].1 < pair[1].0, "L{}: {:?} overlaps {:?}", level, pair[0], pair[1]);
        }
    }
    db.verify_integrity().unwrap();
}

/// Running the compactor twice in a row changes nothing the second time
#[test]
fn test_compaction_is_idempotent() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default().max_tables_per_level(2);
    for ts in 1..=2 {
        create_sstable(&letters('a', 'e', ts), dir.path(), 0, TableOptions::default()).unwrap();
    }

    let compactor = Compactor::new(dir.path(), &options);
    assert_eq!(compactor.run().unwrap(), 1);
    let after_first = key_ranges(dir.path(), 1);
    assert_eq!(compactor.run().unwrap(), 0);
    assert_eq!(key_ranges(dir.path(), 1), after_first);
}

/// Tombstones survive until they reach the bottom level
#[test]
fn test_tombstones_elided_at_bottom_level() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let options = Options::default().levels(2).max_tables_per_level(2).memtable_capacity(2);
    let db = DB::open(dir.path(), options).unwrap();

    db.put("gone", b"v").unwrap();
    db.put("kept", b"v").unwrap();
    db.delete("gone").unwrap();
    db.put("other", b"v").unwrap();

    let levels = db.level_tables().unwrap();
    assert!(levels[0].is_empty());
    assert_eq!(levels[1].len(), 1);

    let table = SSTableReader::open(&dir.path().join(lsmkv::TABLE_DIR), levels[1][0]).unwrap();
    let keys: Vec<String> = table.iter().unwrap().map(|r| r.unwrap().key).collect();
    assert_eq!(keys, vec!["kept".to_string(), "other".to_string()]);
    assert_eq!(db.get("gone").unwrap(), None);
}

/// Manual compaction on a database below every threshold is a no-op
#[test]
fn test_manual_compact_noop() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.put("a", b"1").unwrap();
    db.flush().unwrap();

    db.compact().unwrap();
    assert_eq!(db.level_tables().unwrap()[0].len(), 1);
    assert_eq!(db.get("a").unwrap(), Some(b"1".to_vec()));
}
