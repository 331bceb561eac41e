//! Integration tests for Bloom Filter in SSTable

use lsmkv::filter::{BloomFilter, Filter};
use lsmkv::record::Record;
use lsmkv::sstable::{create_sstable, Component, SSTableReader, TableOptions};
use std::fs;
use tempfile::TempDir;

fn init_logger() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn records(range: std::ops::Range<usize>) -> Vec<Record> {
    range
        .map(|i| Record::new(format!("key{:04}", i), format!("value{:04}", i), 1))
        .collect()
}

#[test]
fn test_sstable_with_bloom_filter() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let id = create_sstable(&records(0..100), dir.path(), 0, TableOptions::default())
        .unwrap()
        .unwrap();

    let reader = SSTableReader::open(dir.path(), id).unwrap();

    // Test existing keys (should all be found)
    for i in 0..100 {
        let key = format!("key{:04}", i);
        let record = reader.get(&key).unwrap();
        assert!(record.is_some(), "Key {} should be found", key);
        assert_eq!(record.unwrap().value, format!("value{:04}", i).as_bytes());
    }

    // Keys inside the table's range but absent: answered without a record
    for i in 0..99 {
        let key = format!("key{:04}x", i);
        assert!(reader.get(&key).unwrap().is_none());
    }
}

#[test]
fn test_filter_component_round_trip() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let id = create_sstable(&records(0..500), dir.path(), 0, TableOptions::default())
        .unwrap()
        .unwrap();

    let bytes = fs::read(id.path(dir.path(), Component::Filter)).unwrap();
    let filter = BloomFilter::decode(&bytes).unwrap();
    assert_eq!(filter.num_bits(), bytes.len() - 8 - filter.num_hashes() * 32);

    for i in 0..500 {
        assert!(filter.may_contain(format!("key{:04}", i).as_bytes()));
    }

    let mut false_positives = 0;
    for i in 1000..11000 {
        if filter.may_contain(format!("key{:05}", i).as_bytes()) {
            false_positives += 1;
        }
    }
    println!("False positives: {}/10000", false_positives);
    // 1% target rate
    assert!(false_positives < 300, "Too many false positives: {}", false_positives);
}

#[test]
fn test_bloom_filter_fp_rate_option() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let loose = TableOptions { bloom_fp_rate: 0.2, ..TableOptions::default() };
    let tight = TableOptions { bloom_fp_rate: 0.001, ..TableOptions::default() };

    let loose_id = create_sstable(&records(0..200), dir.path(), 0, loose).unwrap().unwrap();
    let tight_id = create_sstable(&records(0..200), dir.path(), 0, tight).unwrap().unwrap();

    let loose_len = fs::metadata(loose_id.path(dir.path(), Component::Filter)).unwrap().len();
    let tight_len = fs::metadata(tight_id.path(dir.path(), Component::Filter)).unwrap().len();
    assert!(tight_len > loose_len);
}

#[test]
fn test_bloom_filter_sizing() {
    init_logger();
    let filter = BloomFilter::new(1000, 0.01);
    assert_eq!(filter.num_bits(), 9586);
    assert_eq!(filter.num_hashes(), 7);

    // Degenerate inputs still produce a usable filter
    let mut tiny = BloomFilter::new(0, 0.5);
    tiny.add(b"only");
    assert!(tiny.may_contain(b"only"));
}
