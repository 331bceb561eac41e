//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an element
//! is a member of a set. False positive matches are possible, but false negatives are not.
//!
//! ## Serialized form
//!
//! ```text
//! [m: 4B LE][k: 4B LE][bits: m bytes, one byte per bit][seeds: k x 32B]
//! ```
//!
//! Each of the `k` hash functions is FNV-1a keyed by its own 32 random seed
//! bytes, so a decoded filter answers exactly like the one that was written.

use crate::error::{Error, Result};
use crate::filter::Filter;
use rand::RngCore;
use std::hash::Hasher;

/// Bytes of seed material per hash function.
pub const SEED_SIZE: usize = 32;

/// Fixed header: m and k.
const HEADER_SIZE: usize = 8;

/// BloomFilter provides probabilistic set membership testing.
///
/// # Example
/// ```
/// use lsmkv::filter::{BloomFilter, Filter};
///
/// let mut filter = BloomFilter::new(1000, 0.01); // 1000 keys, 1% false positive rate
/// filter.add(b"key1");
/// filter.add(b"key2");
///
/// assert!(filter.may_contain(b"key1"));
/// assert!(filter.may_contain(b"key2"));
/// // key3 might return true (false positive) or false
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// One byte per bit, 0 or 1
    bits: Vec<u8>,
    /// Seed material for each hash function
    seeds: Vec<[u8; SEED_SIZE]>,
}

impl BloomFilter {
    /// Create a new BloomFilter with optimal parameters for expected number of keys and false positive rate.
    ///
    /// # Arguments
    /// * `expected_keys` - Expected number of keys to be inserted
    /// * `false_positive_rate` - Desired false positive rate (e.g., 0.01 for 1%)
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let expected_keys = expected_keys.max(1);

        // m = -n * ln(p) / (ln(2)^2)
        let num_bits = Self::optimal_num_bits(expected_keys, false_positive_rate);

        // k = (m/n) * ln(2)
        let num_hashes = Self::optimal_num_hashes(num_bits, expected_keys);

        let mut rng = rand::rng();
        let seeds = (0..num_hashes)
            .map(|_| {
                let mut seed = [0u8; SEED_SIZE];
                rng.fill_bytes(&mut seed);
                seed
            })
            .collect();

        Self { bits: vec![0u8; num_bits], seeds }
    }

    /// Calculate optimal number of bits for given parameters.
    fn optimal_num_bits(expected_keys: usize, false_positive_rate: f64) -> usize {
        let n = expected_keys as f64;
        let p = false_positive_rate.clamp(0.0001, 0.9999);

        let num_bits = (-n * p.ln() / (2.0_f64.ln().powi(2))).ceil() as usize;
        num_bits.max(1)
    }

    /// Calculate optimal number of hash functions.
    fn optimal_num_hashes(num_bits: usize, expected_keys: usize) -> usize {
        let k = ((num_bits as f64 / expected_keys as f64) * 2.0_f64.ln()).ceil() as usize;
        k.clamp(1, 30)
    }

    /// Bit positions probed for `key`, one per hash function.
    fn positions<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
        let m = self.bits.len() as u64;
        self.seeds.iter().map(move |seed| {
            let mut hasher = FnvHasher::new_with_seed(seed);
            hasher.write(key);
            (hasher.finish() % m) as usize
        })
    }

    /// Number of bits (`m`).
    pub fn num_bits(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash functions used (`k`).
    pub fn num_hashes(&self) -> usize {
        self.seeds.len()
    }

    /// Calculate the approximate false positive rate for `num_keys` insertions.
    ///
    /// p = (1 - e^(-kn/m))^k
    pub fn estimated_false_positive_rate(&self, num_keys: usize) -> f64 {
        if num_keys == 0 {
            return 0.0;
        }

        let k = self.num_hashes() as f64;
        let n = num_keys as f64;
        let m = self.num_bits() as f64;

        (1.0 - (-k * n / m).exp()).powf(k)
    }
}

impl Filter for BloomFilter {
    fn may_contain(&self, key: &[u8]) -> bool {
        self.positions(key).all(|pos| self.bits[pos] != 0)
    }

    fn add(&mut self, key: &[u8]) {
        let positions: Vec<usize> = self.positions(key).collect();
        for pos in positions {
            self.bits[pos] = 1;
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut encoded =
            Vec::with_capacity(HEADER_SIZE + self.bits.len() + self.seeds.len() * SEED_SIZE);

        encoded.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        encoded.extend_from_slice(&(self.seeds.len() as u32).to_le_bytes());
        encoded.extend_from_slice(&self.bits);
        for seed in &self.seeds {
            encoded.extend_from_slice(seed);
        }

        encoded
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption("Bloom filter data too short"));
        }

        let m = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let k = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;

        let expected = k.checked_mul(SEED_SIZE).and_then(|s| s.checked_add(HEADER_SIZE + m));
        if m == 0 || k == 0 || expected != Some(data.len()) {
            return Err(Error::corruption("Bloom filter size mismatch"));
        }

        let bits = data[HEADER_SIZE..HEADER_SIZE + m].to_vec();
        let seeds = data[HEADER_SIZE + m..]
            .chunks_exact(SEED_SIZE)
            .map(|chunk| {
                let mut seed = [0u8; SEED_SIZE];
                seed.copy_from_slice(chunk);
                seed
            })
            .collect();

        Ok(Self { bits, seeds })
    }
}

/// FNV-1a hasher keyed by seed bytes, with a final avalanche step.
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new_with_seed(seed: &[u8]) -> Self {
        let mut hasher = Self { state: Self::FNV_OFFSET_BASIS };
        hasher.write(seed);
        hasher
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        // splitmix64 finalizer; plain FNV clusters in the low bits
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}
