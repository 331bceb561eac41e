//! Merkle tree over the encoded Data records of a table.
//!
//! Leaves are SHA-256 digests of each CRC-prefixed record. The leaf level is
//! padded with the digest of the empty string up to a power of two, and the
//! root is stored as lowercase hex in the Metadata component.

use sha2::{Digest, Sha256};

type Hash = [u8; 32];

fn digest(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Accumulates leaf digests as records are written.
#[derive(Debug, Default, Clone)]
pub struct MerkleBuilder {
    leaves: Vec<Hash>,
}

impl MerkleBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one encoded record as a leaf.
    pub fn add(&mut self, encoded_record: &[u8]) {
        self.leaves.push(digest(encoded_record));
    }

    /// Number of leaves added so far.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether no leaves were added.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Root digest as lowercase hex.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    fn root(&self) -> Hash {
        match self.leaves.len() {
            0 => digest(&[]),
            1 => self.leaves[0],
            n => {
                let mut level = self.leaves.clone();
                level.resize(n.next_power_of_two(), digest(&[]));

                while level.len() > 1 {
                    level = level
                        .chunks_exact(2)
                        .map(|pair| {
                            let mut hasher = Sha256::new();
                            hasher.update(pair[0]);
                            hasher.update(pair[1]);
                            hasher.finalize().into()
                        })
                        .collect();
                }
                level[0]
            }
        }
    }
}
