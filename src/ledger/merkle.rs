//! Merkle Folding for Ledger Hashes
//!
//! Pairwise folding of hex digests into a single root. Each record carries a
//! root over `[data_hash, previous_hash]`; the same folding summarizes block
//! ranges into checkpoints.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LedgerError;
use crate::ledger::hash::sha256_hex;
use crate::ledger::record::LedgerRecord;

/// Hash the raw string concatenation of two digests
fn fold_pair(left: &str, right: &str) -> String {
    let combined = format!("{}{}", left, right);
    sha256_hex(combined.as_bytes())
}

/// Fold one level; an odd trailing hash is paired with itself
fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            fold_pair(left, right)
        })
        .collect()
}

/// Merkle root of an ordered list of hashes.
///
/// Empty input yields an empty string and a single hash is returned as-is.
pub fn merkle_root(hashes: &[String]) -> String {
    match hashes {
        [] => String::new(),
        [single] => single.clone(),
        _ => {
            let mut level = next_level(hashes);
            while level.len() > 1 {
                level = next_level(&level);
            }
            level.swap_remove(0)
        }
    }
}

/// Verify a claimed root against the hashes it should summarize
pub fn verify_merkle_root(hashes: &[String], claimed_root: &str) -> bool {
    merkle_root(hashes) == claimed_root
}

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: String,
    pub side: Side,
}

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub leaf_index: usize,
    pub path: Vec<ProofStep>,
    pub root_hash: String,
}

impl MerkleProof {
    /// Verify this proof
    pub fn verify(&self) -> bool {
        verify_merkle_proof(self, &self.leaf_hash, &self.root_hash)
    }

    /// Get proof size
    pub fn size(&self) -> usize {
        self.path.len()
    }
}

/// Generate an inclusion proof for `hashes[index]`
pub fn merkle_proof(hashes: &[String], index: usize) -> Result<MerkleProof, LedgerError> {
    if index >= hashes.len() {
        return Err(LedgerError::InvalidRecord(format!(
            "Leaf index {} out of range for {} hashes",
            index,
            hashes.len()
        )));
    }

    let mut path = Vec::new();
    let mut level = hashes.to_vec();
    let mut position = index;

    while level.len() > 1 {
        let step = if position % 2 == 0 {
            // Odd trailing leaf is its own sibling
            let sibling = level.get(position + 1).unwrap_or(&level[position]);
            ProofStep {
                sibling: sibling.clone(),
                side: Side::Right,
            }
        } else {
            ProofStep {
                sibling: level[position - 1].clone(),
                side: Side::Left,
            }
        };
        path.push(step);

        level = next_level(&level);
        position /= 2;
    }

    let root_hash = level.swap_remove(0);
    debug!("Merkle proof for leaf {}: {} steps", index, path.len());

    Ok(MerkleProof {
        leaf_hash: hashes[index].clone(),
        leaf_index: index,
        path,
        root_hash,
    })
}

/// Recompute the root from a leaf and its sibling path
pub fn verify_merkle_proof(proof: &MerkleProof, leaf_hash: &str, root_hash: &str) -> bool {
    let computed = proof
        .path
        .iter()
        .fold(leaf_hash.to_string(), |current, step| match step.side {
            Side::Left => fold_pair(&step.sibling, &current),
            Side::Right => fold_pair(&current, &step.sibling),
        });

    computed == root_hash
}

/// Summary of a contiguous block range, suitable for pinning a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCheckpoint {
    pub from_block: u64,
    pub to_block: u64,
    pub record_count: usize,
    pub head_hash: String,
    pub merkle_root: String,
}

impl LedgerCheckpoint {
    /// Checkpoint over data hashes listed in block order
    pub fn new(from_block: u64, to_block: u64, data_hashes: &[String]) -> Self {
        Self {
            from_block,
            to_block,
            record_count: data_hashes.len(),
            head_hash: data_hashes.last().cloned().unwrap_or_default(),
            merkle_root: merkle_root(data_hashes),
        }
    }

    /// Build a checkpoint over the `data_hash` of each record, in block order
    pub fn from_records(records: &[LedgerRecord]) -> Result<Self, LedgerError> {
        let (first, last) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(LedgerError::InvalidRecord(
                    "Cannot checkpoint an empty block range".to_string(),
                ))
            }
        };

        let hashes: Vec<String> = records.iter().map(|r| r.data_hash.clone()).collect();
        Ok(Self::new(first.block_number, last.block_number, &hashes))
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "Blocks {}..={}: {} records, root: {}",
            self.from_block, self.to_block, self.record_count, self.merkle_root
        )
    }
}
