//! Ledger Record
//!
//! Defines the immutable, hash-chained record stored for every tracked
//! domain event (template creation, submission, grading).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::merkle::merkle_root;

/// `previous_hash` of the first record in the chain
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Bytes of entropy in a record nonce
const NONCE_BYTES: usize = 16;

/// Kind of domain event a record was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    AssignmentTemplate,
    Submission,
    Grade,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [
        RecordType::AssignmentTemplate,
        RecordType::Submission,
        RecordType::Grade,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::AssignmentTemplate => "assignment_template",
            RecordType::Submission => "submission",
            RecordType::Grade => "grade",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidRecord(format!("Unknown record type: {}", s)))
    }
}

/// A single link in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub record_type: RecordType,
    pub record_id: String,
    pub data_hash: String,
    pub previous_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: String,
    pub nonce: String,
    pub verified: bool,
}

impl LedgerRecord {
    /// Create a new record, deriving its Merkle root and a fresh nonce
    pub fn new(
        record_type: RecordType,
        record_id: String,
        data_hash: String,
        previous_hash: String,
        block_number: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let merkle_root = merkle_root(&[data_hash.clone(), previous_hash.clone()]);

        Self {
            record_type,
            record_id,
            data_hash,
            previous_hash,
            block_number,
            timestamp,
            merkle_root,
            nonce: generate_nonce(),
            verified: true,
        }
    }

    pub fn is_first(&self) -> bool {
        self.block_number == 1
    }

    /// Recompute the Merkle root over `[data_hash, previous_hash]` and compare
    pub fn merkle_root_is_consistent(&self) -> bool {
        self.merkle_root == merkle_root(&[self.data_hash.clone(), self.previous_hash.clone()])
    }

    /// Structural checks a store applies before accepting a record
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.block_number == 0 {
            return Err(LedgerError::InvalidRecord(
                "Block numbers start at 1".to_string(),
            ));
        }
        if self.record_id.is_empty() {
            return Err(LedgerError::InvalidRecord("Empty record id".to_string()));
        }
        if self.data_hash.is_empty() || self.previous_hash.is_empty() {
            return Err(LedgerError::InvalidRecord(format!(
                "Block {} is missing a hash",
                self.block_number
            )));
        }
        if self.is_first() && self.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err(LedgerError::InvalidRecord(format!(
                "First block must reference {:?}, got {}",
                GENESIS_PREVIOUS_HASH, self.previous_hash
            )));
        }
        if !self.merkle_root_is_consistent() {
            return Err(LedgerError::InvalidRecord(format!(
                "Block {} carries an inconsistent Merkle root",
                self.block_number
            )));
        }
        Ok(())
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} {} ({} <- {})",
            self.block_number, self.record_type, self.record_id, self.data_hash, self.previous_hash
        )
    }
}

/// Random hex decorator; never validated
pub fn generate_nonce() -> String {
    hex::encode(rand::random::<[u8; NONCE_BYTES]>())
}
