use std::time::Duration;

use thiserror::Error;

use crate::ledger::record::RecordType;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage call timed out after {0:?}")]
    StorageTimeout(Duration),

    #[error("Block number conflict: block {block_number} was already claimed")]
    BlockNumberConflict { block_number: u64 },

    #[error("Ledger record not found: {record_type} {record_id}")]
    RecordNotFound {
        record_type: RecordType,
        record_id: String,
    },

    #[error("Chain broken at block {block_number}: expected previous hash {expected}, found {found}")]
    ChainBroken {
        block_number: u64,
        expected: String,
        found: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn not_found(record_type: RecordType, record_id: &str) -> Self {
        Self::RecordNotFound {
            record_type,
            record_id: record_id.to_string(),
        }
    }

    /// Transient failures: the whole operation may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::StorageTimeout(_) | Self::BlockNumberConflict { .. }
        )
    }
}
