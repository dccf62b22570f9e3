//! Ledger Storage
//!
//! Ordered, append-only storage of chained records. Every implementation
//! must only accept a record that extends the current tip: its block number
//! is `tip + 1` (or 1 when empty) and its `previous_hash` is the tip's
//! `data_hash` (or `"0"`). Anything else is a `BlockNumberConflict`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::record::{LedgerRecord, RecordType, GENESIS_PREVIOUS_HASH};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record with the highest block number, if any
    async fn current_tip(&self) -> LedgerResult<Option<LedgerRecord>>;

    /// Persist a record that extends the current tip
    async fn append(&self, record: LedgerRecord) -> LedgerResult<LedgerRecord>;

    /// Most recent record for an entity
    async fn find_by_record_id(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<Option<LedgerRecord>>;

    async fn find_by_block_number(&self, block_number: u64) -> LedgerResult<Option<LedgerRecord>>;

    /// Up to `limit` records, newest first
    async fn recent(&self, limit: usize) -> LedgerResult<Vec<LedgerRecord>>;

    /// Every record for an entity, oldest first
    async fn history(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<Vec<LedgerRecord>>;

    /// Up to `limit` records with `block_number >= from_block`, oldest first
    async fn blocks(&self, from_block: u64, limit: usize) -> LedgerResult<Vec<LedgerRecord>>;

    async fn count(&self) -> LedgerResult<u64>;
}

/// Run a storage call with a bounded wait
pub async fn with_timeout<T, F>(timeout: Duration, operation: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| LedgerError::StorageTimeout(timeout))?
}

/// Expected `(block_number, previous_hash)` of the record following `tip`
pub fn next_link(tip: Option<&LedgerRecord>) -> (u64, String) {
    match tip {
        Some(tip) => (tip.block_number + 1, tip.data_hash.clone()),
        None => (1, GENESIS_PREVIOUS_HASH.to_string()),
    }
}

/// In-process store keyed by block number
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    records: Arc<RwLock<BTreeMap<u64, LedgerRecord>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stored record in place, bypassing the append-only checks
    #[cfg(test)]
    pub(crate) async fn overwrite(&self, record: LedgerRecord) {
        self.records.write().await.insert(record.block_number, record);
    }

    #[cfg(test)]
    pub(crate) async fn remove(&self, block_number: u64) {
        self.records.write().await.remove(&block_number);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn current_tip(&self) -> LedgerResult<Option<LedgerRecord>> {
        let records = self.records.read().await;
        Ok(records.values().next_back().cloned())
    }

    async fn append(&self, record: LedgerRecord) -> LedgerResult<LedgerRecord> {
        record.validate()?;

        let mut records = self.records.write().await;
        let (expected_block, expected_previous) = next_link(records.values().next_back());

        if record.block_number != expected_block || record.previous_hash != expected_previous {
            return Err(LedgerError::BlockNumberConflict {
                block_number: record.block_number,
            });
        }

        records.insert(record.block_number, record.clone());
        debug!("Appended ledger record: {}", record.summary());
        Ok(record)
    }

    async fn find_by_record_id(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<Option<LedgerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .rev()
            .find(|r| r.record_id == record_id && r.record_type == record_type)
            .cloned())
    }

    async fn find_by_block_number(&self, block_number: u64) -> LedgerResult<Option<LedgerRecord>> {
        Ok(self.records.read().await.get(&block_number).cloned())
    }

    async fn recent(&self, limit: usize) -> LedgerResult<Vec<LedgerRecord>> {
        let records = self.records.read().await;
        Ok(records.values().rev().take(limit).cloned().collect())
    }

    async fn history(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<Vec<LedgerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.record_id == record_id && r.record_type == record_type)
            .cloned()
            .collect())
    }

    async fn blocks(&self, from_block: u64, limit: usize) -> LedgerResult<Vec<LedgerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .range(from_block..)
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn count(&self) -> LedgerResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}
