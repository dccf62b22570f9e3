//! Record Linker
//!
//! Builds a new record for a domain event and binds it to the current chain
//! tip. Appends from one linker are serialized; appends racing from other
//! writers on the same store surface as `BlockNumberConflict` and are retried
//! from a fresh tip read.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::hash::hash_payload;
use crate::ledger::record::{LedgerRecord, RecordType};
use crate::ledger::store::{next_link, with_timeout, LedgerStore};

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_APPEND_ATTEMPTS: u32 = 5;

pub struct RecordLinker {
    store: Arc<dyn LedgerStore>,
    append_lock: Mutex<()>,
    storage_timeout: Duration,
    max_attempts: u32,
}

impl RecordLinker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            max_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
        }
    }

    pub fn with_limits(mut self, storage_timeout: Duration, max_attempts: u32) -> Self {
        self.storage_timeout = storage_timeout;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn from_config(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Self {
        Self::new(store).with_limits(config.storage_timeout(), config.max_append_attempts)
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Hash `payload` and append a record for it at the chain tip
    pub async fn link<P>(
        &self,
        record_type: RecordType,
        record_id: &str,
        payload: &P,
    ) -> LedgerResult<LedgerRecord>
    where
        P: Serialize + ?Sized,
    {
        let data_hash = hash_payload(payload)?;
        self.link_hash(record_type, record_id, data_hash).await
    }

    /// Append a record for an already computed payload digest
    pub async fn link_hash(
        &self,
        record_type: RecordType,
        record_id: &str,
        data_hash: String,
    ) -> LedgerResult<LedgerRecord> {
        let _guard = self.append_lock.lock().await;

        let mut attempt = 1;
        loop {
            match self.try_append(record_type, record_id, &data_hash).await {
                Ok(record) => {
                    info!(
                        "Linked {} {} at block {}",
                        record_type, record_id, record.block_number
                    );
                    return Ok(record);
                }
                Err(LedgerError::BlockNumberConflict { block_number })
                    if attempt < self.max_attempts =>
                {
                    warn!(
                        "Block {} claimed concurrently while linking {} {} (attempt {}/{}), retrying",
                        block_number, record_type, record_id, attempt, self.max_attempts
                    );
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Failed to link {} {}: {}", record_type, record_id, e);
                    return Err(e);
                }
            }
        }
    }

    async fn try_append(
        &self,
        record_type: RecordType,
        record_id: &str,
        data_hash: &str,
    ) -> LedgerResult<LedgerRecord> {
        let tip = with_timeout(self.storage_timeout, self.store.current_tip()).await?;
        let (block_number, previous_hash) = next_link(tip.as_ref());

        // Never let a skewed clock place a record before its predecessor
        let now = Utc::now();
        let timestamp = match &tip {
            Some(tip) if tip.timestamp > now => tip.timestamp,
            _ => now,
        };

        let record = LedgerRecord::new(
            record_type,
            record_id.to_string(),
            data_hash.to_string(),
            previous_hash,
            block_number,
            timestamp,
        );
        debug!("Appending {}", record.summary());

        with_timeout(self.storage_timeout, self.store.append(record)).await
    }
}
