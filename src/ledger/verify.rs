//! Ledger Verification
//!
//! Answers whether a stored record is present, internally consistent and
//! linked to its predecessor, and audits the whole chain.
//!
//! The ledger keeps only payload digests, so verification proves ordering
//! and linkage of recorded hashes. Matching a record against source data
//! requires the caller to supply the payload (`verify_payload`).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::hash::hash_payload;
use crate::ledger::linker::DEFAULT_STORAGE_TIMEOUT;
use crate::ledger::merkle::LedgerCheckpoint;
use crate::ledger::record::{LedgerRecord, RecordType, GENESIS_PREVIOUS_HASH};
use crate::ledger::store::{with_timeout, LedgerStore};

const AUDIT_PAGE_SIZE: usize = 500;

/// Outcome of verifying one entity's latest record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    pub record: Option<LedgerRecord>,
    pub chain_integrity: bool,
    pub merkle_root_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_matches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationResult {
    fn not_found() -> Self {
        Self {
            verified: false,
            record: None,
            chain_integrity: false,
            merkle_root_valid: false,
            payload_matches: None,
            reason: Some("not found".to_string()),
        }
    }
}

/// Linkage of a record to the block before it
#[derive(Debug, Clone, PartialEq, Eq)]
enum Linkage {
    Intact,
    /// First block does not carry the genesis sentinel
    BadSentinel,
    PredecessorMissing,
    Mismatch { expected: String },
    /// Block number 0, which no append can produce
    OutOfRange,
}

fn check_linkage(record: &LedgerRecord, predecessor: Option<&LedgerRecord>) -> Linkage {
    if record.block_number == 0 {
        return Linkage::OutOfRange;
    }
    if record.is_first() {
        return if record.previous_hash == GENESIS_PREVIOUS_HASH {
            Linkage::Intact
        } else {
            Linkage::BadSentinel
        };
    }

    match predecessor {
        None => Linkage::PredecessorMissing,
        Some(prev) if prev.data_hash == record.previous_hash => Linkage::Intact,
        Some(prev) => Linkage::Mismatch {
            expected: prev.data_hash.clone(),
        },
    }
}

fn describe(record: &LedgerRecord, linkage: &Linkage) -> Option<String> {
    match linkage {
        Linkage::Intact => None,
        Linkage::BadSentinel => Some(format!(
            "block 1 references {} instead of the genesis sentinel",
            record.previous_hash
        )),
        Linkage::PredecessorMissing => Some(format!(
            "predecessor block {} is missing",
            record.block_number.saturating_sub(1)
        )),
        Linkage::Mismatch { .. } => Some(format!(
            "previous hash does not match block {}",
            record.block_number.saturating_sub(1)
        )),
        Linkage::OutOfRange => Some("block number 0 is outside the chain".to_string()),
    }
}

/// Result of walking the entire ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub record_count: u64,
    pub tip_block: Option<u64>,
    pub missing_blocks: Vec<u64>,
    pub broken_links: Vec<u64>,
    pub merkle_mismatches: Vec<u64>,
    pub timestamp_regressions: Vec<u64>,
    pub checkpoint: Option<LedgerCheckpoint>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.missing_blocks.is_empty()
            && self.broken_links.is_empty()
            && self.merkle_mismatches.is_empty()
            && self.timestamp_regressions.is_empty()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!("✅ Ledger is valid ({} records)", self.record_count)
        } else {
            format!(
                "❌ Ledger is invalid ({} records): {} missing, {} broken links, {} merkle mismatches, {} timestamp regressions",
                self.record_count,
                self.missing_blocks.len(),
                self.broken_links.len(),
                self.merkle_mismatches.len(),
                self.timestamp_regressions.len()
            )
        }
    }
}

#[derive(Clone)]
pub struct VerificationService {
    store: Arc<dyn LedgerStore>,
    storage_timeout: Duration,
}

impl VerificationService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, storage_timeout: Duration) -> Self {
        self.storage_timeout = storage_timeout;
        self
    }

    /// Check presence and predecessor linkage of an entity's latest record.
    ///
    /// Only storage failures are returned as errors; a missing record or a
    /// broken chain is reported in the result.
    pub async fn verify(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<VerificationResult> {
        let record = with_timeout(
            self.storage_timeout,
            self.store.find_by_record_id(record_id, record_type),
        )
        .await?;

        let Some(record) = record else {
            debug!("No ledger record for {} {}", record_type, record_id);
            return Ok(VerificationResult::not_found());
        };

        let linkage = self.linkage_of(&record).await?;
        let merkle_root_valid = record.merkle_root_is_consistent();

        let mut reason = describe(&record, &linkage);
        if reason.is_none() && !merkle_root_valid {
            reason = Some("merkle root does not match record hashes".to_string());
        }
        if let Some(reason) = &reason {
            warn!(
                "Verification of {} {} (block {}) flagged: {}",
                record_type, record_id, record.block_number, reason
            );
        }

        Ok(VerificationResult {
            verified: true,
            chain_integrity: linkage == Linkage::Intact,
            merkle_root_valid,
            payload_matches: None,
            reason,
            record: Some(record),
        })
    }

    /// `verify`, plus re-hashing a caller-held payload against `data_hash`
    pub async fn verify_payload<P>(
        &self,
        record_id: &str,
        record_type: RecordType,
        payload: &P,
    ) -> LedgerResult<VerificationResult>
    where
        P: Serialize + ?Sized,
    {
        let expected_hash = hash_payload(payload)?;
        let mut result = self.verify(record_id, record_type).await?;

        if let Some(record) = &result.record {
            let matches = record.data_hash == expected_hash;
            if !matches {
                warn!(
                    "Payload for {} {} does not match block {}",
                    record_type, record_id, record.block_number
                );
                result.reason.get_or_insert_with(|| "payload hash mismatch".to_string());
            }
            result.payload_matches = Some(matches);
        }

        Ok(result)
    }

    /// Like `verify`, but with missing records and broken links as errors
    pub async fn ensure_linked(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<LedgerRecord> {
        let record = with_timeout(
            self.storage_timeout,
            self.store.find_by_record_id(record_id, record_type),
        )
        .await?
        .ok_or_else(|| LedgerError::not_found(record_type, record_id))?;

        match self.linkage_of(&record).await? {
            Linkage::Intact => Ok(record),
            Linkage::BadSentinel => Err(LedgerError::ChainBroken {
                block_number: record.block_number,
                expected: GENESIS_PREVIOUS_HASH.to_string(),
                found: record.previous_hash,
            }),
            Linkage::PredecessorMissing => Err(LedgerError::ChainBroken {
                block_number: record.block_number,
                expected: format!("block {}", record.block_number.saturating_sub(1)),
                found: record.previous_hash,
            }),
            Linkage::OutOfRange => Err(LedgerError::ChainBroken {
                block_number: record.block_number,
                expected: "block number of at least 1".to_string(),
                found: record.previous_hash,
            }),
            Linkage::Mismatch { expected } => Err(LedgerError::ChainBroken {
                block_number: record.block_number,
                expected,
                found: record.previous_hash,
            }),
        }
    }

    async fn linkage_of(&self, record: &LedgerRecord) -> LedgerResult<Linkage> {
        let Some(predecessor_block) = record.block_number.checked_sub(1).filter(|b| *b > 0) else {
            return Ok(check_linkage(record, None));
        };

        let predecessor = with_timeout(
            self.storage_timeout,
            self.store.find_by_block_number(predecessor_block),
        )
        .await?;

        Ok(check_linkage(record, predecessor.as_ref()))
    }

    /// Walk every block in order and collect structural defects
    pub async fn audit_chain(&self) -> LedgerResult<ChainReport> {
        info!("Auditing ledger chain");

        let mut report = ChainReport::default();
        let mut data_hashes = Vec::new();
        let mut first_block = None;
        let mut previous: Option<LedgerRecord> = None;
        let mut expected_block = 1;

        loop {
            let page = with_timeout(
                self.storage_timeout,
                self.store.blocks(expected_block, AUDIT_PAGE_SIZE),
            )
            .await?;
            let page_len = page.len();

            for record in page {
                let block = record.block_number;
                if block > expected_block {
                    report.missing_blocks.extend(expected_block..block);
                }

                let predecessor = previous.as_ref().filter(|p| p.block_number + 1 == block);
                if check_linkage(&record, predecessor) != Linkage::Intact {
                    report.broken_links.push(block);
                }
                if !record.merkle_root_is_consistent() {
                    report.merkle_mismatches.push(block);
                }
                if previous
                    .as_ref()
                    .is_some_and(|p| record.timestamp < p.timestamp)
                {
                    report.timestamp_regressions.push(block);
                }

                first_block.get_or_insert(block);
                data_hashes.push(record.data_hash.clone());
                report.record_count += 1;
                expected_block = block + 1;
                previous = Some(record);
            }

            if page_len < AUDIT_PAGE_SIZE {
                break;
            }
        }

        if let (Some(from_block), Some(last)) = (first_block, previous.as_ref()) {
            report.tip_block = Some(last.block_number);
            report.checkpoint = Some(LedgerCheckpoint::new(
                from_block,
                last.block_number,
                &data_hashes,
            ));
        }

        if report.is_valid() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }
}
