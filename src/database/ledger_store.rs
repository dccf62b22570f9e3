//! SQLite Ledger Store
//!
//! Durable `LedgerStore` over the `ledger_records` table. Appends are a single
//! insert-if-tip-matches statement, with the `block_number` primary key as
//! the final guard against two writers claiming the same block.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::record::{LedgerRecord, RecordType};
use crate::ledger::store::LedgerStore;

const RECORD_COLUMNS: &str = "block_number, record_type, record_id, data_hash, previous_hash, \
                              timestamp, merkle_root, nonce, verified";

#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> LedgerResult<LedgerRecord> {
        let block_number: i64 = row.try_get("block_number")?;
        let record_type: String = row.try_get("record_type")?;
        let timestamp: DateTime<Utc> = row.try_get("timestamp")?;

        Ok(LedgerRecord {
            record_type: record_type.parse()?,
            record_id: row.try_get("record_id")?,
            data_hash: row.try_get("data_hash")?,
            previous_hash: row.try_get("previous_hash")?,
            block_number: u64::try_from(block_number).map_err(|_| {
                LedgerError::InvalidRecord(format!("Negative block number {}", block_number))
            })?,
            timestamp,
            merkle_root: row.try_get("merkle_root")?,
            nonce: row.try_get("nonce")?,
            verified: row.try_get("verified")?,
        })
    }

    fn rows_to_records(rows: &[SqliteRow]) -> LedgerResult<Vec<LedgerRecord>> {
        rows.iter().map(Self::row_to_record).collect()
    }
}

fn sql_int<T>(value: T) -> LedgerResult<i64>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| LedgerError::InvalidRecord(format!("{} does not fit in an SQL integer", value)))
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn current_tip(&self) -> LedgerResult<Option<LedgerRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_records ORDER BY block_number DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn append(&self, record: LedgerRecord) -> LedgerResult<LedgerRecord> {
        record.validate()?;

        let block_number = sql_int(record.block_number)?;
        let predecessor = block_number - 1;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_records
                (block_number, record_type, record_id, data_hash, previous_hash,
                 timestamp, merkle_root, nonce, verified)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE (SELECT COALESCE(MAX(block_number), 0) FROM ledger_records) = ?
              AND COALESCE(
                    (SELECT data_hash FROM ledger_records WHERE block_number = ?),
                    '0'
                  ) = ?
            "#,
        )
        .bind(block_number)
        .bind(record.record_type.as_str())
        .bind(&record.record_id)
        .bind(&record.data_hash)
        .bind(&record.previous_hash)
        .bind(record.timestamp)
        .bind(&record.merkle_root)
        .bind(&record.nonce)
        .bind(record.verified)
        .bind(predecessor)
        .bind(predecessor)
        .bind(&record.previous_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                debug!("Persisted ledger record: {}", record.summary());
                Ok(record)
            }
            Ok(_) => {
                warn!("Block {} no longer extends the chain tip", record.block_number);
                Err(LedgerError::BlockNumberConflict {
                    block_number: record.block_number,
                })
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!("Block {} already exists: {}", record.block_number, e);
                Err(LedgerError::BlockNumberConflict {
                    block_number: record.block_number,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_record_id(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<Option<LedgerRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_records WHERE record_id = ? AND record_type = ? \
             ORDER BY block_number DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(record_id)
        .bind(record_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_by_block_number(&self, block_number: u64) -> LedgerResult<Option<LedgerRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_records WHERE block_number = ?",
            RECORD_COLUMNS
        ))
        .bind(sql_int(block_number)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn recent(&self, limit: usize) -> LedgerResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_records ORDER BY block_number DESC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(sql_int(limit)?)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_records(&rows)
    }

    async fn history(
        &self,
        record_id: &str,
        record_type: RecordType,
    ) -> LedgerResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_records WHERE record_id = ? AND record_type = ? \
             ORDER BY block_number ASC",
            RECORD_COLUMNS
        ))
        .bind(record_id)
        .bind(record_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_records(&rows)
    }

    async fn blocks(&self, from_block: u64, limit: usize) -> LedgerResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_records WHERE block_number >= ? \
             ORDER BY block_number ASC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(sql_int(from_block)?)
        .bind(sql_int(limit)?)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_records(&rows)
    }

    async fn count(&self) -> LedgerResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM ledger_records")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }
}
