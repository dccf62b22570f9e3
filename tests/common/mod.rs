#![allow(dead_code)]

use std::sync::Arc;

use grading_ledger::database::Database;
use grading_ledger::ledger::{LedgerStore, RecordLinker, VerificationService};

/// Setup an in-memory SQLite ledger for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

pub fn ledger_services(db: &Database) -> (Arc<dyn LedgerStore>, RecordLinker, VerificationService) {
    let store: Arc<dyn LedgerStore> = Arc::new(db.ledger_store());
    let linker = RecordLinker::new(store.clone());
    let verifier = VerificationService::new(store.clone());
    (store, linker, verifier)
}

/// Rewrite a stored record's previous hash behind the ledger's back
pub async fn tamper_previous_hash(db: &Database, block_number: i64, previous_hash: &str) {
    let result = sqlx::query("UPDATE ledger_records SET previous_hash = ? WHERE block_number = ?")
        .bind(previous_hash)
        .bind(block_number)
        .execute(db.pool())
        .await
        .expect("Failed to tamper with ledger record");
    assert_eq!(result.rows_affected(), 1, "block {} not found", block_number);
}

pub async fn delete_block(db: &Database, block_number: i64) {
    sqlx::query("DELETE FROM ledger_records WHERE block_number = ?")
        .bind(block_number)
        .execute(db.pool())
        .await
        .expect("Failed to delete ledger record");
}

pub async fn renumber_block(db: &Database, block_number: i64, new_block_number: i64) {
    let result = sqlx::query("UPDATE ledger_records SET block_number = ? WHERE block_number = ?")
        .bind(new_block_number)
        .bind(block_number)
        .execute(db.pool())
        .await
        .expect("Failed to renumber ledger record");
    assert_eq!(result.rows_affected(), 1, "block {} not found", block_number);
}
