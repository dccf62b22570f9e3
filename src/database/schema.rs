// Database schema definitions
// Applied in order by Database::run_migrations

pub const LEDGER_RECORDS_SCHEMA: &str = include_str!("../../migrations/001_ledger_records.sql");
