//! Integrity Ledger
//!
//! Tamper-evident, single-writer hash chain over assignment templates,
//! submissions and grades. Each record stores the digest of its event
//! payload and the digest of the record before it.

pub mod events;
pub mod hash;
pub mod linker;
pub mod merkle;
pub mod record;
pub mod store;
pub mod verify;

pub use events::{EventRecorder, GradePayload, LinkOutcome, LinkPolicy, SubmissionPayload, TemplatePayload};
pub use hash::{canonical_json, hash_payload, sha256_hex};
pub use linker::RecordLinker;
pub use merkle::{merkle_proof, merkle_root, verify_merkle_root, LedgerCheckpoint, MerkleProof};
pub use record::{LedgerRecord, RecordType, GENESIS_PREVIOUS_HASH};
pub use store::{with_timeout, LedgerStore, MemoryLedgerStore};
pub use verify::{ChainReport, VerificationResult, VerificationService};
