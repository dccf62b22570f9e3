use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use grading_ledger::database::Database;
use grading_ledger::ledger::{
    merkle_proof, with_timeout, LedgerRecord, LedgerStore, RecordType, VerificationService,
};

const PAGE_SIZE: usize = 500;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify grading ledger chain integrity")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .env("DATABASE_URL")
                .help("SQLite database holding the ledger")
                .required(true),
        )
        .arg(
            Arg::new("storage-timeout-ms")
                .short('t')
                .long("storage-timeout-ms")
                .value_name("MS")
                .env("LEDGER_STORAGE_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("5000")
                .help("Upper bound on each storage call"),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .help("Expected checkpoint Merkle root over all data hashes"),
        )
        .arg(
            Arg::new("record")
                .short('r')
                .long("record")
                .value_names(["TYPE", "ID"])
                .num_args(2)
                .help("Also verify the latest record of one entity"),
        )
        .arg(
            Arg::new("proof")
                .short('p')
                .long("proof")
                .value_name("BLOCK")
                .value_parser(clap::value_parser!(u64))
                .help("Print a Merkle inclusion proof for a block"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let database_url = matches
        .get_one::<String>("database-url")
        .ok_or_else(|| anyhow!("--database-url is required"))?;
    let options = VerifyOptions {
        expected_merkle_root: matches.get_one::<String>("merkle-root").cloned(),
        record: matches
            .get_many::<String>("record")
            .map(|values| values.cloned().collect::<Vec<_>>()),
        proof_block: matches.get_one::<u64>("proof").copied(),
        storage_timeout: Duration::from_millis(
            matches
                .get_one::<u64>("storage-timeout-ms")
                .copied()
                .ok_or_else(|| anyhow!("--storage-timeout-ms is required"))?,
        ),
        verbose,
    };

    if let Err(e) = verify_ledger(database_url, &options).await {
        error!("Ledger verification failed: {}", e);
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Ledger verification completed successfully");
    }

    Ok(())
}

struct VerifyOptions {
    expected_merkle_root: Option<String>,
    record: Option<Vec<String>>,
    proof_block: Option<u64>,
    storage_timeout: Duration,
    verbose: bool,
}

async fn verify_ledger(database_url: &str, options: &VerifyOptions) -> Result<()> {
    info!("Verifying ledger: {}", database_url);

    let database = Database::new(database_url).await?;
    let store: Arc<dyn LedgerStore> = Arc::new(database.ledger_store());
    let verifier = VerificationService::new(store.clone()).with_timeout(options.storage_timeout);

    // Verify hash chain
    let report = verifier.audit_chain().await?;
    if options.verbose {
        println!("{}", report.summary());
    }
    if !report.is_valid() {
        if options.verbose {
            println!("  Missing blocks: {:?}", report.missing_blocks);
            println!("  Broken links: {:?}", report.broken_links);
            println!("  Merkle mismatches: {:?}", report.merkle_mismatches);
            println!("  Timestamp regressions: {:?}", report.timestamp_regressions);
        }
        return Err(anyhow!(report.summary()));
    }

    // Verify checkpoint root if provided
    if let Some(expected) = &options.expected_merkle_root {
        let actual = report
            .checkpoint
            .as_ref()
            .map(|c| c.merkle_root.as_str())
            .unwrap_or_default();
        if actual != expected {
            return Err(anyhow!(
                "Merkle root mismatch. Expected: {}, Got: {}",
                expected,
                actual
            ));
        }
        if options.verbose {
            println!("✓ Merkle root matches expected value");
        }
    }

    if let Some(checkpoint) = &report.checkpoint {
        if options.verbose {
            println!("\nLedger Summary:");
            println!("  Total records: {}", checkpoint.record_count);
            println!("  Blocks: {}..={}", checkpoint.from_block, checkpoint.to_block);
            println!("  Head hash: {}", checkpoint.head_hash);
            println!("  Merkle root: {}", checkpoint.merkle_root);
        }
    }

    if let Some(values) = &options.record {
        verify_single_record(&verifier, values, options.verbose).await?;
    }

    if options.verbose || options.proof_block.is_some() {
        let records = load_all_records(store.as_ref(), options.storage_timeout).await?;

        if options.verbose {
            print_type_distribution(&records);
        }
        if let Some(block) = options.proof_block {
            print_inclusion_proof(&records, block)?;
        }
    }

    Ok(())
}

async fn verify_single_record(
    verifier: &VerificationService,
    values: &[String],
    verbose: bool,
) -> Result<()> {
    let [record_type, record_id] = values else {
        return Err(anyhow!("--record takes a type and an id"));
    };
    let record_type: RecordType = record_type.parse()?;

    let result = verifier.verify(record_id, record_type).await?;
    if !result.verified {
        return Err(anyhow!("No ledger record for {} {}", record_type, record_id));
    }
    if !result.chain_integrity || !result.merkle_root_valid {
        return Err(anyhow!(
            "{} {} failed verification: {}",
            record_type,
            record_id,
            result.reason.unwrap_or_default()
        ));
    }

    if verbose {
        if let Some(record) = &result.record {
            println!("✓ {}", record.summary());
        }
    }
    Ok(())
}

async fn load_all_records(
    store: &dyn LedgerStore,
    storage_timeout: Duration,
) -> Result<Vec<LedgerRecord>> {
    let mut records = Vec::new();
    let mut from_block = 1;

    loop {
        let page = with_timeout(storage_timeout, store.blocks(from_block, PAGE_SIZE)).await?;
        let page_len = page.len();
        if let Some(last) = page.last() {
            from_block = last.block_number + 1;
        }
        records.extend(page);
        if page_len < PAGE_SIZE {
            break;
        }
    }

    Ok(records)
}

fn print_type_distribution(records: &[LedgerRecord]) {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.record_type.as_str()).or_insert(0) += 1;
    }

    println!("\nRecord type distribution:");
    for (record_type, count) in counts {
        println!("  {}: {}", record_type, count);
    }
}

fn print_inclusion_proof(records: &[LedgerRecord], block: u64) -> Result<()> {
    let index = records
        .iter()
        .position(|r| r.block_number == block)
        .ok_or_else(|| anyhow!("Block {} not found", block))?;

    let hashes: Vec<String> = records.iter().map(|r| r.data_hash.clone()).collect();
    let proof = merkle_proof(&hashes, index)?;
    if !proof.verify() {
        return Err(anyhow!("Generated proof for block {} does not verify", block));
    }

    println!("{}", serde_json::to_string_pretty(&proof)?);
    Ok(())
}
