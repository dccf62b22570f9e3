use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grading_ledger::api::{self, AppState};
use grading_ledger::config::AppConfig;
use grading_ledger::database::Database;
use grading_ledger::ledger::{LedgerStore, VerificationService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grading_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting grading ledger");

    // Load configuration
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => AppConfig::from_file(Path::new(&path))?,
        Err(_) => AppConfig::load()?,
    };
    info!(
        "Configuration loaded (link policy: {}, storage timeout: {:?})",
        config.link_policy,
        config.storage_timeout()
    );

    // Initialize database
    let database = Database::new(&config.database_url).await?;
    database.run_migrations().await?;
    info!("Database migrations completed");

    let store: Arc<dyn LedgerStore> = Arc::new(database.ledger_store());

    // Broken chains are surfaced, never repaired
    let report = VerificationService::new(store.clone())
        .with_timeout(config.storage_timeout())
        .audit_chain()
        .await?;
    if !report.is_valid() {
        error!("Startup audit found defects: {}", report.summary());
    }

    let addr = config.bind_addr();
    let app = api::router(AppState::new(store, config));

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
