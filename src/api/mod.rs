//! Transparency API
//!
//! Read-only HTTP surface over the ledger: record lookup, recent records,
//! per-record verification and a full-chain audit.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::AppConfig;
use crate::error::LedgerError;
use crate::ledger::events::EventRecorder;
use crate::ledger::record::{LedgerRecord, RecordType};
use crate::ledger::store::{with_timeout, LedgerStore};
use crate::ledger::verify::{ChainReport, VerificationResult, VerificationService};

const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn LedgerStore>,
    verifier: VerificationService,
    recorder: EventRecorder,
    config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, config: AppConfig) -> Self {
        let verifier =
            VerificationService::new(store.clone()).with_timeout(config.storage_timeout());
        let recorder = EventRecorder::from_config(store.clone(), &config);
        Self {
            store,
            verifier,
            recorder,
            config: Arc::new(config),
        }
    }

    /// Recorder for the template, submission and grading workflows sharing this ledger
    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ledger/recent", get(recent_records))
        .route("/ledger/audit", get(audit_chain))
        .route("/ledger/records/:record_type/:record_id", get(record_history))
        .route("/ledger/verify/:record_type/:record_id", get(verify_record))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

/// Ledger errors rendered as JSON with a matching status code
pub enum ApiError {
    /// The request itself was malformed
    BadRequest(LedgerError),
    Ledger(LedgerError),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, err) = match self {
            ApiError::BadRequest(err) => (StatusCode::BAD_REQUEST, err),
            ApiError::Ledger(err) => {
                let status = match &err {
                    LedgerError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
                    LedgerError::StorageUnavailable(_) | LedgerError::StorageTimeout(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    // Includes stored rows that no longer decode
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err)
            }
        };

        if status.is_server_error() {
            error!("Ledger request failed: {}", err);
        }

        let body = Json(serde_json::json!({ "error": err.to_string() }));
        (status, body).into_response()
    }
}

fn parse_record_type(raw: &str) -> Result<RecordType, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    limit: Option<usize>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "grading-ledger",
        "timestamp": chrono::Utc::now()
    }))
}

async fn recent_records(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<LedgerRecord>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(state.config.max_recent_limit);

    let records = with_timeout(state.config.storage_timeout(), state.store.recent(limit)).await?;
    Ok(Json(records))
}

async fn record_history(
    State(state): State<AppState>,
    Path((record_type, record_id)): Path<(String, String)>,
) -> Result<Json<Vec<LedgerRecord>>, ApiError> {
    let record_type = parse_record_type(&record_type)?;

    let records = with_timeout(
        state.config.storage_timeout(),
        state.store.history(&record_id, record_type),
    )
    .await?;

    if records.is_empty() {
        return Err(LedgerError::not_found(record_type, &record_id).into());
    }
    Ok(Json(records))
}

async fn verify_record(
    State(state): State<AppState>,
    Path((record_type, record_id)): Path<(String, String)>,
) -> Result<Json<VerificationResult>, ApiError> {
    let record_type = parse_record_type(&record_type)?;
    let result = state.verifier.verify(&record_id, record_type).await?;
    Ok(Json(result))
}

async fn audit_chain(State(state): State<AppState>) -> Result<Json<ChainReport>, ApiError> {
    Ok(Json(state.verifier.audit_chain().await?))
}
