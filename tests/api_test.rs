//! Transparency API tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use grading_ledger::api::{self, AppState};
use grading_ledger::config::AppConfig;
use grading_ledger::ledger::{RecordType, SubmissionPayload};

mod common;
use common::*;

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn seeded_state() -> (grading_ledger::database::Database, AppState) {
    let db = setup_test_db().await;
    let (store, linker, _) = ledger_services(&db);

    linker
        .link(RecordType::AssignmentTemplate, "T1-id", &json!({"title": "Essay"}))
        .await
        .unwrap();
    linker
        .link(RecordType::Submission, "S1-id", &json!({"fileHash": "abc123"}))
        .await
        .unwrap();
    linker
        .link(RecordType::Grade, "S1-id", &json!({"marks": 90}))
        .await
        .unwrap();

    let config = AppConfig {
        max_recent_limit: 2,
        ..AppConfig::default()
    };
    (db, AppState::new(store, config))
}

#[tokio::test]
async fn test_health() {
    let (_db, state) = seeded_state().await;
    let (status, body) = get_json(api::router(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_recent_is_newest_first_and_clamped() {
    let (_db, state) = seeded_state().await;

    let (status, body) = get_json(api::router(state.clone()), "/ledger/recent?limit=50").await;
    assert_eq!(status, StatusCode::OK);
    let blocks: Vec<u64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["blockNumber"].as_u64().unwrap())
        .collect();
    assert_eq!(blocks, vec![3, 2]);

    let (_, body) = get_json(api::router(state), "/ledger/recent?limit=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_record_lookup() {
    let (_db, state) = seeded_state().await;

    let (status, body) = get_json(api::router(state.clone()), "/ledger/records/submission/S1-id").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["recordType"], "submission");
    assert_eq!(body[0]["blockNumber"], 2);

    let (status, _) = get_json(api::router(state.clone()), "/ledger/records/grade/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get_json(api::router(state), "/ledger/records/essay/S1-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Unknown record type"));
}

#[tokio::test]
async fn test_undecodable_stored_row_is_server_error() {
    let (db, state) = seeded_state().await;
    renumber_block(&db, 3, -3).await;

    let (status, body) = get_json(api::router(state.clone()), "/ledger/recent").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("Negative block number"));

    let (status, _) = get_json(api::router(state), "/ledger/records/grade/S1-id").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_state_recorder_links_into_served_ledger() {
    let (_db, state) = seeded_state().await;

    let outcome = state
        .recorder()
        .submission_received(
            "S2-id",
            &SubmissionPayload::for_file("T1-id", "student-2", b"second essay"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.record().unwrap().block_number, 4);

    let (status, body) = get_json(api::router(state), "/ledger/verify/submission/S2-id").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chainIntegrity"], true);
}

#[tokio::test]
async fn test_verify_endpoint() {
    let (db, state) = seeded_state().await;

    let (status, body) = get_json(api::router(state.clone()), "/ledger/verify/submission/S1-id").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["chainIntegrity"], true);
    assert_eq!(body["record"]["recordId"], "S1-id");

    tamper_previous_hash(&db, 2, "0").await;

    let (status, body) = get_json(api::router(state.clone()), "/ledger/verify/submission/S1-id").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["chainIntegrity"], false);

    let (status, body) = get_json(api::router(state), "/ledger/verify/grade/S2-id").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], false);
    assert_eq!(body["reason"], "not found");
}

#[tokio::test]
async fn test_audit_endpoint() {
    let (db, state) = seeded_state().await;

    let (status, body) = get_json(api::router(state.clone()), "/ledger/audit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recordCount"], 3);
    assert_eq!(body["brokenLinks"], json!([]));
    assert_eq!(body["checkpoint"]["toBlock"], 3);

    delete_block(&db, 1).await;

    let (_, body) = get_json(api::router(state), "/ledger/audit").await;
    assert_eq!(body["missingBlocks"], json!([1]));
    assert_eq!(body["brokenLinks"], json!([2]));
}
