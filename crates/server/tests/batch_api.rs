//! Batch API tests against the in-process router.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::{batch_body, TestFixture};
use nexus_core::GenerationError;

#[tokio::test]
async fn test_start_batch_runs_to_completion() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/batches", batch_body(&["A", "B"], &["front", "side"]))
        .await;
    assert_status!(response, StatusCode::CREATED);
    assert_json_path!(response.body, "batch_id", json!("Batch_001"));
    assert_json_path!(response.body, "item_count", json!(2));
    assert_json_path!(response.body, "profile", json!("continue_on_error"));

    fixture.wait_finished("Batch_001", 10).await;

    let status = fixture.get("/api/v1/batches/Batch_001").await;
    assert_status!(status, StatusCode::OK);
    assert_eq!(status.body["running"], json!(false));
    assert_eq!(status.body["batch"]["state"], json!("finished"));
    assert_eq!(status.body["counts"]["completed"], json!(4));
    assert_eq!(status.body["counts"]["skipped"], json!(2));
    assert_eq!(status.body["items"].as_array().unwrap().len(), 2);

    let first = &status.body["items"][0]["variants"][0];
    assert_eq!(first["artifact_key"], json!("A-1"));
    assert_eq!(first["status"], json!("COMPLETED"));
    // only failed attempts are counted
    assert_eq!(first["attempt_count"], json!(0));

    let summary = fixture.get("/api/v1/batches/Batch_001/summary").await;
    assert_status!(summary, StatusCode::OK);
    assert_json_path!(summary.body, "succeeded", json!(4));
    assert_json_path!(summary.body, "failed", json!(0));
    assert_json_path!(summary.body, "aborted", json!(false));

    assert_eq!(fixture.client.call_count().await, 4);
}

#[tokio::test]
async fn test_invalid_manifest_rejected() {
    let fixture = TestFixture::new().await;

    let duplicate = fixture
        .post("/api/v1/batches", batch_body(&["A", "A"], &["front"]))
        .await;
    assert_status!(duplicate, StatusCode::BAD_REQUEST);
    assert!(duplicate.body["error"]
        .as_str()
        .unwrap()
        .contains("duplicate external id"));

    let no_directives = fixture.post("/api/v1/batches", batch_body(&["A"], &[])).await;
    assert_status!(no_directives, StatusCode::BAD_REQUEST);

    let empty = fixture.post("/api/v1/batches", batch_body(&[], &["front"])).await;
    assert_status!(empty, StatusCode::BAD_REQUEST);

    // Nothing was allocated
    let next = fixture.get("/api/v1/batches/next-id").await;
    assert_json_path!(next.body, "batch_id", json!("Batch_001"));
    assert_eq!(fixture.client.call_count().await, 0);
}

#[tokio::test]
async fn test_spreadsheet_columns_accepted() {
    let fixture = TestFixture::new().await;

    let body = json!({
        "rows": [
            { "Product_ID": "SKU 7", "Image_Link": "https://cdn.example.com/sku7.jpg" }
        ],
        "directives": ["front", null, null]
    });
    let response = fixture.post("/api/v1/batches", body).await;
    assert_status!(response, StatusCode::CREATED);
    fixture.wait_finished("Batch_001", 10).await;

    let status = fixture.get("/api/v1/batches/Batch_001").await;
    assert_eq!(status.body["items"][0]["external_id"], json!("SKU7"));
    assert_eq!(
        status.body["items"][0]["source_asset_ref"],
        json!("https://cdn.example.com/sku7.jpg")
    );
    assert_eq!(fixture.client.calls_for("SKU7-1").await.len(), 1);
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_raw("/api/v1/batches", "{not json").await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_next_batch_id_advances() {
    let fixture = TestFixture::new().await;

    let before = fixture.get("/api/v1/batches/next-id").await;
    assert_status!(before, StatusCode::OK);
    assert_json_path!(before.body, "batch_id", json!("Batch_001"));

    fixture
        .post("/api/v1/batches", batch_body(&["A"], &["front"]))
        .await;
    fixture.wait_finished("Batch_001", 10).await;

    let after = fixture.get("/api/v1/batches/next-id").await;
    assert_json_path!(after.body, "batch_id", json!("Batch_002"));
}

#[tokio::test]
async fn test_unknown_batch_returns_404() {
    let fixture = TestFixture::new().await;

    let status = fixture.get("/api/v1/batches/Batch_042").await;
    assert_status!(status, StatusCode::NOT_FOUND);

    let summary = fixture.get("/api/v1/batches/Batch_042/summary").await;
    assert_status!(summary, StatusCode::NOT_FOUND);

    let resume = fixture.post_empty("/api/v1/batches/Batch_042/resume").await;
    assert_status!(resume, StatusCode::NOT_FOUND);

    let cancel = fixture.post_empty("/api/v1/batches/Batch_042/cancel").await;
    assert_status!(cancel, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_batches_by_state() {
    let fixture = TestFixture::new().await;

    fixture
        .post("/api/v1/batches", batch_body(&["A"], &["front"]))
        .await;
    fixture.wait_finished("Batch_001", 10).await;

    let mut fail_fast = batch_body(&["B"], &["front"]);
    fail_fast["profile"] = json!("fail_fast");
    fixture
        .client
        .fail_always(
            "B-1",
            GenerationError::Rejected {
                status: 500,
                body: "boom".to_string(),
            },
        )
        .await;
    fixture.post("/api/v1/batches", fail_fast).await;
    fixture.wait_finished("Batch_002", 10).await;

    let all = fixture.get("/api/v1/batches").await;
    assert_status!(all, StatusCode::OK);
    assert_eq!(all.body["batches"].as_array().unwrap().len(), 2);

    let finished = fixture.get("/api/v1/batches?state=finished").await;
    let finished = finished.body["batches"].as_array().unwrap().clone();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0]["batch_id"], json!("Batch_001"));

    let aborted = fixture.get("/api/v1/batches?state=aborted").await;
    let aborted = aborted.body["batches"].as_array().unwrap().clone();
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0]["batch_id"], json!("Batch_002"));
    assert_eq!(aborted[0]["summary"]["aborted"], json!(true));

    let bogus = fixture.get("/api/v1/batches?state=bogus").await;
    assert_status!(bogus, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fail_fast_abort_reported() {
    let fixture = TestFixture::new().await;
    fixture
        .client
        .fail_always(
            "A-1",
            GenerationError::Rejected {
                status: 500,
                body: "boom".to_string(),
            },
        )
        .await;

    let mut body = batch_body(&["A"], &["front", "side"]);
    body["profile"] = json!("fail_fast");
    let response = fixture.post("/api/v1/batches", body).await;
    assert_status!(response, StatusCode::CREATED);
    assert_json_path!(response.body, "profile", json!("fail_fast"));

    fixture.wait_finished("Batch_001", 10).await;

    let summary = fixture.get("/api/v1/batches/Batch_001/summary").await;
    assert_status!(summary, StatusCode::OK);
    assert_json_path!(summary.body, "aborted", json!(true));
    assert_eq!(summary.body["abort"]["external_id"], json!("A"));
    assert_eq!(summary.body["abort"]["variant_number"], json!(1));
    assert_json_path!(summary.body, "failed", json!(1));
    // The second variant of the item was never dispatched
    assert_json_path!(summary.body, "pending", json!(1));

    let status = fixture.get("/api/v1/batches/Batch_001").await;
    let variant = &status.body["items"][0]["variants"][0];
    assert_eq!(variant["status"], json!("FAILED"));
    assert_eq!(variant["attempt_count"], json!(2));
    assert!(variant["last_error"]
        .as_str()
        .unwrap()
        .starts_with("Failed after 2 attempts:"));
}

#[tokio::test]
async fn test_cancel_then_resume() {
    let fixture = TestFixture::new().await;
    fixture.client.set_latency(Duration::from_millis(300)).await;

    fixture
        .post("/api/v1/batches", batch_body(&["A"], &["front", "side", "back"]))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Still running
    let running = fixture.get("/api/v1/batches/Batch_001/summary").await;
    assert_status!(running, StatusCode::CONFLICT);
    let health = fixture.get("/api/v1/health").await;
    assert_json_path!(health.body, "active_batches", json!(1));

    let resume_while_running = fixture.post_empty("/api/v1/batches/Batch_001/resume").await;
    assert_status!(resume_while_running, StatusCode::CONFLICT);

    let cancel = fixture.post_empty("/api/v1/batches/Batch_001/cancel").await;
    assert_status!(cancel, StatusCode::ACCEPTED);

    fixture.wait_finished("Batch_001", 10).await;

    let summary = fixture.get("/api/v1/batches/Batch_001/summary").await;
    assert_json_path!(summary.body, "cancelled", json!(true));
    let pending = summary.body["pending"].as_u64().unwrap();
    let succeeded = summary.body["succeeded"].as_u64().unwrap();
    assert!(pending > 0);
    assert_eq!(pending + succeeded, 3);

    let status = fixture.get("/api/v1/batches/Batch_001").await;
    assert_eq!(status.body["batch"]["state"], json!("cancelled"));

    let cancel_again = fixture.post_empty("/api/v1/batches/Batch_001/cancel").await;
    assert_status!(cancel_again, StatusCode::CONFLICT);

    // Resume picks up only what was left
    fixture.client.set_latency(Duration::ZERO).await;
    fixture.client.clear_calls().await;
    let resume = fixture.post_empty("/api/v1/batches/Batch_001/resume").await;
    assert_status!(resume, StatusCode::ACCEPTED);
    assert_json_path!(resume.body, "state", json!("running"));

    fixture.wait_finished("Batch_001", 10).await;

    let summary = fixture.get("/api/v1/batches/Batch_001/summary").await;
    assert_json_path!(summary.body, "succeeded", json!(3));
    assert_json_path!(summary.body, "cancelled", json!(false));
    assert_eq!(fixture.client.call_count().await as u64, pending);
}

#[tokio::test]
async fn test_audit_trail_for_batch() {
    let fixture = TestFixture::new().await;
    fixture
        .client
        .script(
            "A-1",
            vec![Err(GenerationError::Timeout), Ok(())],
        )
        .await;

    fixture
        .post("/api/v1/batches", batch_body(&["A"], &["front"]))
        .await;
    fixture.wait_finished("Batch_001", 10).await;

    // Give the audit writer a moment to flush
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = fixture.get("/api/v1/audit?batch_id=Batch_001&limit=100").await;
    assert_status!(response, StatusCode::OK);

    let types: Vec<String> = response.body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap().to_string())
        .collect();
    assert!(types.contains(&"batch_started".to_string()));
    assert!(types.contains(&"variant_attempt_failed".to_string()));
    assert!(types.contains(&"batch_finished".to_string()));

    let failures = fixture
        .get("/api/v1/audit?batch_id=Batch_001&event_type=variant_attempt_failed")
        .await;
    assert_json_path!(failures.body, "total", json!(1));
    let event = &failures.body["events"][0]["data"];
    assert_eq!(event["failure_kind"], json!("timeout"));
    assert_eq!(event["attempt"], json!(1));
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(
        response.body["generation"]["auth_token_configured"],
        json!(true)
    );
    assert_eq!(response.body["orchestrator"]["max_attempts"], json!(2));
    assert!(!response.body.to_string().contains("test-token"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;

    fixture
        .post("/api/v1/batches", batch_body(&["A"], &["front"]))
        .await;
    fixture.wait_finished("Batch_001", 10).await;

    let response = fixture.get("/metrics").await;
    assert_status!(response, StatusCode::OK);
}
