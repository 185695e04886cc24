//! Orchestrator lifecycle integration tests.
//!
//! These tests drive whole batches through the manager against a file-backed
//! SQLite store and a mock generation client, with tokio's clock paused so
//! cool-downs and retry delays complete instantly.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::Instant;

use nexus_core::{
    audit::{create_audit_system, AuditFilter, AuditStore, SqliteAuditStore},
    batch::{build_work_items, Directives, ManifestRow, VariantStatus},
    generation::GenerationError,
    orchestrator::{BatchManager, ItemPolicy, OrchestratorConfig, RunProfile},
    store::{BatchState, NewBatch, SqliteStatusStore, StatusStore, StatusUpdate},
    testing::{fixtures, FlakyStatusStore, MockGenerationClient},
};

/// Test helper holding the store, the mock client and the temp directory.
struct TestHarness {
    store: Arc<dyn StatusStore>,
    client: Arc<MockGenerationClient>,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteStatusStore::new(&temp_dir.path().join("nexus.db"))
                .expect("Failed to create status store"),
        );
        Self {
            store,
            client: Arc::new(MockGenerationClient::new()),
            temp_dir,
        }
    }

    fn manager(&self, config: OrchestratorConfig) -> BatchManager {
        BatchManager::new(self.store.clone(), self.client.clone(), config, None)
    }

    fn statuses(&self, batch_id: &str) -> Vec<(String, Vec<VariantStatus>)> {
        self.store
            .list_items(batch_id)
            .unwrap()
            .into_iter()
            .map(|item| {
                (
                    item.external_id,
                    item.variants.iter().map(|v| v.task.status).collect(),
                )
            })
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_rated_sequential_run_respects_cooldown_and_order() {
    let harness = TestHarness::new();
    let manager = harness.manager(OrchestratorConfig {
        run_profile: RunProfile::ContinueOnError,
        item_policy: ItemPolicy::Sequential,
        cooldown_ms: 1_000,
        cooldown_after_success: true,
        ..fixtures::fast_config()
    });

    let start = Instant::now();
    let record = manager
        .start_batch(fixtures::start_request(&["item1", "item2"], &["front", "back"]))
        .await
        .unwrap();
    let summary = manager.wait(&record.batch_id).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(summary.succeeded, 4);
    assert_eq!(
        harness.client.call_order().await,
        vec!["item1-1", "item1-2", "item2-1", "item2-2"]
    );

    let calls = harness.client.calls().await;
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_leaves_later_chunks_pending() {
    let harness = TestHarness::new();
    harness
        .client
        .fail_always("item2-1", GenerationError::Rejected {
            status: 500,
            body: "internal error".to_string(),
        })
        .await;
    let manager = harness.manager(OrchestratorConfig {
        run_profile: RunProfile::FailFast,
        chunk_size: 2,
        ..fixtures::fast_config()
    });

    let record = manager
        .start_batch(fixtures::start_request(
            &["item1", "item2", "item3", "item4"],
            &["front"],
        ))
        .await
        .unwrap();
    let summary = manager.wait(&record.batch_id).await.unwrap();

    assert!(summary.aborted);
    let abort = summary.abort.as_ref().unwrap();
    assert_eq!(abort.external_id, "item2");
    assert_eq!(abort.variant_number, 1);

    let statuses = harness.statuses(&record.batch_id);
    assert_eq!(statuses[0].1[0], VariantStatus::Completed);
    assert_eq!(statuses[1].1[0], VariantStatus::Failed);
    assert_eq!(statuses[2].1[0], VariantStatus::Pending);
    assert_eq!(statuses[3].1[0], VariantStatus::Pending);

    assert!(harness.client.calls_for("item3-1").await.is_empty());
    assert!(harness.client.calls_for("item4-1").await.is_empty());

    let batch = harness.store.get_batch(&record.batch_id).unwrap().unwrap();
    assert_eq!(batch.state, BatchState::Aborted);
    assert_eq!(batch.summary.unwrap().pending, 2);
}

#[tokio::test(start_paused = true)]
async fn test_continue_on_error_records_failure_and_moves_on() {
    let harness = TestHarness::new();
    harness
        .client
        .fail_always("item1-2", GenerationError::Timeout)
        .await;
    let manager = harness.manager(OrchestratorConfig {
        max_attempts: 3,
        ..fixtures::fast_config()
    });

    let record = manager
        .start_batch(fixtures::start_request(&["item1", "item2"], &["front", "back"]))
        .await
        .unwrap();
    let summary = manager.wait(&record.batch_id).await.unwrap();

    assert!(!summary.aborted);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.items_succeeded, 1);
    assert_eq!(summary.items_partial, 1);

    let calls = harness.client.calls_for("item1-2").await;
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.request.artifact_key == "item1-2"));

    let items = harness.store.list_items(&record.batch_id).unwrap();
    let failed = &items[0].variants[1];
    assert_eq!(failed.task.status, VariantStatus::Failed);
    assert_eq!(failed.task.attempt_count, 3);
    assert_eq!(failed.artifact_path.as_deref(), Some("item1-2"));
    assert!(failed
        .task
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("Failed after 3 attempts"));
}

#[tokio::test(start_paused = true)]
async fn test_status_write_failure_forces_failed_and_run_continues() {
    let harness = TestHarness::new();
    let flaky = Arc::new(FlakyStatusStore::new(harness.store.clone()));
    flaky.fail_writes_with_status(VariantStatus::Completed, 3);
    let manager = BatchManager::new(
        flaky.clone(),
        harness.client.clone(),
        fixtures::fast_config(),
        None,
    );

    let record = manager
        .start_batch(fixtures::start_request(&["item1", "item2"], &["front"]))
        .await
        .unwrap();
    let summary = manager.wait(&record.batch_id).await.unwrap();

    assert_eq!(flaky.injected_failures(), 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);

    let items = harness.store.list_items(&record.batch_id).unwrap();
    let forced = &items[0].variants[0].task;
    assert_eq!(forced.status, VariantStatus::Failed);
    assert!(forced
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("status write failed"));
    assert_eq!(items[1].variants[0].task.status, VariantStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_restart_skips_finished_tasks() {
    let harness = TestHarness::new();

    // State left behind by a process that died mid-run.
    let batch_id = {
        let record = harness
            .store
            .allocate_batch(&NewBatch {
                profile: RunProfile::ContinueOnError,
                item_count: 1,
            })
            .unwrap();
        let items = build_work_items(
            &[ManifestRow::new("item1", "https://cdn.example.com/item1.jpg")],
            &Directives::new(Some("front"), Some("back"), Some("top")),
        )
        .unwrap();
        let row = harness.store.ensure_row(&record.batch_id, &items[0]).unwrap();
        harness
            .store
            .update_status(row, 1, &StatusUpdate::processing("item1-1"))
            .unwrap();
        harness
            .store
            .update_status(row, 1, &StatusUpdate::completed())
            .unwrap();
        harness
            .store
            .update_status(
                row,
                2,
                &StatusUpdate::processing("item1-2")
                    .with_attempts(1)
                    .with_error("Generation request timed out"),
            )
            .unwrap();
        record.batch_id
    };

    // Fresh store handle on the same file, as after a restart.
    let reopened: Arc<dyn StatusStore> =
        Arc::new(SqliteStatusStore::new(&harness.temp_dir.path().join("nexus.db")).unwrap());
    let manager = BatchManager::new(
        reopened.clone(),
        harness.client.clone(),
        OrchestratorConfig {
            resume_interrupted: true,
            max_attempts: 3,
            ..fixtures::fast_config()
        },
        None,
    );

    let resumed = manager.recover_interrupted().await.unwrap();
    assert_eq!(resumed, vec![batch_id.clone()]);
    let summary = manager.wait(&batch_id).await.unwrap();
    assert_eq!(summary.succeeded, 3);

    assert_eq!(harness.client.call_order().await, vec!["item1-2", "item1-3"]);
    let items = reopened.list_items(&batch_id).unwrap();
    assert_eq!(items[0].variants[1].task.attempt_count, 1);
    assert_eq!(
        reopened.get_batch(&batch_id).unwrap().unwrap().state,
        BatchState::Finished
    );
}

#[tokio::test(start_paused = true)]
async fn test_batch_ids_increment_across_runs() {
    let harness = TestHarness::new();
    let manager = harness.manager(fixtures::fast_config());

    assert_eq!(manager.next_batch_id().unwrap(), "Batch_001");
    for expected in ["Batch_001", "Batch_002", "Batch_003"] {
        let record = manager
            .start_batch(fixtures::start_request(&["item1"], &["front"]))
            .await
            .unwrap();
        assert_eq!(record.batch_id, expected);
        manager.wait(&record.batch_id).await.unwrap();
    }
    assert_eq!(manager.next_batch_id().unwrap(), "Batch_004");
}

#[tokio::test(start_paused = true)]
async fn test_audit_trail_records_lifecycle() {
    let harness = TestHarness::new();
    let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
    let (audit, writer) = create_audit_system(audit_store.clone(), 256);
    let writer_task = tokio::spawn(writer.run());

    harness
        .client
        .script("item1-1", vec![Err(GenerationError::NotAccepted)])
        .await;
    let manager = BatchManager::new(
        harness.store.clone(),
        harness.client.clone(),
        fixtures::fast_config(),
        Some(audit.clone()),
    );

    let record = manager
        .start_batch(fixtures::start_request(&["item1"], &["front"]))
        .await
        .unwrap();
    manager.wait(&record.batch_id).await.unwrap();

    // Close every sender so the writer drains and exits.
    drop(manager);
    drop(audit);
    tokio::time::sleep(Duration::from_millis(10)).await;
    writer_task.await.unwrap();

    let filter = AuditFilter::new().with_batch_id(record.batch_id.as_str());
    let types: Vec<String> = audit_store
        .query(&filter)
        .unwrap()
        .into_iter()
        .map(|r| r.event_type)
        .collect();
    assert!(types.contains(&"batch_started".to_string()));
    assert!(types.contains(&"variant_attempt_failed".to_string()));
    assert!(types.contains(&"variant_state_changed".to_string()));
    assert!(types.contains(&"batch_finished".to_string()));

    let attempt_failures = audit_store
        .count(&filter.clone().with_event_type("variant_attempt_failed"))
        .unwrap();
    assert_eq!(attempt_failures, 1);
}
