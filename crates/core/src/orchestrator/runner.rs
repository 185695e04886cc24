//! Batch orchestrator.
//!
//! Runs the work items of one batch under a run profile:
//! - **Fail-fast**: items in concurrent chunks; the first exhausted variant
//!   stops the run and every later chunk is left untouched.
//! - **Continue-on-error**: items one at a time; failures are recorded and
//!   the run carries on.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::RunProfile;
use super::scheduler::ItemScheduler;
use super::types::{AbortInfo, ItemOutcome, OrchestratorError, RunSummary};
use crate::audit::{AuditEvent, AuditHandle};
use crate::batch::BatchRun;
use crate::store::{RowHandle, StatusStore};

/// Drives a whole batch run to completion.
#[derive(Clone)]
pub struct BatchOrchestrator {
    scheduler: ItemScheduler,
    store: Arc<dyn StatusStore>,
    profile: RunProfile,
    chunk_size: usize,
    audit: Option<AuditHandle>,
}

impl BatchOrchestrator {
    pub fn new(
        scheduler: ItemScheduler,
        store: Arc<dyn StatusStore>,
        profile: RunProfile,
        chunk_size: usize,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            scheduler,
            store,
            profile,
            chunk_size: chunk_size.max(1),
            audit,
        }
    }

    pub fn profile(&self) -> RunProfile {
        self.profile
    }

    /// Execute `run` and summarize it.
    ///
    /// Every item's row is made to exist before any generation call. Only a
    /// failure to create those rows is returned as an error; variant failures
    /// end up in the summary.
    pub async fn run(
        &self,
        run: &mut BatchRun,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, OrchestratorError> {
        let started_at = Utc::now();
        let batch_id = run.batch_id.clone();

        let rows = run
            .items
            .iter()
            .map(|item| self.store.ensure_row(&batch_id, item))
            .collect::<Result<Vec<RowHandle>, _>>()?;

        info!(
            batch_id = %batch_id,
            profile = self.profile.as_str(),
            items = run.items.len(),
            chunk_size = self.chunk_size,
            "Starting batch run"
        );

        let abort = match self.profile {
            RunProfile::FailFast => self.run_chunked(&batch_id, run, &rows, cancel).await,
            RunProfile::ContinueOnError => {
                self.run_sequential(&batch_id, run, &rows, cancel).await;
                None
            }
        };

        if let Some(ref info) = abort {
            error!(
                batch_id = %batch_id,
                external_id = %info.external_id,
                variant = info.variant_number,
                "Batch aborted: {}",
                info.reason
            );
            if let Some(ref audit) = self.audit {
                audit
                    .emit(AuditEvent::BatchAborted {
                        batch_id: batch_id.clone(),
                        external_id: info.external_id.clone(),
                        variant_number: info.variant_number,
                        reason: info.reason.clone(),
                    })
                    .await;
            }
        }

        run.recount();
        let summary = RunSummary::from_run(run, self.profile, abort, cancel.is_cancelled(), started_at);
        info!(
            batch_id = %batch_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            pending = summary.pending,
            aborted = summary.aborted,
            cancelled = summary.cancelled,
            "Batch run finished"
        );
        Ok(summary)
    }

    async fn run_chunked(
        &self,
        batch_id: &str,
        run: &mut BatchRun,
        rows: &[RowHandle],
        cancel: &CancellationToken,
    ) -> Option<AbortInfo> {
        for (chunk_idx, (items, rows)) in run
            .items
            .chunks_mut(self.chunk_size)
            .zip(rows.chunks(self.chunk_size))
            .enumerate()
        {
            if cancel.is_cancelled() {
                warn!(batch_id, chunk = chunk_idx, "Run cancelled, skipping remaining chunks");
                return None;
            }

            let results = join_all(
                items
                    .iter_mut()
                    .zip(rows.iter().copied())
                    .map(|(item, row)| self.scheduler.run_item(batch_id, row, item, cancel)),
            )
            .await;

            // In-flight items of the chunk are allowed to finish; only later
            // chunks are skipped.
            if let Some(abort) = results.into_iter().find_map(Result::err) {
                return Some(abort.info);
            }
        }
        None
    }

    async fn run_sequential(
        &self,
        batch_id: &str,
        run: &mut BatchRun,
        rows: &[RowHandle],
        cancel: &CancellationToken,
    ) {
        for (item, row) in run.items.iter_mut().zip(rows.iter().copied()) {
            if cancel.is_cancelled() {
                warn!(batch_id, "Run cancelled, skipping remaining items");
                return;
            }

            match self.scheduler.run_item(batch_id, row, item, cancel).await {
                Ok(report) if report.outcome == ItemOutcome::PartialFailure => {
                    warn!(
                        batch_id,
                        external_id = %report.external_id,
                        failed = report.failed,
                        "Item finished with failures"
                    );
                }
                Ok(_) => {}
                // Not produced under this profile, but never drop an abort silently.
                Err(abort) => {
                    warn!(batch_id, external_id = %abort.info.external_id, "Unexpected abort");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::batch::{VariantStatus, WorkItem};
    use crate::generation::GenerationError;
    use crate::orchestrator::{ItemPolicy, RetryPolicy, VariantDispatcher, WritePolicy};
    use crate::store::{NewBatch, SqliteStatusStore};
    use crate::testing::MockGenerationClient;

    fn orchestrator(
        store: Arc<SqliteStatusStore>,
        client: Arc<MockGenerationClient>,
        profile: RunProfile,
        chunk_size: usize,
    ) -> BatchOrchestrator {
        let dispatcher = VariantDispatcher::new(
            store.clone(),
            client,
            RetryPolicy::fixed(2, Duration::from_secs(1)),
            WritePolicy {
                attempts: 1,
                backoff: Duration::ZERO,
            },
            None,
        );
        let scheduler = ItemScheduler::new(dispatcher, ItemPolicy::Sequential, profile, Duration::ZERO, false);
        BatchOrchestrator::new(scheduler, store, profile, chunk_size, None)
    }

    fn batch(store: &SqliteStatusStore, n: usize, profile: RunProfile) -> BatchRun {
        let record = store
            .allocate_batch(&NewBatch {
                profile,
                item_count: n,
            })
            .unwrap();
        let items = (1..=n)
            .map(|i| WorkItem::new(&format!("item{}", i), format!("http://img/{}.png", i), i as u32, [Some("x".into()), None, None]))
            .collect();
        BatchRun::new(record.batch_id, items)
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_error_runs_every_item() {
        let store = Arc::new(SqliteStatusStore::in_memory().unwrap());
        let client = Arc::new(MockGenerationClient::new());
        client.fail_always("item2-1", GenerationError::Timeout).await;
        let orch = orchestrator(store.clone(), client.clone(), RunProfile::ContinueOnError, 5);
        let mut run = batch(&store, 3, RunProfile::ContinueOnError);

        let summary = orch.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 0);
        assert!(!summary.aborted);
        assert_eq!(run.succeeded, 2);
        assert_eq!(client.calls_for("item3-1").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_skips_later_chunks() {
        let store = Arc::new(SqliteStatusStore::in_memory().unwrap());
        let client = Arc::new(MockGenerationClient::new());
        client.fail_always("item1-1", GenerationError::Timeout).await;
        let orch = orchestrator(store.clone(), client.clone(), RunProfile::FailFast, 2);
        let mut run = batch(&store, 5, RunProfile::FailFast);

        let summary = orch.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert!(summary.aborted);
        let abort = summary.abort.unwrap();
        assert_eq!(abort.external_id, "item1");
        assert_eq!(abort.variant_number, 1);

        // item2 shared the chunk and ran to completion.
        assert_eq!(run.items[1].variants[0].status, VariantStatus::Completed);
        for item in &run.items[2..] {
            assert_eq!(item.variants[0].status, VariantStatus::Pending);
        }
        assert_eq!(summary.pending, 3);
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_exist_for_unreached_items() {
        let store = Arc::new(SqliteStatusStore::in_memory().unwrap());
        let client = Arc::new(MockGenerationClient::new());
        client.fail_always("item1-1", GenerationError::Timeout).await;
        let orch = orchestrator(store.clone(), client, RunProfile::FailFast, 1);
        let mut run = batch(&store, 3, RunProfile::FailFast);

        orch.run(&mut run, &CancellationToken::new()).await.unwrap();

        let items = store.list_items(&run.batch_id).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].variants[0].task.status, VariantStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_makes_no_calls() {
        let store = Arc::new(SqliteStatusStore::in_memory().unwrap());
        let client = Arc::new(MockGenerationClient::new());
        let orch = orchestrator(store.clone(), client.clone(), RunProfile::ContinueOnError, 5);
        let mut run = batch(&store, 2, RunProfile::ContinueOnError);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = orch.run(&mut run, &cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.pending, 2);
        assert_eq!(client.call_count().await, 0);
    }
}
