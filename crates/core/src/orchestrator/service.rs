//! Batch manager: starts, tracks, cancels and resumes batch runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::{OrchestratorConfig, RunProfile};
use super::dispatcher::{VariantDispatcher, WritePolicy};
use super::retry::RetryPolicy;
use super::runner::BatchOrchestrator;
use super::scheduler::ItemScheduler;
use super::types::{AbortInfo, OrchestratorError, RunSummary};
use crate::audit::{AuditEvent, AuditHandle};
use crate::batch::{
    build_work_items, BatchRun, Directives, ManifestRow, VariantStatus, WorkItem,
};
use crate::generation::GenerationClient;
use crate::metrics;
use crate::store::{
    BatchFilter, BatchRecord, BatchState, ItemRecord, NewBatch, StatusStore,
};

/// Request to start a new batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartBatchRequest {
    pub rows: Vec<ManifestRow>,
    pub directives: Directives,
    /// Overrides the configured run profile for this batch.
    #[serde(default)]
    pub profile: Option<RunProfile>,
}

/// Variant counts of a batch by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    fn from_items(items: &[ItemRecord]) -> Self {
        let mut counts = Self::default();
        for variant in items.iter().flat_map(|i| &i.variants) {
            match variant.task.status {
                VariantStatus::Pending => counts.pending += 1,
                VariantStatus::Processing => counts.processing += 1,
                VariantStatus::Completed => counts.completed += 1,
                VariantStatus::Failed => counts.failed += 1,
                VariantStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

/// Live view of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch: BatchRecord,
    /// Whether a run of this batch is in progress in this process.
    pub running: bool,
    pub counts: StatusCounts,
    pub items: Vec<ItemRecord>,
}

struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<Option<RunSummary>>,
}

/// A claimed entry in the active-run registry, not yet running.
struct RunSlot {
    cancel: CancellationToken,
    done_tx: watch::Sender<Option<RunSummary>>,
}

struct Inner {
    store: Arc<dyn StatusStore>,
    client: Arc<dyn GenerationClient>,
    config: OrchestratorConfig,
    audit: Option<AuditHandle>,
    active: RwLock<HashMap<String, ActiveRun>>,
    shutdown: CancellationToken,
}

/// Entry point for everything that starts or observes batch runs.
///
/// Cheap to clone; clones share the same set of active runs.
#[derive(Clone)]
pub struct BatchManager {
    inner: Arc<Inner>,
}

impl BatchManager {
    pub fn new(
        store: Arc<dyn StatusStore>,
        client: Arc<dyn GenerationClient>,
        config: OrchestratorConfig,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                config,
                audit,
                active: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.inner.store
    }

    /// Build the orchestrator for one run.
    fn orchestrator(&self, profile: RunProfile) -> BatchOrchestrator {
        let config = &self.inner.config;
        let dispatcher = VariantDispatcher::new(
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.client),
            RetryPolicy::from_config(config),
            WritePolicy {
                attempts: config.status_write_attempts,
                backoff: config.status_write_backoff(),
            },
            self.inner.audit.clone(),
        );
        let scheduler = ItemScheduler::new(
            dispatcher,
            config.item_policy,
            profile,
            config.cooldown(),
            config.cooldown_after_success,
        );
        BatchOrchestrator::new(
            scheduler,
            Arc::clone(&self.inner.store),
            profile,
            config.chunk_size,
            self.inner.audit.clone(),
        )
    }

    /// Allocate a batch for the manifest and start running it.
    ///
    /// Every item row exists in the store when this returns.
    pub async fn start_batch(&self, request: StartBatchRequest) -> Result<BatchRecord, OrchestratorError> {
        let items = build_work_items(&request.rows, &request.directives)?;
        let profile = request.profile.unwrap_or(self.inner.config.run_profile);

        let record = self.inner.store.allocate_batch(&NewBatch {
            profile,
            item_count: items.len(),
        })?;
        let slot = self.claim(&record.batch_id).await?;
        if let Err(e) = items
            .iter()
            .try_for_each(|item| self.inner.store.ensure_row(&record.batch_id, item).map(|_| ()))
        {
            self.release(&record.batch_id).await;
            return Err(e.into());
        }

        info!(
            batch_id = %record.batch_id,
            items = items.len(),
            directives = request.directives.active(),
            profile = profile.as_str(),
            "Batch created"
        );
        self.emit(AuditEvent::BatchStarted {
            batch_id: record.batch_id.clone(),
            profile: profile.as_str().to_string(),
            item_count: items.len(),
            resumed: false,
        })
        .await;

        self.launch(BatchRun::new(record.batch_id.clone(), items), profile, slot);
        Ok(record)
    }

    /// Re-run a batch from its stored state.
    ///
    /// Terminal tasks are left alone; PROCESSING tasks continue with their
    /// recorded attempt count.
    pub async fn resume_batch(&self, batch_id: &str) -> Result<BatchRecord, OrchestratorError> {
        let slot = self.claim(batch_id).await?;
        let (record, items) = match self.prepare_resume(batch_id) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.release(batch_id).await;
                return Err(e);
            }
        };

        info!(batch_id, items = items.len(), profile = record.profile.as_str(), "Resuming batch");
        self.emit(AuditEvent::BatchStarted {
            batch_id: batch_id.to_string(),
            profile: record.profile.as_str().to_string(),
            item_count: items.len(),
            resumed: true,
        })
        .await;

        self.launch(BatchRun::new(batch_id, items), record.profile, slot);
        Ok(record)
    }

    /// Load a batch for resumption and mark it running again.
    fn prepare_resume(&self, batch_id: &str) -> Result<(BatchRecord, Vec<WorkItem>), OrchestratorError> {
        let store = &self.inner.store;
        if store.get_batch(batch_id)?.is_none() {
            return Err(OrchestratorError::BatchNotFound(batch_id.to_string()));
        }
        let items = store
            .list_items(batch_id)?
            .iter()
            .map(ItemRecord::to_work_item)
            .collect();
        store.set_batch_state(batch_id, BatchState::Running, None)?;

        let record = store
            .get_batch(batch_id)?
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))?;
        Ok((record, items))
    }

    /// Resume every batch still recorded as running, e.g. after a crash.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, OrchestratorError> {
        let stranded = self
            .inner
            .store
            .list_batches(&BatchFilter::new().with_state(BatchState::Running))?;

        let mut resumed = Vec::new();
        for batch in stranded {
            match self.resume_batch(&batch.batch_id).await {
                Ok(_) => resumed.push(batch.batch_id),
                Err(OrchestratorError::BatchRunning(_)) => {}
                Err(e) => {
                    error!(batch_id = %batch.batch_id, "Failed to resume interrupted batch: {}", e);
                }
            }
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "Resumed interrupted batches");
        }
        Ok(resumed)
    }

    /// Register `batch_id` as active, failing if a run already holds it.
    ///
    /// Check and insert happen under one write lock, so at most one run
    /// writes a batch's rows at a time.
    async fn claim(&self, batch_id: &str) -> Result<RunSlot, OrchestratorError> {
        let mut active = self.inner.active.write().await;
        if active.contains_key(batch_id) {
            return Err(OrchestratorError::BatchRunning(batch_id.to_string()));
        }

        let cancel = self.inner.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        active.insert(
            batch_id.to_string(),
            ActiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        metrics::ACTIVE_BATCHES.inc();
        Ok(RunSlot { cancel, done_tx })
    }

    /// Give back a slot whose run never started.
    async fn release(&self, batch_id: &str) {
        if self.inner.active.write().await.remove(batch_id).is_some() {
            metrics::ACTIVE_BATCHES.dec();
        }
    }

    fn launch(&self, mut run: BatchRun, profile: RunProfile, slot: RunSlot) {
        let batch_id = run.batch_id.clone();
        let RunSlot { cancel, done_tx } = slot;

        let orchestrator = self.orchestrator(profile);
        let manager = self.clone();
        tokio::spawn(async move {
            let started_at = Utc::now();
            let summary = match orchestrator.run(&mut run, &cancel).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(batch_id = %batch_id, "Batch run failed: {}", e);
                    run.recount();
                    let abort = AbortInfo {
                        external_id: String::new(),
                        variant_number: 0,
                        reason: format!("status store unavailable: {}", e),
                    };
                    RunSummary::from_run(&run, profile, Some(abort), cancel.is_cancelled(), started_at)
                }
            };
            manager.finish_run(&batch_id, summary, done_tx).await;
        });
    }

    async fn finish_run(
        &self,
        batch_id: &str,
        summary: RunSummary,
        done_tx: watch::Sender<Option<RunSummary>>,
    ) {
        let state = if summary.cancelled {
            BatchState::Cancelled
        } else if summary.aborted {
            BatchState::Aborted
        } else {
            BatchState::Finished
        };

        if let Err(e) = self
            .inner
            .store
            .set_batch_state(batch_id, state, Some(&summary))
        {
            error!(batch_id, "Failed to record batch summary: {}", e);
        }

        metrics::BATCHES_FINISHED
            .with_label_values(&[state.as_str()])
            .inc();
        metrics::BATCH_DURATION.observe(summary.duration_ms() as f64 / 1000.0);
        metrics::ACTIVE_BATCHES.dec();

        self.emit(AuditEvent::BatchFinished {
            batch_id: batch_id.to_string(),
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            pending: summary.pending,
            aborted: summary.aborted,
            cancelled: summary.cancelled,
            duration_ms: summary.duration_ms(),
        })
        .await;

        self.inner.active.write().await.remove(batch_id);
        // Receivers may all be gone; the summary is in the store either way.
        let _ = done_tx.send(Some(summary));
    }

    /// Stored record, item rows and variant counts of a batch.
    pub async fn batch_status(&self, batch_id: &str) -> Result<BatchStatus, OrchestratorError> {
        let batch = self
            .inner
            .store
            .get_batch(batch_id)?
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))?;
        let items = self.inner.store.list_items(batch_id)?;
        let running = self.inner.active.read().await.contains_key(batch_id);

        Ok(BatchStatus {
            counts: StatusCounts::from_items(&items),
            batch,
            running,
            items,
        })
    }

    /// Final summary, `None` while the batch has not finished.
    pub fn summary(&self, batch_id: &str) -> Result<Option<RunSummary>, OrchestratorError> {
        let batch = self
            .inner
            .store
            .get_batch(batch_id)?
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))?;
        Ok(batch.summary)
    }

    pub fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<BatchRecord>, OrchestratorError> {
        Ok(self.inner.store.list_batches(filter)?)
    }

    /// The id the next `start_batch` would be given.
    pub fn next_batch_id(&self) -> Result<String, OrchestratorError> {
        Ok(self.inner.store.peek_batch_id()?)
    }

    /// Stop a running batch. No new variant starts; calls in flight finish.
    pub async fn cancel(&self, batch_id: &str) -> Result<(), OrchestratorError> {
        let active = self.inner.active.read().await;
        let Some(run) = active.get(batch_id) else {
            drop(active);
            return match self.inner.store.get_batch(batch_id)? {
                Some(_) => Err(OrchestratorError::BatchNotRunning(batch_id.to_string())),
                None => Err(OrchestratorError::BatchNotFound(batch_id.to_string())),
            };
        };
        run.cancel.cancel();
        drop(active);

        warn!(batch_id, "Batch cancelled by request");
        self.emit(AuditEvent::BatchCancelled {
            batch_id: batch_id.to_string(),
        })
        .await;
        Ok(())
    }

    /// Wait for a batch to finish and return its summary.
    pub async fn wait(&self, batch_id: &str) -> Result<RunSummary, OrchestratorError> {
        let done = self
            .inner
            .active
            .read()
            .await
            .get(batch_id)
            .map(|run| run.done.clone());

        if let Some(mut done) = done {
            if let Ok(summary) = done.wait_for(Option::is_some).await {
                if let Some(summary) = summary.clone() {
                    return Ok(summary);
                }
            }
        }

        self.summary(batch_id)?
            .ok_or_else(|| OrchestratorError::BatchNotRunning(batch_id.to_string()))
    }

    /// Number of runs currently in progress.
    pub async fn active_count(&self) -> usize {
        self.inner.active.read().await.len()
    }

    /// Cancel every active run and wait for them to settle.
    pub async fn shutdown(&self, timeout: Duration) {
        let ids: Vec<String> = self.inner.active.read().await.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }

        info!(count = ids.len(), "Cancelling active batches");
        self.inner.shutdown.cancel();
        for id in ids {
            if tokio::time::timeout(timeout, self.wait(&id)).await.is_err() {
                warn!(batch_id = %id, "Batch did not stop in time");
            }
        }
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.inner.audit {
            audit.emit(event).await;
        }
    }
}
