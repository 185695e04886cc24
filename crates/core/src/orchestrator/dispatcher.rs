//! Drives one variant task through its state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::{cool_down, RetryDecision, RetryPolicy};
use super::types::{ExhaustionCause, Exhausted, VariantOutcome};
use crate::audit::{AuditEvent, AuditHandle};
use crate::batch::{VariantStatus, VariantTask};
use crate::generation::{GenerationClient, GenerationRequest};
use crate::metrics;
use crate::store::{RowHandle, StatusStore, StatusUpdate, StoreError};

/// Identity of the work item a variant belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub batch_id: &'a str,
    pub row: RowHandle,
    pub external_id: &'a str,
    pub source_asset_ref: &'a str,
}

/// Status write retry settings.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Executes variant tasks: write-ahead, call, retry, terminal status.
#[derive(Clone)]
pub struct VariantDispatcher {
    store: Arc<dyn StatusStore>,
    client: Arc<dyn GenerationClient>,
    retry: RetryPolicy,
    writes: WritePolicy,
    audit: Option<AuditHandle>,
}

impl VariantDispatcher {
    pub fn new(
        store: Arc<dyn StatusStore>,
        client: Arc<dyn GenerationClient>,
        retry: RetryPolicy,
        writes: WritePolicy,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            store,
            client,
            retry,
            writes,
            audit,
        }
    }

    /// Drive `task` to a terminal status.
    ///
    /// Returns `Err(Exhausted)` when the task ends FAILED, either because every
    /// attempt failed or because a required status write could not be made.
    /// A task that is already terminal is returned untouched without calling
    /// the generation service.
    pub async fn dispatch(
        &self,
        ctx: ItemContext<'_>,
        task: &mut VariantTask,
        cancel: &CancellationToken,
    ) -> Result<VariantOutcome, Exhausted> {
        if task.status.is_terminal() {
            debug!(
                external_id = ctx.external_id,
                variant = task.variant_number,
                status = %task.status,
                "Variant already terminal, not dispatching"
            );
            return Ok(VariantOutcome::Unchanged(task.status));
        }

        let Some(directive) = task.directive.clone() else {
            // Only reachable for rows recorded PENDING without a directive.
            task.status = VariantStatus::Skipped;
            if let Err(e) = self
                .persist(ctx, task.variant_number, &StatusUpdate::new(VariantStatus::Skipped))
                .await
            {
                warn!(external_id = ctx.external_id, variant = task.variant_number, "Failed to record skip: {}", e);
            }
            return Ok(VariantOutcome::Unchanged(VariantStatus::Skipped));
        };

        if task.status == VariantStatus::Pending {
            // Write-ahead: the artifact path is recorded before any call is made.
            let update = StatusUpdate::processing(&task.artifact_key).with_attempts(task.attempt_count);
            if let Err(e) = self.persist(ctx, task.variant_number, &update).await {
                return Err(self.force_fail(ctx, task, e).await);
            }
            task.status = VariantStatus::Processing;
            self.emit_transition(ctx, task.variant_number, VariantStatus::Pending, VariantStatus::Processing, None)
                .await;
        }

        // Resumed with no attempts left: the FAILED write was lost last time.
        if task.attempt_count >= self.retry.max_attempts {
            let cause = task
                .last_error
                .clone()
                .unwrap_or_else(|| "attempts exhausted before resume".to_string());
            return Err(self.exhaust(ctx, task, &cause).await);
        }

        loop {
            let request = GenerationRequest::new(ctx.source_asset_ref, &task.artifact_key, &directive);
            debug!(
                external_id = ctx.external_id,
                variant = task.variant_number,
                attempt = task.attempt_count + 1,
                max_attempts = self.retry.max_attempts,
                correlation_token = %request.correlation_token,
                "Invoking generation"
            );

            let error = match self.client.invoke(&request).await {
                Ok(_) => {
                    metrics::GENERATION_ATTEMPTS
                        .with_label_values(&["success"])
                        .inc();
                    return self.complete(ctx, task).await;
                }
                Err(e) => e,
            };

            let kind = error.kind();
            metrics::GENERATION_ATTEMPTS
                .with_label_values(&[kind.as_str()])
                .inc();
            task.attempt_count += 1;
            task.last_error = Some(error.to_string());

            let decision = self.retry.decide(task.attempt_count, &kind);
            let retry_in = match decision {
                RetryDecision::Retry { delay } => Some(delay),
                RetryDecision::GiveUp => None,
            };

            warn!(
                external_id = ctx.external_id,
                variant = task.variant_number,
                attempt = task.attempt_count,
                max_attempts = self.retry.max_attempts,
                kind = kind.as_str(),
                retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                "Generation attempt failed: {}",
                error
            );
            if let Some(ref audit) = self.audit {
                audit
                    .emit(AuditEvent::VariantAttemptFailed {
                        batch_id: ctx.batch_id.to_string(),
                        external_id: ctx.external_id.to_string(),
                        variant_number: task.variant_number,
                        attempt: task.attempt_count,
                        failure_kind: kind.as_str().to_string(),
                        error: error.to_string(),
                        retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
                    })
                    .await;
            }

            let Some(delay) = retry_in else {
                return Err(self.exhaust(ctx, task, &error.to_string()).await);
            };

            // Progress record; losing it only costs attempt accuracy on resume.
            let progress = StatusUpdate::new(VariantStatus::Processing)
                .with_attempts(task.attempt_count)
                .with_error(error.to_string());
            if let Err(e) = self.persist(ctx, task.variant_number, &progress).await {
                warn!(
                    external_id = ctx.external_id,
                    variant = task.variant_number,
                    "Could not record attempt count: {}",
                    e
                );
            }

            metrics::RETRY_WAITS.inc();
            if !cool_down(delay, cancel).await {
                return Ok(self.cancel_waiting(ctx, task).await);
            }
        }
    }

    async fn complete(
        &self,
        ctx: ItemContext<'_>,
        task: &mut VariantTask,
    ) -> Result<VariantOutcome, Exhausted> {
        let update = StatusUpdate::completed().with_attempts(task.attempt_count);
        if let Err(e) = self.persist(ctx, task.variant_number, &update).await {
            return Err(self.force_fail(ctx, task, e).await);
        }

        task.status = VariantStatus::Completed;
        metrics::VARIANTS_FINISHED
            .with_label_values(&["completed"])
            .inc();
        info!(
            external_id = ctx.external_id,
            variant = task.variant_number,
            artifact_key = %task.artifact_key,
            "Variant completed"
        );
        self.emit_transition(ctx, task.variant_number, VariantStatus::Processing, VariantStatus::Completed, None)
            .await;
        Ok(VariantOutcome::Completed)
    }

    /// Record FAILED after the retry policy gave up.
    async fn exhaust(&self, ctx: ItemContext<'_>, task: &mut VariantTask, cause: &str) -> Exhausted {
        let message = format!("Failed after {} attempts: {}", task.attempt_count, cause);
        let update = StatusUpdate::failed(&message).with_attempts(task.attempt_count);

        if let Err(e) = self.persist(ctx, task.variant_number, &update).await {
            task.last_error = Some(message);
            return self.force_fail(ctx, task, e).await;
        }

        task.status = VariantStatus::Failed;
        task.last_error = Some(message.clone());
        metrics::VARIANTS_FINISHED.with_label_values(&["failed"]).inc();
        error!(
            external_id = ctx.external_id,
            variant = task.variant_number,
            "{}",
            message
        );
        self.emit_transition(
            ctx,
            task.variant_number,
            VariantStatus::Processing,
            VariantStatus::Failed,
            Some(message.clone()),
        )
        .await;

        Exhausted {
            external_id: ctx.external_id.to_string(),
            variant_number: task.variant_number,
            cause: ExhaustionCause::RetriesExhausted,
            message,
        }
    }

    /// Mark the task FAILED because its status could not be persisted.
    async fn force_fail(&self, ctx: ItemContext<'_>, task: &mut VariantTask, err: StoreError) -> Exhausted {
        let message = match task.last_error.take() {
            Some(prev) => format!("status write failed: {} ({})", err, prev),
            None => format!("status write failed: {}", err),
        };
        let from = task.status;
        task.status = VariantStatus::Failed;
        task.last_error = Some(message.clone());

        // One last try; the store may have recovered.
        let update = StatusUpdate::failed(&message).with_attempts(task.attempt_count);
        if let Err(e) = self.store.update_status(ctx.row, task.variant_number, &update) {
            error!(
                external_id = ctx.external_id,
                variant = task.variant_number,
                "Forced failure could not be recorded: {}",
                e
            );
        }

        metrics::VARIANTS_FINISHED.with_label_values(&["failed"]).inc();
        error!(
            external_id = ctx.external_id,
            variant = task.variant_number,
            "Variant force-failed: {}",
            message
        );
        self.emit_transition(ctx, task.variant_number, from, VariantStatus::Failed, Some(message.clone()))
            .await;

        Exhausted {
            external_id: ctx.external_id.to_string(),
            variant_number: task.variant_number,
            cause: ExhaustionCause::StatusWrite,
            message,
        }
    }

    /// The run was cancelled while this task waited to retry.
    async fn cancel_waiting(&self, ctx: ItemContext<'_>, task: &mut VariantTask) -> VariantOutcome {
        let message = match task.last_error.as_deref() {
            Some(last) => format!("Run cancelled after {} attempts: {}", task.attempt_count, last),
            None => format!("Run cancelled after {} attempts", task.attempt_count),
        };
        let update = StatusUpdate::failed(&message).with_attempts(task.attempt_count);
        if let Err(e) = self.persist(ctx, task.variant_number, &update).await {
            warn!(
                external_id = ctx.external_id,
                variant = task.variant_number,
                "Could not record cancellation: {}",
                e
            );
        }

        task.status = VariantStatus::Failed;
        task.last_error = Some(message.clone());
        metrics::VARIANTS_FINISHED.with_label_values(&["failed"]).inc();
        info!(
            external_id = ctx.external_id,
            variant = task.variant_number,
            "{}",
            message
        );
        self.emit_transition(ctx, task.variant_number, VariantStatus::Processing, VariantStatus::Failed, Some(message))
            .await;
        VariantOutcome::Cancelled
    }

    /// Write a status update, retrying transient store errors.
    async fn persist(
        &self,
        ctx: ItemContext<'_>,
        variant_number: u8,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        let attempts = self.writes.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.update_status(ctx.row, variant_number, update) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < attempts => {
                    metrics::STATUS_WRITE_RETRIES.inc();
                    warn!(
                        external_id = ctx.external_id,
                        variant = variant_number,
                        status = %update.status,
                        attempt,
                        "Status write failed, retrying: {}",
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.writes.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn emit_transition(
        &self,
        ctx: ItemContext<'_>,
        variant_number: u8,
        from: VariantStatus,
        to: VariantStatus,
        reason: Option<String>,
    ) {
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::VariantStateChanged {
                    batch_id: ctx.batch_id.to_string(),
                    external_id: ctx.external_id.to_string(),
                    variant_number,
                    from_state: from.as_str().to_string(),
                    to_state: to.as_str().to_string(),
                    reason,
                })
                .await;
        }
    }
}
