//! Types for the batch orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::RunProfile;
use crate::batch::{BatchRun, VariantStatus};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Batch not found.
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// Batch already has a run in progress.
    #[error("batch is already running: {0}")]
    BatchRunning(String),

    /// Batch has no run in progress.
    #[error("batch is not running: {0}")]
    BatchNotRunning(String),

    /// Status store error.
    #[error("status store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Manifest could not be turned into work items.
    #[error("invalid manifest: {0}")]
    Manifest(#[from] crate::batch::ManifestError),
}

/// Why a variant ended up exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionCause {
    /// Every allowed generation attempt failed.
    RetriesExhausted,
    /// A required status write could not be persisted.
    StatusWrite,
}

/// Signal raised when a variant reaches FAILED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub external_id: String,
    pub variant_number: u8,
    pub cause: ExhaustionCause,
    pub message: String,
}

impl std::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} variant {}: {}",
            self.external_id, self.variant_number, self.message
        )
    }
}

/// Non-exhausted result of dispatching one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantOutcome {
    /// The call was accepted and COMPLETED was recorded.
    Completed,
    /// The task was already terminal; nothing was done.
    Unchanged(VariantStatus),
    /// The run was cancelled while the task waited to retry.
    Cancelled,
}

/// Outcome of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Every non-skipped variant completed.
    Success,
    /// At least one variant failed.
    PartialFailure,
    /// The run was cancelled before the item finished.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub external_id: String,
    pub outcome: ItemOutcome,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Identity of the variant that triggered a fail-fast abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    pub external_id: String,
    pub variant_number: u8,
    pub reason: String,
}

impl From<Exhausted> for AbortInfo {
    fn from(e: Exhausted) -> Self {
        Self {
            external_id: e.external_id,
            variant_number: e.variant_number,
            reason: e.message,
        }
    }
}

/// Abort request passed from an item up to the batch orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAbort {
    pub info: AbortInfo,
}

/// Final outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub batch_id: String,
    pub profile: RunProfile,
    /// Variants COMPLETED.
    pub succeeded: usize,
    /// Variants FAILED.
    pub failed: usize,
    /// Variants SKIPPED.
    pub skipped: usize,
    /// Variants never reached (or left PROCESSING by an interruption).
    pub pending: usize,
    pub items_succeeded: usize,
    pub items_partial: usize,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortInfo>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Summarize the current state of `run`.
    pub fn from_run(
        run: &BatchRun,
        profile: RunProfile,
        abort: Option<AbortInfo>,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let pending =
            run.total(VariantStatus::Pending) + run.total(VariantStatus::Processing);
        let items_succeeded = run.items.iter().filter(|i| i.is_success()).count();
        let items_partial = run
            .items
            .iter()
            .filter(|i| i.count(VariantStatus::Failed) > 0)
            .count();

        Self {
            batch_id: run.batch_id.clone(),
            profile,
            succeeded: run.total(VariantStatus::Completed),
            failed: run.total(VariantStatus::Failed),
            skipped: run.total(VariantStatus::Skipped),
            pending,
            items_succeeded,
            items_partial,
            aborted: abort.is_some(),
            abort,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
