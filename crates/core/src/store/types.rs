use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{VariantStatus, VariantTask, WorkItem};
use crate::orchestrator::{RunProfile, RunSummary};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for row {row} variant {variant_number}: {from} -> {to}")]
    InvalidTransition {
        row: i64,
        variant_number: u8,
        from: VariantStatus,
        to: VariantStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether trying the same write again could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Opaque key of one work item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowHandle(pub i64);

impl std::fmt::Display for RowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields written for one variant. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: VariantStatus,
    pub artifact_path: Option<String>,
    pub error: Option<String>,
    pub attempt_count: Option<u32>,
}

impl StatusUpdate {
    pub fn new(status: VariantStatus) -> Self {
        Self {
            status,
            artifact_path: None,
            error: None,
            attempt_count: None,
        }
    }

    /// Write-ahead record made before the first call.
    pub fn processing(artifact_path: impl Into<String>) -> Self {
        Self::new(VariantStatus::Processing).with_artifact_path(artifact_path)
    }

    pub fn completed() -> Self {
        Self::new(VariantStatus::Completed)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(VariantStatus::Failed).with_error(error)
    }

    pub fn with_artifact_path(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attempts(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }
}

/// Lifecycle of a batch as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Running,
    Finished,
    Aborted,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "aborted" => Some(Self::Aborted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Request to allocate a new batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub profile: RunProfile,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub item_count: usize,
    pub profile: RunProfile,
    pub state: BatchState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for listing batches.
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub state: Option<BatchState>,
    pub limit: i64,
    pub offset: i64,
}

impl BatchFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_state(mut self, state: BatchState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Stored state of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRecord {
    #[serde(flatten)]
    pub task: VariantTask,
    /// Set by the write-ahead before the first call.
    pub artifact_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Stored state of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub row: RowHandle,
    pub batch_id: String,
    pub external_id: String,
    pub source_asset_ref: String,
    pub sequence_number: u32,
    pub variants: Vec<VariantRecord>,
}

impl ItemRecord {
    /// Rebuild the in-memory work item, e.g. to resume a batch.
    pub fn to_work_item(&self) -> WorkItem {
        WorkItem {
            external_id: self.external_id.clone(),
            source_asset_ref: self.source_asset_ref.clone(),
            sequence_number: self.sequence_number,
            variants: self.variants.iter().map(|v| v.task.clone()).collect(),
        }
    }
}
