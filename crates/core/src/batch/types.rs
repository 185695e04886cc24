//! Work item and variant task types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of variant slots every work item carries.
pub const VARIANT_SLOTS: usize = 3;

/// Lifecycle status of a single variant task.
///
/// ```text
/// PENDING -> SKIPPED
/// PENDING -> PROCESSING -> COMPLETED
///                       -> PROCESSING (retry)
///                       -> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantStatus {
    Pending,
    Skipped,
    Processing,
    Completed,
    Failed,
}

impl VariantStatus {
    /// Wire name, as stored and reported.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Skipped => "SKIPPED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the wire name back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SKIPPED" => Some(Self::Skipped),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal state machine edge.
    ///
    /// Re-asserting the current status is accepted so that status writes
    /// can be retried safely.
    pub fn can_transition_to(&self, next: VariantStatus) -> bool {
        use VariantStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Pending, Skipped) | (Pending, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation request unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantTask {
    /// Slot number, 1 to 3.
    pub variant_number: u8,
    /// Prompt text. `None` means the slot is never dispatched.
    pub directive: Option<String>,
    /// Idempotency key naming the output artifact. Fixed for the task's lifetime.
    pub artifact_key: String,
    pub status: VariantStatus,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl VariantTask {
    /// Create a task for `variant_number` of the item identified by the
    /// already-sanitized `external_id`.
    ///
    /// Blank directives are normalized to `None` and the task starts SKIPPED.
    pub fn new(external_id: &str, variant_number: u8, directive: Option<String>) -> Self {
        let directive = directive
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let status = if directive.is_some() {
            VariantStatus::Pending
        } else {
            VariantStatus::Skipped
        };

        Self {
            variant_number,
            directive,
            artifact_key: artifact_key(external_id, variant_number),
            status,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Whether this task still needs dispatching.
    pub fn is_dispatchable(&self) -> bool {
        self.directive.is_some() && !self.status.is_terminal()
    }
}

/// One manifest record with its variant tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Sanitized identifier, safe for file names and URLs.
    pub external_id: String,
    pub source_asset_ref: String,
    /// 1-based position in the originating manifest.
    pub sequence_number: u32,
    pub variants: Vec<VariantTask>,
}

impl WorkItem {
    /// Build an item with one task per directive slot.
    pub fn new(
        external_id: &str,
        source_asset_ref: impl Into<String>,
        sequence_number: u32,
        directives: [Option<String>; VARIANT_SLOTS],
    ) -> Self {
        let external_id = sanitize_external_id(external_id);
        let variants = directives
            .into_iter()
            .enumerate()
            .map(|(idx, directive)| VariantTask::new(&external_id, idx as u8 + 1, directive))
            .collect();

        Self {
            external_id,
            source_asset_ref: source_asset_ref.into(),
            sequence_number,
            variants,
        }
    }

    pub fn variant(&self, variant_number: u8) -> Option<&VariantTask> {
        self.variants
            .iter()
            .find(|v| v.variant_number == variant_number)
    }

    /// Number of variants with the given status.
    pub fn count(&self, status: VariantStatus) -> usize {
        self.variants.iter().filter(|v| v.status == status).count()
    }

    /// Every non-skipped variant completed.
    pub fn is_success(&self) -> bool {
        self.variants
            .iter()
            .all(|v| matches!(v.status, VariantStatus::Completed | VariantStatus::Skipped))
    }
}

/// A run over a set of work items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub batch_id: String,
    pub items: Vec<WorkItem>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchRun {
    pub fn new(batch_id: impl Into<String>, items: Vec<WorkItem>) -> Self {
        let mut run = Self {
            batch_id: batch_id.into(),
            items,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        };
        run.recount();
        run
    }

    /// Recompute the aggregate counters from the variant statuses.
    pub fn recount(&mut self) {
        self.succeeded = self.total(VariantStatus::Completed);
        self.failed = self.total(VariantStatus::Failed);
        self.skipped = self.total(VariantStatus::Skipped);
    }

    /// Number of variants across all items with the given status.
    pub fn total(&self, status: VariantStatus) -> usize {
        self.items.iter().map(|item| item.count(status)).sum()
    }
}

/// Reduce an identifier to `[A-Za-z0-9_-]`. Empty results become `unknown`.
pub fn sanitize_external_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Deterministic artifact key for a variant slot.
pub fn artifact_key(external_id: &str, variant_number: u8) -> String {
    format!("{}-{}", external_id, variant_number)
}
