use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Batch lifecycle
    BatchStarted {
        batch_id: String,
        /// Run profile ("fail_fast" or "continue_on_error")
        profile: String,
        item_count: usize,
        /// True when an existing batch was picked up again
        #[serde(default)]
        resumed: bool,
    },
    BatchAborted {
        batch_id: String,
        /// Item whose variant triggered the abort
        external_id: String,
        variant_number: u8,
        reason: String,
    },
    BatchCancelled {
        batch_id: String,
    },
    BatchFinished {
        batch_id: String,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        pending: usize,
        aborted: bool,
        cancelled: bool,
        duration_ms: u64,
    },

    // Variant lifecycle
    VariantStateChanged {
        batch_id: String,
        external_id: String,
        variant_number: u8,
        from_state: String,
        to_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A single generation attempt failed.
    VariantAttemptFailed {
        batch_id: String,
        external_id: String,
        variant_number: u8,
        /// Failed attempts so far, including this one
        attempt: u32,
        failure_kind: String,
        error: String,
        /// Delay before the next attempt, absent when giving up
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::BatchStarted { .. } => "batch_started",
            Self::BatchAborted { .. } => "batch_aborted",
            Self::BatchCancelled { .. } => "batch_cancelled",
            Self::BatchFinished { .. } => "batch_finished",
            Self::VariantStateChanged { .. } => "variant_state_changed",
            Self::VariantAttemptFailed { .. } => "variant_attempt_failed",
        }
    }

    /// Batch the event belongs to, if any
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            Self::BatchStarted { batch_id, .. }
            | Self::BatchAborted { batch_id, .. }
            | Self::BatchCancelled { batch_id }
            | Self::BatchFinished { batch_id, .. }
            | Self::VariantStateChanged { batch_id, .. }
            | Self::VariantAttemptFailed { batch_id, .. } => Some(batch_id),
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
        }
    }

    /// Work item the event concerns, if any
    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::BatchAborted { external_id, .. }
            | Self::VariantStateChanged { external_id, .. }
            | Self::VariantAttemptFailed { external_id, .. } => Some(external_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub batch_id: Option<String>,
    pub external_id: Option<String>,
    pub data: AuditEvent,
}
