use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::{AuditEvent, AuditRecord};

/// An event stamped with the time it was emitted, waiting for the writer.
#[derive(Debug, Clone)]
pub struct StampedEvent {
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
}

impl StampedEvent {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }

    /// Row form with the indexed columns pulled out of the event.
    pub fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp: self.at,
            event_type: self.event.event_type().to_string(),
            batch_id: self.event.batch_id().map(String::from),
            external_id: self.event.external_id().map(String::from),
            data: self.event,
        }
    }
}

/// Sender side of the audit trail.
///
/// Clones share one channel; the writer stops once every clone is dropped.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<StampedEvent>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<StampedEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Waits for buffer space; a closed trail only logs.
    pub async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if self.tx.send(StampedEvent::now(event)).await.is_err() {
            tracing::error!(event_type, "Audit trail closed, event dropped");
        }
    }

    /// True once the writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
