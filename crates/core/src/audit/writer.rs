use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditHandle, AuditStore, StampedEvent};

/// Most events written in one transaction.
const WRITE_BURST: usize = 64;

/// Drains the audit channel into an [`AuditStore`].
///
/// Events queued together are written in one `insert_many` call. Runs until
/// every [`AuditHandle`] is dropped and the channel is empty.
pub struct AuditWriter {
    rx: mpsc::Receiver<StampedEvent>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<StampedEvent>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        let mut burst = Vec::with_capacity(WRITE_BURST);
        loop {
            if self.rx.recv_many(&mut burst, WRITE_BURST).await == 0 {
                break;
            }
            let records: Vec<_> = burst.drain(..).map(StampedEvent::into_record).collect();
            if let Err(e) = self.store.insert_many(&records) {
                tracing::error!(dropped = records.len(), "Failed to write audit events: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create the handle/writer pair.
///
/// Spawn the writer with `tokio::spawn(writer.run())`; `buffer_size` bounds the
/// channel, and `emit` waits when it is full.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}
