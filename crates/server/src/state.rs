use std::sync::Arc;
use nexus_core::{AuditStore, BatchManager, Config, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    audit_store: Arc<dyn AuditStore>,
    batches: BatchManager,
}

impl AppState {
    pub fn new(
        config: Config,
        audit_store: Arc<dyn AuditStore>,
        batches: BatchManager,
    ) -> Self {
        Self {
            config,
            audit_store,
            batches,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn batches(&self) -> &BatchManager {
        &self.batches
    }
}
