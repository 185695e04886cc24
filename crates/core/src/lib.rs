pub mod audit;
pub mod batch;
pub mod config;
pub mod generation;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, SqliteAuditStore,
};
pub use batch::{
    build_work_items, next_batch_id, BatchRun, Directives, ManifestError, ManifestRow,
    VariantStatus, VariantTask, WorkItem,
};
pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError,
    SanitizedConfig,
};
pub use generation::{GenerationClient, GenerationError, GenerationRequest, WebhookClient};
pub use orchestrator::{
    BatchManager, BatchStatus, OrchestratorConfig, OrchestratorError, RunProfile, RunSummary,
    StartBatchRequest,
};
pub use store::{SqliteStatusStore, StatusStore, StoreError};
