//! Batch domain model: work items, variant tasks and batch identifiers.

mod id;
mod manifest;
mod types;

pub use id::{format_batch_id, next_batch_id, parse_batch_number, FIRST_BATCH_ID};
pub use manifest::{build_work_items, Directives, ManifestError, ManifestRow};
pub use types::{
    artifact_key, sanitize_external_id, BatchRun, VariantStatus, VariantTask, WorkItem,
    VARIANT_SLOTS,
};
