//! Durable status recording for batches, work items and variants.

mod sqlite;
mod types;

pub use sqlite::SqliteStatusStore;
pub use types::*;

use crate::batch::WorkItem;
use crate::orchestrator::RunSummary;

/// Trait for status storage backends.
///
/// Updates are keyed per `(row, variant_number)`; no operation spans rows.
pub trait StatusStore: Send + Sync {
    /// Allocate the next batch id and record the batch as running.
    fn allocate_batch(&self, request: &NewBatch) -> Result<BatchRecord, StoreError>;

    /// Id of the most recently created batch.
    fn latest_batch_id(&self) -> Result<Option<String>, StoreError>;

    /// The id `allocate_batch` would assign next, without reserving it.
    fn peek_batch_id(&self) -> Result<String, StoreError>;

    fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StoreError>;

    /// Batches matching the filter, newest first.
    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<BatchRecord>, StoreError>;

    /// Update the batch lifecycle state, optionally storing the final summary.
    fn set_batch_state(
        &self,
        batch_id: &str,
        state: BatchState,
        summary: Option<&RunSummary>,
    ) -> Result<(), StoreError>;

    /// Create the row for `item` in `batch_id` if missing and return its handle.
    ///
    /// Calling this again for the same item returns the existing handle and
    /// leaves the recorded statuses untouched.
    fn ensure_row(&self, batch_id: &str, item: &WorkItem) -> Result<RowHandle, StoreError>;

    /// Apply a status update to one variant of one row.
    fn update_status(
        &self,
        row: RowHandle,
        variant_number: u8,
        update: &StatusUpdate,
    ) -> Result<(), StoreError>;

    fn get_variant(
        &self,
        row: RowHandle,
        variant_number: u8,
    ) -> Result<Option<VariantRecord>, StoreError>;

    /// All items of a batch in manifest order.
    fn list_items(&self, batch_id: &str) -> Result<Vec<ItemRecord>, StoreError>;
}
