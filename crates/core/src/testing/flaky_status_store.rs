//! Status store wrapper that injects write failures.

use std::sync::{Arc, Mutex};

use crate::batch::{VariantStatus, WorkItem};
use crate::orchestrator::RunSummary;
use crate::store::{
    BatchFilter, BatchRecord, BatchState, ItemRecord, NewBatch, RowHandle, StatusStore,
    StatusUpdate, StoreError, VariantRecord,
};

#[derive(Debug, Default)]
struct Faults {
    /// Fail this many upcoming `update_status` calls, whatever the status.
    next_writes: usize,
    /// Fail this many upcoming writes of one particular status.
    by_status: Option<(VariantStatus, usize)>,
    injected: usize,
}

/// Wraps a real store and makes selected `update_status` calls fail with a
/// transient database error. Reads always pass through.
pub struct FlakyStatusStore {
    inner: Arc<dyn StatusStore>,
    faults: Mutex<Faults>,
}

impl FlakyStatusStore {
    pub fn new(inner: Arc<dyn StatusStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Fail the next `n` status writes.
    pub fn fail_next_writes(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.next_writes = n;
        }
    }

    /// Fail the next `n` writes that set `status`.
    pub fn fail_writes_with_status(&self, status: VariantStatus, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.by_status = Some((status, n));
        }
    }

    /// Number of writes failed so far.
    pub fn injected_failures(&self) -> usize {
        self.faults.lock().map(|f| f.injected).unwrap_or(0)
    }

    fn should_fail(&self, status: VariantStatus) -> bool {
        let Ok(mut faults) = self.faults.lock() else {
            return false;
        };
        let fail = if faults.next_writes > 0 {
            faults.next_writes -= 1;
            true
        } else if let Some((target, remaining)) = faults.by_status.as_mut() {
            if *target == status && *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        } else {
            false
        };
        if fail {
            faults.injected += 1;
        }
        fail
    }
}

impl StatusStore for FlakyStatusStore {
    fn allocate_batch(&self, request: &NewBatch) -> Result<BatchRecord, StoreError> {
        self.inner.allocate_batch(request)
    }

    fn latest_batch_id(&self) -> Result<Option<String>, StoreError> {
        self.inner.latest_batch_id()
    }

    fn peek_batch_id(&self) -> Result<String, StoreError> {
        self.inner.peek_batch_id()
    }

    fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StoreError> {
        self.inner.get_batch(batch_id)
    }

    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<BatchRecord>, StoreError> {
        self.inner.list_batches(filter)
    }

    fn set_batch_state(
        &self,
        batch_id: &str,
        state: BatchState,
        summary: Option<&RunSummary>,
    ) -> Result<(), StoreError> {
        self.inner.set_batch_state(batch_id, state, summary)
    }

    fn ensure_row(&self, batch_id: &str, item: &WorkItem) -> Result<RowHandle, StoreError> {
        self.inner.ensure_row(batch_id, item)
    }

    fn update_status(
        &self,
        row: RowHandle,
        variant_number: u8,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        if self.should_fail(update.status) {
            return Err(StoreError::Database("injected write failure".to_string()));
        }
        self.inner.update_status(row, variant_number, update)
    }

    fn get_variant(
        &self,
        row: RowHandle,
        variant_number: u8,
    ) -> Result<Option<VariantRecord>, StoreError> {
        self.inner.get_variant(row, variant_number)
    }

    fn list_items(&self, batch_id: &str) -> Result<Vec<ItemRecord>, StoreError> {
        self.inner.list_items(batch_id)
    }
}
