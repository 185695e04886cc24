use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

/// Page size when none is requested.
pub const DEFAULT_AUDIT_PAGE: i64 = 100;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Selects audit records. Results come back newest first.
///
/// `limit` and `offset` only apply to [`AuditStore::query`]; counts ignore them.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub batch_id: Option<String>,
    pub external_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            batch_id: None,
            external_id: None,
            event_type: None,
            from: None,
            to: None,
            limit: DEFAULT_AUDIT_PAGE,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Inclusive bounds; either side may be open.
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Persistent audit trail.
pub trait AuditStore: Send + Sync {
    /// Insert one record, returning its id.
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Insert a burst of records. Stores that can should make this atomic.
    fn insert_many(&self, records: &[AuditRecord]) -> Result<usize, AuditError> {
        for record in records {
            self.insert(record)?;
        }
        Ok(records.len())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
