//! Audit trail query endpoint.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use nexus_core::{AuditError, AuditFilter, AuditRecord};

use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;

/// `GET /audit` query string. Every field is optional.
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub batch_id: Option<String>,
    pub external_id: Option<String>,
    pub event_type: Option<String>,
    /// RFC 3339, inclusive
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339, inclusive
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn to_filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new().between(self.from, self.to);
        if let Some(ref batch_id) = self.batch_id {
            filter = filter.with_batch_id(batch_id);
        }
        if let Some(ref external_id) = self.external_id {
            filter = filter.with_external_id(external_id);
        }
        if let Some(ref event_type) = self.event_type {
            filter = filter.with_event_type(event_type);
        }
        let limit = self.limit.unwrap_or(filter.limit).clamp(1, MAX_LIMIT);
        filter.page(limit, self.offset.unwrap_or(0).max(0))
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events across all pages
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditErrorResponse {
    pub error: String,
}

fn store_failure(e: AuditError) -> (StatusCode, Json<AuditErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AuditErrorResponse {
            error: format!("Failed to read audit trail: {}", e),
        }),
    )
}

pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, (StatusCode, Json<AuditErrorResponse>)> {
    let filter = params.to_filter();
    let store = state.audit_store();

    let events = store.query(&filter).map_err(store_failure)?;
    let total = store.count(&filter).map_err(store_failure)?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}
