//! Batch API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use nexus_core::{
    store::{BatchFilter, BatchRecord, BatchState},
    BatchStatus, OrchestratorError, RunSummary, StartBatchRequest,
};

use crate::state::AppState;

/// Maximum allowed limit for batch listings
const MAX_LIMIT: i64 = 1000;

/// Default limit for batch listings
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    /// Filter by state ("running", "finished", "aborted", "cancelled")
    pub state: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListBatchesResponse {
    pub batches: Vec<BatchRecord>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct NextBatchIdResponse {
    pub batch_id: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BatchErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<BatchErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(BatchErrorResponse {
            error: error.into(),
        }),
    )
}

fn map_error(e: OrchestratorError) -> ApiError {
    let status = match &e {
        OrchestratorError::BatchNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::BatchRunning(_) | OrchestratorError::BatchNotRunning(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Manifest(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Store(_) => {
            warn!("Status store error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a new batch from manifest rows and directives
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartBatchRequest>,
) -> Result<(StatusCode, Json<BatchRecord>), ApiError> {
    let record = state.batches().start_batch(body).await.map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List batches, newest first
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListBatchesParams>,
) -> Result<Json<ListBatchesResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = BatchFilter::new().with_limit(limit).with_offset(offset);
    if let Some(ref raw) = params.state {
        let batch_state = BatchState::parse(raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("Unknown batch state: {}", raw))
        })?;
        filter = filter.with_state(batch_state);
    }

    let batches = state.batches().list_batches(&filter).map_err(map_error)?;
    Ok(Json(ListBatchesResponse {
        batches,
        limit,
        offset,
    }))
}

/// Preview the id the next batch will receive
pub async fn next_batch_id(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NextBatchIdResponse>, ApiError> {
    let batch_id = state.batches().next_batch_id().map_err(map_error)?;
    Ok(Json(NextBatchIdResponse { batch_id }))
}

/// Per-item and per-variant status of a batch
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchStatus>, ApiError> {
    let status = state.batches().batch_status(&id).await.map_err(map_error)?;
    Ok(Json(status))
}

/// Final run summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunSummary>, ApiError> {
    match state.batches().summary(&id).map_err(map_error)? {
        Some(summary) => Ok(Json(summary)),
        None => Err(api_error(
            StatusCode::CONFLICT,
            format!("batch has not finished: {}", id),
        )),
    }
}

/// Cancel a running batch
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    state.batches().cancel(&id).await.map_err(map_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: format!("Cancellation requested for {}", id),
        }),
    ))
}

/// Re-run the unfinished tasks of a batch
pub async fn resume_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<BatchRecord>), ApiError> {
    let record = state.batches().resume_batch(&id).await.map_err(map_error)?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}
