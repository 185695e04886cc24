use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{audit, batches, handlers, middleware::metrics_middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Batches
        .route("/batches", post(batches::create_batch))
        .route("/batches", get(batches::list_batches))
        .route("/batches/next-id", get(batches::next_batch_id))
        .route("/batches/{id}", get(batches::get_batch))
        .route("/batches/{id}/summary", get(batches::get_summary))
        .route("/batches/{id}/cancel", post(batches::cancel_batch))
        .route("/batches/{id}/resume", post(batches::resume_batch))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
