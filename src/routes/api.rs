use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

/// REST router: health check plus the post-call feedback endpoint. The
/// browser UI is served from another origin, so CORS stays permissive.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::api::health_check))
        .route("/api/feedback", post(handlers::api::feedback))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
