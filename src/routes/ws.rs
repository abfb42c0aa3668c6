use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;

/// Create the WebSocket router. The `/ws/agent` endpoint is the whole
/// voice-call surface: one connection, one session, no auth (the service
/// sits behind the app's own proxy).
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/agent", get(ws::ws_agent_handler))
        .layer(TraceLayer::new_for_http())
}
