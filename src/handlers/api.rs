//! REST handlers: health check and post-call feedback.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::core::feedback::{FeedbackRequest, Scorecard, evaluate_call};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Evaluate a finished call transcript and return the structured scorecard.
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> AppResult<Json<Scorecard>> {
    let llm = state.llm_client();
    let scorecard = evaluate_call(&llm, &request.transcript, request.persona)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(Json(scorecard))
}
