// src/handlers/attempts.rs

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::{engine::StatsEngine, error::AppError, models::attempt::SubmitAttemptRequest};

/// Ingests one exam attempt.
///
/// * Safe to call repeatedly with the same attempt_id: a replay is an
///   idempotent success with `duplicate: true`.
/// * Malformed counts (correct + incorrect > attempted) are rejected with
///   400, never clamped.
/// * Returns 503 if the per-user aggregate stayed contended past the retry
///   bound; the caller should resubmit.
pub async fn submit_attempt(
    State(engine): State<Arc<StatsEngine>>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = engine.submit_attempt(req).await?;
    Ok(Json(receipt))
}
