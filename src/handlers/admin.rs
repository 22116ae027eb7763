// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{engine::StatsEngine, error::AppError};

#[derive(Debug, Deserialize)]
pub struct RebuildParams {
    /// Restrict the rebuild to one user; omitted means everyone.
    pub user_id: Option<i64>,
}

/// Re-derives aggregates from the attempt log (full replay).
/// Recovery tool for detected drift; safe while ingestion continues.
pub async fn rebuild_aggregates(
    State(engine): State<Arc<StatsEngine>>,
    Query(params): Query<RebuildParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(user_id) = params.user_id {
        if user_id < 1 {
            return Err(AppError::BadRequest("user_id must be positive".to_string()));
        }
    }
    let report = engine.rebuild(params.user_id).await?;
    Ok(Json(report))
}

/// Runs the reconciliation sweep on demand (it also runs periodically in
/// the background).
pub async fn run_reconciliation(
    State(engine): State<Arc<StatsEngine>>,
) -> Result<impl IntoResponse, AppError> {
    let report = engine.reconcile().await?;
    Ok(Json(report))
}
