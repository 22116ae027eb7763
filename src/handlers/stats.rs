// src/handlers/stats.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{
    engine::StatsEngine,
    error::AppError,
    models::leaderboard::LeaderboardParams,
};

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    pub days: Option<i64>,
}

/// Dashboard totals, derived average and current global rank for one user.
pub async fn get_user_stats(
    State(engine): State<Arc<StatsEngine>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let stats = engine.user_stats(user_id).await?;
    Ok(Json(stats))
}

/// Per-module breakdown for one user, ordered by module id.
pub async fn get_module_progress(
    State(engine): State<Arc<StatsEngine>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let rows = engine.module_breakdown(user_id).await?;
    Ok(Json(rows))
}

/// Zero-filled daily activity series, ascending. Defaults to 7 days.
pub async fn get_weekly_activity(
    State(engine): State<Arc<StatsEngine>>,
    Path(user_id): Path<i64>,
    Query(params): Query<ActivityParams>,
) -> Result<impl IntoResponse, AppError> {
    let series = engine
        .weekly_activity(user_id, params.days.unwrap_or(7))
        .await?;
    Ok(Json(series))
}

/// One leaderboard page drawn from a consistent snapshot epoch.
pub async fn get_leaderboard(
    State(engine): State<Arc<StatsEngine>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.into_query(engine.config().leaderboard_max_page_size)?;
    let page = engine.leaderboard(query).await?;
    Ok(Json(page))
}
