// src/routes.rs

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, attempts, stats},
    state::AppState,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (attempts, stats, leaderboard, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (the aggregation engine).
///
/// Authentication and role gating live in an upstream gateway; these
/// routes assume the caller is already authorized.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let attempt_routes = Router::new().route("/", post(attempts::submit_attempt));

    let stats_routes = Router::new()
        .route("/{user_id}", get(stats::get_user_stats))
        .route("/{user_id}/modules", get(stats::get_module_progress))
        .route("/{user_id}/activity", get(stats::get_weekly_activity));

    let admin_routes = Router::new()
        .route("/rebuild", post(admin::rebuild_aggregates))
        .route("/reconcile", post(admin::run_reconciliation));

    Router::new()
        .nest("/api/attempts", attempt_routes)
        .nest("/api/stats", stats_routes)
        .route("/api/leaderboard", get(stats::get_leaderboard))
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
