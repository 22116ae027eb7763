// src/engine/query.rs
//
// Read-only composition over the aggregates. Nothing here mutates; every
// method is safe to cancel at any point.

use serde::Serialize;

use crate::{
    engine::{StatsEngine, activity},
    error::AppError,
    models::{
        leaderboard::{LeaderboardEntry, LeaderboardPeriod, LeaderboardQuery, LeaderboardScope},
        stats::{ActivityPoint, ModuleProgressRow, UserStats, UserStatsResponse},
    },
};

/// One page of a leaderboard, tagged with the snapshot epoch it was drawn
/// from so clients can detect when two pages span a recompute.
#[derive(Debug, Serialize)]
pub struct LeaderboardPage {
    pub epoch: u64,
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
    pub total: usize,
    pub entries: Vec<LeaderboardEntry>,
}

impl StatsEngine {
    /// Dashboard stats for one user. Unknown users get a zeroed record
    /// (dashboards render an empty state) and no rank.
    pub async fn user_stats(&self, user_id: i64) -> Result<UserStatsResponse, AppError> {
        let stats = self
            .store
            .user_stats(user_id)
            .await?
            .unwrap_or_else(|| UserStats::new(user_id));

        let rank = if stats.total_exams_completed > 0 {
            self.snapshot(LeaderboardScope::Global, LeaderboardPeriod::AllTime)
                .await?
                .rank_of(user_id)
        } else {
            None
        };

        Ok(UserStatsResponse {
            total_exams_completed: stats.total_exams_completed,
            total_questions_attempted: stats.total_questions_attempted,
            total_correct_answers: stats.total_correct_answers,
            total_incorrect_answers: stats.total_incorrect_answers,
            average_score: stats.average_score,
            study_hours: (stats.total_time_spent_seconds as f64 / 3600.0 * 10.0).round() / 10.0,
            rank,
        })
    }

    /// Per-module breakdown, ordered by module id. Feeds the
    /// "what should I study next" view.
    pub async fn module_breakdown(&self, user_id: i64) -> Result<Vec<ModuleProgressRow>, AppError> {
        self.store.module_progress(user_id).await
    }

    /// Gapless daily series for the trailing `days` days (today inclusive),
    /// ascending, zero-filled.
    pub async fn weekly_activity(
        &self,
        user_id: i64,
        days: i64,
    ) -> Result<Vec<ActivityPoint>, AppError> {
        if days < 1 || days > self.config.activity_retention_days {
            return Err(AppError::BadRequest(format!(
                "days must be between 1 and {}",
                self.config.activity_retention_days
            )));
        }
        let (from, to) = activity::trailing_window(self.today(), days);
        let buckets = self.store.activity_between(user_id, from, to).await?;
        Ok(activity::zero_filled(from, to, &buckets))
    }

    /// One page of a leaderboard, served from a consistent snapshot epoch.
    /// An empty board is an empty page, not an error.
    pub async fn leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage, AppError> {
        let snapshot = self.snapshot(query.scope, query.period).await?;
        Ok(LeaderboardPage {
            epoch: snapshot.epoch,
            page: query.page,
            page_size: query.page_size,
            total: snapshot.entries.len(),
            entries: snapshot.page(query.page, query.page_size).to_vec(),
        })
    }
}
