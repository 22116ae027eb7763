// src/store/mod.rs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    error::AppError,
    models::{
        attempt::ExamAttempt,
        leaderboard::LeaderboardScope,
        stats::{ActivityBucket, ModuleProgressRow, UserStats},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of admitting one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this attempt id was seen; all aggregates were updated.
    Accepted,
    /// Already processed; nothing was changed.
    Duplicate,
}

/// One candidate row for ranking, read from the aggregates at a snapshot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RankingRow {
    pub user_id: i64,
    pub score: i64,
    /// When the user reached their current score; earlier wins ties.
    pub achieved_at: Option<DateTime<Utc>>,
}

/// A full set of aggregates recomputed from the attempt log; what the
/// replay fold produces and `rebuild_from_log` swaps in.
#[derive(Debug, Default)]
pub struct RebuiltAggregates {
    pub stats: Vec<UserStats>,
    pub modules: Vec<crate::models::stats::ModuleProgress>,
    pub buckets: Vec<(i64, ActivityBucket)>,
}

/// What a replay processed.
#[derive(Debug, Clone, Copy)]
pub struct ReplaySummary {
    pub attempts_replayed: usize,
    pub users_rebuilt: usize,
}

/// Persistence seam of the aggregation engine.
///
/// Every implementation must make `ingest_attempt` atomic: the dedup marker
/// and all three aggregate updates land together or not at all, and a
/// replayed attempt id is a side-effect-free `Duplicate`. Versioned writes
/// that lose an optimistic-concurrency race return `AppError::Conflict`;
/// the engine owns the retry policy.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Admits one attempt and fans it out to the per-user aggregates.
    /// `bucket_day` is the calendar day the attempt falls into under the
    /// configured bucketing timezone.
    async fn ingest_attempt(
        &self,
        attempt: &ExamAttempt,
        bucket_day: NaiveDate,
    ) -> Result<Admission, AppError>;

    async fn user_stats(&self, user_id: i64) -> Result<Option<UserStats>, AppError>;

    async fn user_ids(&self) -> Result<Vec<i64>, AppError>;

    /// Per-module breakdown for one user, joined with module display names,
    /// ordered by module id.
    async fn module_progress(&self, user_id: i64) -> Result<Vec<ModuleProgressRow>, AppError>;

    /// Day buckets for one user within [from, to], ascending. Days without
    /// activity are absent; the engine zero-fills.
    async fn activity_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ActivityBucket>, AppError>;

    /// Ranking candidates for a scope. `since` restricts the score to
    /// activity on or after that day (weekly windows); `None` means
    /// all-time.
    async fn ranking_rows(
        &self,
        scope: LeaderboardScope,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RankingRow>, AppError>;

    /// The attempt log, oldest first, optionally restricted to one user.
    /// Source of truth for replay.
    async fn attempts_ordered(&self, user_id: Option<i64>)
    -> Result<Vec<ExamAttempt>, AppError>;

    /// Re-derives the aggregates for the given user (or for everyone when
    /// `user_id` is None) from the attempt log and swaps them in.
    ///
    /// Reading the log and installing the recomputed rows must be one
    /// atomic unit with respect to `ingest_attempt`: an attempt committed
    /// concurrently is either part of the fold or applied on top of the
    /// swapped rows afterwards, never erased. That is what makes the
    /// replay safe to run while ingestion continues.
    async fn rebuild_from_log(
        &self,
        user_id: Option<i64>,
        utc_offset_minutes: i32,
    ) -> Result<ReplaySummary, AppError>;

    /// Drops activity buckets older than `cutoff`. Returns how many rows
    /// were removed.
    async fn prune_activity_before(&self, cutoff: NaiveDate) -> Result<u64, AppError>;
}
