// src/engine/mod.rs

pub mod activity;
pub mod query;
pub mod ranker;
pub mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::{
        attempt::SubmitAttemptRequest,
        leaderboard::{LeaderboardPeriod, LeaderboardScope},
    },
    store::{Admission, AggregateStore},
};

use ranker::{Snapshot, SnapshotCache};

/// Ack returned to the exam-taking collaborator. A replayed attempt id is
/// still `accepted` (idempotent success), with `duplicate` flagged so the
/// caller can tell a no-op from a first admission.
#[derive(Debug, Serialize)]
pub struct IngestReceipt {
    pub accepted: bool,
    pub duplicate: bool,
}

/// Aggregation engine: admits attempt events, maintains the per-user
/// aggregates through the store, and serves ranked/windowed reads.
pub struct StatsEngine {
    store: Arc<dyn AggregateStore>,
    config: Config,
    snapshots: SnapshotCache,
}

impl StatsEngine {
    pub fn new(store: Arc<dyn AggregateStore>, config: Config) -> Self {
        let snapshots = SnapshotCache::new(Duration::from_secs(config.leaderboard_ttl_secs));
        Self {
            store,
            config,
            snapshots,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates and ingests one attempt. Optimistic-concurrency conflicts
    /// are retried with linear backoff up to the configured bound, then
    /// surfaced as `Unavailable`. Once admission starts it runs to
    /// completion; there is no partially applied state to cancel into.
    pub async fn submit_attempt(
        &self,
        request: SubmitAttemptRequest,
    ) -> Result<IngestReceipt, AppError> {
        request.validate()?;
        let attempt = request.into_attempt();
        let day = activity::bucket_day(attempt.submitted_at, self.config.bucket_utc_offset_minutes);

        let mut tries = 0u32;
        loop {
            match self.store.ingest_attempt(&attempt, day).await {
                Ok(Admission::Accepted) => {
                    tracing::debug!(
                        attempt_id = %attempt.attempt_id,
                        user_id = attempt.user_id,
                        "attempt ingested"
                    );
                    return Ok(IngestReceipt {
                        accepted: true,
                        duplicate: false,
                    });
                }
                Ok(Admission::Duplicate) => {
                    tracing::debug!(attempt_id = %attempt.attempt_id, "duplicate attempt ignored");
                    return Ok(IngestReceipt {
                        accepted: true,
                        duplicate: true,
                    });
                }
                Err(AppError::Conflict(msg)) => {
                    if tries >= self.config.max_ingest_retries {
                        return Err(AppError::Unavailable(format!(
                            "attempt {} not admitted after {} retries: {}",
                            attempt.attempt_id, tries, msg
                        )));
                    }
                    tries += 1;
                    tracing::debug!(
                        attempt_id = %attempt.attempt_id,
                        retry = tries,
                        "version conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.ingest_backoff_ms * tries as u64,
                    ))
                    .await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Current calendar day under the bucketing offset.
    pub(crate) fn today(&self) -> NaiveDate {
        activity::bucket_day(Utc::now(), self.config.bucket_utc_offset_minutes)
    }

    /// Returns a fresh-enough snapshot for the requested board, recomputing
    /// it from the aggregates when the cached one has aged out. Pages drawn
    /// from one snapshot epoch are mutually consistent.
    pub(crate) async fn snapshot(
        &self,
        scope: LeaderboardScope,
        period: LeaderboardPeriod,
    ) -> Result<Arc<Snapshot>, AppError> {
        if let Some(snapshot) = self.snapshots.fresh(scope, period) {
            return Ok(snapshot);
        }
        let since = match period {
            LeaderboardPeriod::AllTime => None,
            LeaderboardPeriod::Weekly => Some(activity::trailing_window(self.today(), 7).0),
        };
        let rows = self.store.ranking_rows(scope, since).await?;
        Ok(self.snapshots.install(scope, period, rows))
    }

    pub(crate) fn invalidate_snapshots(&self) {
        self.snapshots.invalidate();
    }
}
