// tests/engine_tests.rs
//
// Engine-level properties exercised through the public StatsEngine API
// over the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use examtrack::config::Config;
use examtrack::engine::StatsEngine;
use examtrack::error::AppError;
use examtrack::models::attempt::{ExamAttempt, SubmitAttemptRequest};
use examtrack::models::leaderboard::{LeaderboardParams, LeaderboardScope};
use examtrack::models::stats::{ActivityBucket, ModuleProgressRow, UserStats};
use examtrack::store::{
    Admission, AggregateStore, MemoryStore, RankingRow, ReplaySummary,
};

fn engine() -> (Arc<MemoryStore>, Arc<StatsEngine>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(StatsEngine::new(store.clone(), Config::for_tests()));
    (store, engine)
}

fn attempt(
    id: &str,
    user_id: i64,
    module_id: i64,
    timestamp: DateTime<Utc>,
    attempted: i64,
    correct: i64,
) -> SubmitAttemptRequest {
    SubmitAttemptRequest {
        attempt_id: id.to_string(),
        user_id,
        module_id,
        timestamp,
        questions_attempted: attempted,
        correct_answers: correct,
        incorrect_answers: attempted - correct,
        score: if attempted > 0 { correct * 100 / attempted } else { 0 },
        time_spent_seconds: 600,
    }
}

fn leaderboard_params(page: u32, page_size: u32) -> LeaderboardParams {
    LeaderboardParams {
        scope: None,
        module_id: None,
        period: None,
        page: Some(page),
        page_size: Some(page_size),
    }
}

#[tokio::test]
async fn replayed_attempt_changes_nothing() {
    let (_, engine) = engine();
    let ts = Utc::now();

    let first = engine
        .submit_attempt(attempt("a-1", 1, 10, ts, 10, 8))
        .await
        .unwrap();
    assert!(first.accepted);
    assert!(!first.duplicate);

    for _ in 0..3 {
        let replay = engine
            .submit_attempt(attempt("a-1", 1, 10, ts, 10, 8))
            .await
            .unwrap();
        assert!(replay.accepted);
        assert!(replay.duplicate);
    }

    let stats = engine.user_stats(1).await.unwrap();
    assert_eq!(stats.total_exams_completed, 1);
    assert_eq!(stats.total_questions_attempted, 10);
    assert_eq!(stats.total_correct_answers, 8);

    let modules = engine.module_breakdown(1).await.unwrap();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].questions_attempted, 10);
}

#[tokio::test]
async fn average_score_is_weighted_across_exam_sizes() {
    let (_, engine) = engine();
    let ts = Utc::now();

    engine
        .submit_attempt(attempt("a-1", 1, 10, ts, 10, 8))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("a-2", 1, 10, ts, 20, 10))
        .await
        .unwrap();

    let stats = engine.user_stats(1).await.unwrap();
    // 18/30 = 60%, not the arithmetic mean of 80 and 50.
    assert_eq!(stats.average_score, 60.0);
}

#[tokio::test]
async fn concurrent_ingestion_loses_no_updates() {
    let (_, engine) = engine();
    let ts = Utc::now();

    let mut handles = Vec::new();
    for i in 0..100 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit_attempt(attempt(&format!("c-{i}"), 1, 10, ts, 10, 7))
                .await
        }));
    }
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert!(receipt.accepted);
        assert!(!receipt.duplicate);
    }

    let stats = engine.user_stats(1).await.unwrap();
    assert_eq!(stats.total_exams_completed, 100);
    assert_eq!(stats.total_questions_attempted, 1000);
    assert_eq!(stats.total_correct_answers, 700);
    assert_eq!(stats.average_score, 70.0);
}

#[tokio::test]
async fn weekly_activity_is_zero_filled_and_ascending() {
    let (_, engine) = engine();
    let now = Utc::now();

    // Activity today and four days ago only.
    engine
        .submit_attempt(attempt("a-1", 1, 10, now - Duration::days(4), 12, 6))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("a-2", 1, 10, now, 5, 5))
        .await
        .unwrap();

    let series = engine.weekly_activity(1, 7).await.unwrap();
    assert_eq!(series.len(), 7);
    for pair in series.windows(2) {
        assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
    }
    assert_eq!(series[2].questions_attempted, 12);
    assert_eq!(series[6].questions_attempted, 5);
    let quiet_days = series
        .iter()
        .filter(|p| p.questions_attempted == 0)
        .count();
    assert_eq!(quiet_days, 5);
}

#[tokio::test]
async fn leaderboard_breaks_ties_deterministically() {
    let (_, engine) = engine();
    let base = Utc::now() - Duration::hours(6);

    // Users 5 and 2 tie on score; 5 got there first. Users 7 and 3 also
    // tie with identical timestamps; the lower id wins.
    engine
        .submit_attempt(attempt("t-5", 5, 10, base, 20, 15))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("t-2", 2, 10, base + Duration::hours(1), 20, 15))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("t-7", 7, 10, base + Duration::hours(2), 20, 10))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("t-3", 3, 10, base + Duration::hours(2), 20, 10))
        .await
        .unwrap();

    let query = leaderboard_params(1, 10).into_query(100).unwrap();
    let page = engine.leaderboard(query).await.unwrap();

    let order: Vec<(i64, i64)> = page.entries.iter().map(|e| (e.user_id, e.rank)).collect();
    assert_eq!(order, vec![(5, 1), (2, 2), (3, 3), (7, 4)]);

    // Identical data, identical order on every rerun.
    let again = engine.leaderboard(query).await.unwrap();
    assert_eq!(page.entries, again.entries);
}

#[tokio::test]
async fn weekly_leaderboard_scores_recent_activity_only() {
    let (_, engine) = engine();
    let now = Utc::now();

    // User 1 was strong a month ago; user 2 is active this week.
    engine
        .submit_attempt(attempt("w-1", 1, 10, now - Duration::days(30), 20, 20))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("w-2", 2, 10, now - Duration::days(2), 10, 6))
        .await
        .unwrap();

    let mut params = leaderboard_params(1, 10);
    params.period = Some("weekly".to_string());
    let page = engine
        .leaderboard(params.into_query(100).unwrap())
        .await
        .unwrap();

    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].user_id, 2);
    assert_eq!(page.entries[0].score, 6);
}

#[tokio::test]
async fn pagination_is_stable_while_ingestion_continues() {
    let (_, engine) = engine();
    let ts = Utc::now();

    for user in 1..=5 {
        engine
            .submit_attempt(attempt(&format!("p-{user}"), user, 10, ts, 20, 20 - user))
            .await
            .unwrap();
    }

    let page1 = engine
        .leaderboard(leaderboard_params(1, 2).into_query(100).unwrap())
        .await
        .unwrap();

    // A new high scorer lands between the two page fetches.
    engine
        .submit_attempt(attempt("p-new", 99, 10, ts, 20, 20))
        .await
        .unwrap();

    let page2 = engine
        .leaderboard(leaderboard_params(2, 2).into_query(100).unwrap())
        .await
        .unwrap();

    // Both pages come from the same snapshot epoch: no duplicated or
    // missing entries relative to that epoch, and user 99 is not visible
    // until the snapshot rolls over.
    assert_eq!(page1.epoch, page2.epoch);
    let ranks: Vec<i64> = page1
        .entries
        .iter()
        .chain(page2.entries.iter())
        .map(|e| e.rank)
        .collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert!(page1.entries.iter().chain(page2.entries.iter()).all(|e| e.user_id != 99));
}

#[tokio::test]
async fn module_sums_match_user_totals_after_reconcile() {
    let (store, engine) = engine();
    let ts = Utc::now();

    engine
        .submit_attempt(attempt("m-1", 1, 10, ts, 10, 8))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("m-2", 1, 11, ts, 20, 10))
        .await
        .unwrap();

    // Simulate drift: one module row goes missing, as a lost partial
    // write would leave it.
    store.remove_module_progress(1, 11);

    let report = engine.reconcile().await.unwrap();
    assert_eq!(report.drift_repaired, 1);

    let stats = engine.user_stats(1).await.unwrap();
    let module_sum: i64 = engine
        .module_breakdown(1)
        .await
        .unwrap()
        .iter()
        .map(|m| m.questions_attempted)
        .sum();
    assert_eq!(module_sum, stats.total_questions_attempted);
    assert_eq!(module_sum, 30);
}

#[tokio::test]
async fn rebuild_replays_to_identical_aggregates() {
    let (store, engine) = engine();
    let ts = Utc::now();

    engine
        .submit_attempt(attempt("r-1", 1, 10, ts - Duration::hours(2), 10, 8))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("r-2", 1, 11, ts - Duration::hours(1), 20, 10))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("r-3", 2, 10, ts, 5, 5))
        .await
        .unwrap();

    let before_1 = engine.user_stats(1).await.unwrap();
    let before_2 = engine.user_stats(2).await.unwrap();

    let report = engine.rebuild(None).await.unwrap();
    assert_eq!(report.attempts_replayed, 3);
    assert_eq!(report.users_rebuilt, 2);

    let after_1 = engine.user_stats(1).await.unwrap();
    let after_2 = engine.user_stats(2).await.unwrap();
    assert_eq!(before_1.total_questions_attempted, after_1.total_questions_attempted);
    assert_eq!(before_1.average_score, after_1.average_score);
    assert_eq!(before_2.total_correct_answers, after_2.total_correct_answers);

    // Replay preserves the attempt log itself.
    assert_eq!(store.attempts_ordered(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn rebuild_never_erases_concurrent_ingest() {
    let (_, engine) = engine();
    let ts = Utc::now();

    // Full replays run interleaved with a burst of ingests; every admitted
    // attempt must survive into the final aggregates.
    let mut handles = Vec::new();
    for i in 0..50 {
        let ingest_engine = engine.clone();
        handles.push(tokio::spawn(async move {
            ingest_engine
                .submit_attempt(attempt(&format!("x-{i}"), 1, 10, ts, 10, 7))
                .await
                .map(|_| ())
        }));
        if i % 5 == 0 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.rebuild(None).await.map(|_| ())
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = engine.user_stats(1).await.unwrap();
    assert_eq!(stats.total_exams_completed, 50);
    assert_eq!(stats.total_questions_attempted, 500);
    assert_eq!(stats.total_correct_answers, 350);

    // One more full replay lands on the same numbers.
    let report = engine.rebuild(None).await.unwrap();
    assert_eq!(report.attempts_replayed, 50);
    let after = engine.user_stats(1).await.unwrap();
    assert_eq!(after.total_exams_completed, 50);
}

#[tokio::test]
async fn rebuild_preserves_tie_break_key_for_out_of_order_arrivals() {
    let (store, engine) = engine();
    let newer = Utc::now();
    let older = newer - Duration::hours(3);

    // Delivery order inverts submission order (late backfill).
    engine
        .submit_attempt(attempt("o-2", 1, 10, newer, 10, 8))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("o-1", 1, 10, older, 10, 6))
        .await
        .unwrap();

    let live = store.user_stats(1).await.unwrap().unwrap();
    assert_eq!(live.score_achieved_at, Some(newer));

    // A replay of the log must agree with what live ingestion computed.
    engine.rebuild(None).await.unwrap();
    let replayed = store.user_stats(1).await.unwrap().unwrap();
    assert_eq!(replayed.score_achieved_at, live.score_achieved_at);
}

#[tokio::test]
async fn module_leaderboard_breaks_ties_by_earliest_improvement() {
    let (_, engine) = engine();
    let base = Utc::now() - Duration::hours(6);

    // Users 9 and 4 tie on module score; 9 got there first, so the higher
    // id still ranks ahead.
    engine
        .submit_attempt(attempt("mt-9", 9, 10, base, 20, 15))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("mt-4", 4, 10, base + Duration::hours(1), 20, 15))
        .await
        .unwrap();
    // Activity in another module must not move this board's tie-break key.
    engine
        .submit_attempt(attempt("mt-other", 4, 11, base - Duration::hours(1), 20, 20))
        .await
        .unwrap();

    let mut params = leaderboard_params(1, 10);
    params.scope = Some("module".to_string());
    params.module_id = Some(10);
    let page = engine
        .leaderboard(params.into_query(100).unwrap())
        .await
        .unwrap();

    let order: Vec<(i64, i64)> = page.entries.iter().map(|e| (e.user_id, e.rank)).collect();
    assert_eq!(order, vec![(9, 1), (4, 2)]);
}

#[tokio::test]
async fn weekly_leaderboard_breaks_ties_by_earliest_improvement() {
    let (_, engine) = engine();
    let now = Utc::now();

    // Users 8 and 3 tie on this week's correct answers; 8 improved earlier.
    engine
        .submit_attempt(attempt("wt-8", 8, 10, now - Duration::days(3), 10, 10))
        .await
        .unwrap();
    engine
        .submit_attempt(attempt("wt-3", 3, 10, now - Duration::days(1), 10, 10))
        .await
        .unwrap();

    let mut params = leaderboard_params(1, 10);
    params.period = Some("weekly".to_string());
    let page = engine
        .leaderboard(params.into_query(100).unwrap())
        .await
        .unwrap();

    let order: Vec<(i64, i64)> = page.entries.iter().map(|e| (e.user_id, e.rank)).collect();
    assert_eq!(order, vec![(8, 1), (3, 2)]);
}

/// Store wrapper that loses the version race a set number of times before
/// delegating, so the retry policy can be exercised deterministically.
struct ContentiousStore {
    inner: MemoryStore,
    conflicts_left: AtomicU32,
}

impl ContentiousStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl AggregateStore for ContentiousStore {
    async fn ingest_attempt(
        &self,
        attempt: &ExamAttempt,
        bucket_day: NaiveDate,
    ) -> Result<Admission, AppError> {
        let contested = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contested {
            return Err(AppError::Conflict(format!(
                "user_stats version moved for user {}",
                attempt.user_id
            )));
        }
        self.inner.ingest_attempt(attempt, bucket_day).await
    }

    async fn user_stats(&self, user_id: i64) -> Result<Option<UserStats>, AppError> {
        self.inner.user_stats(user_id).await
    }

    async fn user_ids(&self) -> Result<Vec<i64>, AppError> {
        self.inner.user_ids().await
    }

    async fn module_progress(&self, user_id: i64) -> Result<Vec<ModuleProgressRow>, AppError> {
        self.inner.module_progress(user_id).await
    }

    async fn activity_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ActivityBucket>, AppError> {
        self.inner.activity_between(user_id, from, to).await
    }

    async fn ranking_rows(
        &self,
        scope: LeaderboardScope,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RankingRow>, AppError> {
        self.inner.ranking_rows(scope, since).await
    }

    async fn attempts_ordered(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<ExamAttempt>, AppError> {
        self.inner.attempts_ordered(user_id).await
    }

    async fn rebuild_from_log(
        &self,
        user_id: Option<i64>,
        utc_offset_minutes: i32,
    ) -> Result<ReplaySummary, AppError> {
        self.inner.rebuild_from_log(user_id, utc_offset_minutes).await
    }

    async fn prune_activity_before(&self, cutoff: NaiveDate) -> Result<u64, AppError> {
        self.inner.prune_activity_before(cutoff).await
    }
}

#[tokio::test]
async fn ingest_retries_version_conflicts_until_admitted() {
    let store = Arc::new(ContentiousStore::new(2));
    let engine = StatsEngine::new(store, Config::for_tests());

    let receipt = engine
        .submit_attempt(attempt("vc-1", 1, 10, Utc::now(), 10, 8))
        .await
        .unwrap();
    assert!(receipt.accepted);
    assert!(!receipt.duplicate);

    let stats = engine.user_stats(1).await.unwrap();
    assert_eq!(stats.total_exams_completed, 1);
    assert_eq!(stats.total_correct_answers, 8);
}

#[tokio::test]
async fn ingest_surfaces_unavailable_after_retry_exhaustion() {
    let store = Arc::new(ContentiousStore::new(u32::MAX));
    let engine = StatsEngine::new(store.clone(), Config::for_tests());

    let err = engine
        .submit_attempt(attempt("vc-2", 1, 10, Utc::now(), 10, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)));

    // Nothing was admitted.
    assert!(store.user_stats(1).await.unwrap().is_none());
}

#[tokio::test]
async fn rejects_malformed_attempts_without_clamping() {
    let (_, engine) = engine();
    let ts = Utc::now();

    // correct + incorrect exceeds attempted.
    let mut bad = attempt("bad-1", 1, 10, ts, 10, 8);
    bad.incorrect_answers = 5;
    assert!(engine.submit_attempt(bad).await.is_err());

    // Nothing was recorded.
    let stats = engine.user_stats(1).await.unwrap();
    assert_eq!(stats.total_exams_completed, 0);
}
