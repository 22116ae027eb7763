// src/store/memory.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    engine::reconcile::fold_attempts,
    error::AppError,
    models::{
        attempt::ExamAttempt,
        leaderboard::LeaderboardScope,
        stats::{ActivityBucket, ModuleProgress, ModuleProgressRow, UserStats},
    },
    store::{Admission, AggregateStore, RankingRow, ReplaySummary},
};

#[derive(Default)]
struct Inner {
    seen: HashSet<String>,
    attempts: Vec<ExamAttempt>,
    stats: HashMap<i64, UserStats>,
    modules: HashMap<(i64, i64), ModuleProgress>,
    buckets: HashMap<(i64, NaiveDate), ActivityBucket>,
    module_names: HashMap<i64, String>,
}

/// In-memory store for tests and database-free local runs.
///
/// One mutex guards the whole state, so every ingest is trivially atomic
/// and per-key updates are linearized. Shares the model `apply` folds with
/// `PgStore`, so both backends compute identical aggregates.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_module_name(&self, module_id: i64, name: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.module_names.insert(module_id, name.to_string());
        }
    }

    /// Test hook: drops one module row so the aggregates no longer match
    /// the attempt log, the way a lost partial write would leave them.
    pub fn remove_module_progress(&self, user_id: i64, module_id: i64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.modules.remove(&(user_id, module_id));
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::InternalServerError("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn ingest_attempt(
        &self,
        attempt: &ExamAttempt,
        bucket_day: NaiveDate,
    ) -> Result<Admission, AppError> {
        let mut inner = self.lock()?;

        if !inner.seen.insert(attempt.attempt_id.clone()) {
            return Ok(Admission::Duplicate);
        }
        inner.attempts.push(attempt.clone());

        inner
            .stats
            .entry(attempt.user_id)
            .or_insert_with(|| UserStats::new(attempt.user_id))
            .apply(attempt);

        inner
            .modules
            .entry((attempt.user_id, attempt.module_id))
            .or_insert_with(|| ModuleProgress::new(attempt.user_id, attempt.module_id))
            .apply(attempt);

        inner
            .buckets
            .entry((attempt.user_id, bucket_day))
            .or_insert_with(|| ActivityBucket::new(bucket_day))
            .apply(attempt);

        Ok(Admission::Accepted)
    }

    async fn user_stats(&self, user_id: i64) -> Result<Option<UserStats>, AppError> {
        Ok(self.lock()?.stats.get(&user_id).cloned())
    }

    async fn user_ids(&self) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self.lock()?.stats.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn module_progress(&self, user_id: i64) -> Result<Vec<ModuleProgressRow>, AppError> {
        let inner = self.lock()?;
        let mut rows: Vec<ModuleProgressRow> = inner
            .modules
            .values()
            .filter(|mp| mp.user_id == user_id)
            .map(|mp| ModuleProgressRow {
                module_id: mp.module_id,
                module_name: inner
                    .module_names
                    .get(&mp.module_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Module {}", mp.module_id)),
                questions_attempted: mp.questions_attempted,
                correct_answers: mp.correct_answers,
                incorrect_answers: mp.incorrect_answers,
            })
            .collect();
        rows.sort_by_key(|r| r.module_id);
        Ok(rows)
    }

    async fn activity_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ActivityBucket>, AppError> {
        let inner = self.lock()?;
        let mut buckets: Vec<ActivityBucket> = inner
            .buckets
            .iter()
            .filter(|((uid, day), _)| *uid == user_id && *day >= from && *day <= to)
            .map(|(_, bucket)| bucket.clone())
            .collect();
        buckets.sort_by_key(|b| b.day);
        Ok(buckets)
    }

    async fn ranking_rows(
        &self,
        scope: LeaderboardScope,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RankingRow>, AppError> {
        let inner = self.lock()?;
        let rows = match (scope, since) {
            (LeaderboardScope::Global, None) => inner
                .stats
                .values()
                .map(|s| RankingRow {
                    user_id: s.user_id,
                    score: s.total_correct_answers,
                    achieved_at: s.score_achieved_at,
                })
                .collect(),
            (LeaderboardScope::Global, Some(since)) => {
                let mut per_user: HashMap<i64, (i64, Option<DateTime<Utc>>)> = HashMap::new();
                for ((uid, day), bucket) in &inner.buckets {
                    if *day >= since {
                        let entry = per_user.entry(*uid).or_default();
                        entry.0 += bucket.correct_answers;
                        entry.1 = entry.1.max(bucket.last_improved_at);
                    }
                }
                per_user
                    .into_iter()
                    .map(|(user_id, (score, achieved_at))| RankingRow {
                        user_id,
                        score,
                        achieved_at,
                    })
                    .collect()
            }
            (LeaderboardScope::Module(module_id), _) => inner
                .modules
                .values()
                .filter(|mp| mp.module_id == module_id)
                .map(|mp| RankingRow {
                    user_id: mp.user_id,
                    score: mp.correct_answers,
                    achieved_at: mp.last_improved_at,
                })
                .collect(),
        };
        Ok(rows)
    }

    async fn attempts_ordered(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<ExamAttempt>, AppError> {
        let inner = self.lock()?;
        let mut attempts: Vec<ExamAttempt> = inner
            .attempts
            .iter()
            .filter(|a| user_id.is_none_or(|uid| a.user_id == uid))
            .cloned()
            .collect();
        attempts.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.attempt_id.cmp(&b.attempt_id))
        });
        Ok(attempts)
    }

    async fn rebuild_from_log(
        &self,
        user_id: Option<i64>,
        utc_offset_minutes: i32,
    ) -> Result<ReplaySummary, AppError> {
        // One lock acquisition covers reading the log and swapping in the
        // fold, so an ingest can never land between the two and get erased.
        let mut inner = self.lock()?;

        let mut attempts: Vec<ExamAttempt> = inner
            .attempts
            .iter()
            .filter(|a| user_id.is_none_or(|uid| a.user_id == uid))
            .cloned()
            .collect();
        attempts.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.attempt_id.cmp(&b.attempt_id))
        });

        let rebuilt = fold_attempts(&attempts, utc_offset_minutes);
        let summary = ReplaySummary {
            attempts_replayed: attempts.len(),
            users_rebuilt: rebuilt.stats.len(),
        };

        match user_id {
            Some(uid) => {
                inner.stats.remove(&uid);
                inner.modules.retain(|(owner, _), _| *owner != uid);
                inner.buckets.retain(|(owner, _), _| *owner != uid);
            }
            None => {
                inner.stats.clear();
                inner.modules.clear();
                inner.buckets.clear();
            }
        }

        for stats in rebuilt.stats {
            inner.stats.insert(stats.user_id, stats);
        }
        for module in rebuilt.modules {
            inner
                .modules
                .insert((module.user_id, module.module_id), module);
        }
        for (uid, bucket) in rebuilt.buckets {
            inner.buckets.insert((uid, bucket.day), bucket);
        }
        Ok(summary)
    }

    async fn prune_activity_before(&self, cutoff: NaiveDate) -> Result<u64, AppError> {
        let mut inner = self.lock()?;
        let before = inner.buckets.len();
        inner.buckets.retain(|(_, day), _| *day >= cutoff);
        Ok((before - inner.buckets.len()) as u64)
    }
}
