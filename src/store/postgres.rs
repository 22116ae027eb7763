// src/store/postgres.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::{
    engine::reconcile::fold_attempts,
    error::AppError,
    models::{
        attempt::ExamAttempt,
        leaderboard::LeaderboardScope,
        stats::{ActivityBucket, ModuleProgressRow, UserStats},
    },
    store::{Admission, AggregateStore, RankingRow, ReplaySummary},
};

const USER_STATS_COLUMNS: &str = "user_id, total_exams_completed, total_questions_attempted, \
     total_correct_answers, total_incorrect_answers, average_score, \
     total_time_spent_seconds, score_achieved_at, version";

/// PostgreSQL-backed store.
///
/// Idempotency and atomicity come from a single transaction per ingest:
/// the attempt row (whose primary key is the dedup marker) commits together
/// with the aggregate updates, so a crash-and-retry can never double-count.
/// The `user_stats` write is guarded by the row's `version`; losing that
/// race surfaces as `AppError::Conflict` and the engine retries.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateStore for PgStore {
    async fn ingest_attempt(
        &self,
        attempt: &ExamAttempt,
        bucket_day: NaiveDate,
    ) -> Result<Admission, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO exam_attempts
                (attempt_id, user_id, module_id, submitted_at, questions_attempted,
                 correct_answers, incorrect_answers, score, time_spent_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (attempt_id) DO NOTHING
            "#,
        )
        .bind(&attempt.attempt_id)
        .bind(attempt.user_id)
        .bind(attempt.module_id)
        .bind(attempt.submitted_at)
        .bind(attempt.questions_attempted)
        .bind(attempt.correct_answers)
        .bind(attempt.incorrect_answers)
        .bind(attempt.score)
        .bind(attempt.time_spent_seconds)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Already processed; leave every aggregate untouched.
            tx.rollback().await?;
            return Ok(Admission::Duplicate);
        }

        let current = sqlx::query_as::<_, UserStats>(&format!(
            "SELECT {USER_STATS_COLUMNS} FROM user_stats WHERE user_id = $1"
        ))
        .bind(attempt.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        match current {
            Some(mut stats) => {
                let read_version = stats.version;
                stats.apply(attempt);
                let updated = sqlx::query(
                    r#"
                    UPDATE user_stats SET
                        total_exams_completed = $1,
                        total_questions_attempted = $2,
                        total_correct_answers = $3,
                        total_incorrect_answers = $4,
                        average_score = $5,
                        total_time_spent_seconds = $6,
                        score_achieved_at = $7,
                        version = $8
                    WHERE user_id = $9 AND version = $10
                    "#,
                )
                .bind(stats.total_exams_completed)
                .bind(stats.total_questions_attempted)
                .bind(stats.total_correct_answers)
                .bind(stats.total_incorrect_answers)
                .bind(stats.average_score)
                .bind(stats.total_time_spent_seconds)
                .bind(stats.score_achieved_at)
                .bind(stats.version)
                .bind(stats.user_id)
                .bind(read_version)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if updated == 0 {
                    // Dropping the transaction rolls back the attempt row too.
                    return Err(AppError::Conflict(format!(
                        "user_stats version moved for user {}",
                        attempt.user_id
                    )));
                }
            }
            None => {
                let mut stats = UserStats::new(attempt.user_id);
                stats.apply(attempt);
                let created = sqlx::query(
                    r#"
                    INSERT INTO user_stats
                        (user_id, total_exams_completed, total_questions_attempted,
                         total_correct_answers, total_incorrect_answers, average_score,
                         total_time_spent_seconds, score_achieved_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (user_id) DO NOTHING
                    "#,
                )
                .bind(stats.user_id)
                .bind(stats.total_exams_completed)
                .bind(stats.total_questions_attempted)
                .bind(stats.total_correct_answers)
                .bind(stats.total_incorrect_answers)
                .bind(stats.average_score)
                .bind(stats.total_time_spent_seconds)
                .bind(stats.score_achieved_at)
                .bind(stats.version)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if created == 0 {
                    return Err(AppError::Conflict(format!(
                        "user_stats concurrently initialized for user {}",
                        attempt.user_id
                    )));
                }
            }
        }

        // Module and day rows are additive and commutative; a keyed upsert
        // is race-free without a version column. GREATEST ignores NULLs,
        // which keeps the improvement timestamp a commutative max.
        let improved_at = (attempt.correct_answers > 0).then_some(attempt.submitted_at);

        sqlx::query(
            r#"
            INSERT INTO module_progress
                (user_id, module_id, questions_attempted, correct_answers, incorrect_answers,
                 last_improved_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, module_id) DO UPDATE SET
                questions_attempted = module_progress.questions_attempted + EXCLUDED.questions_attempted,
                correct_answers = module_progress.correct_answers + EXCLUDED.correct_answers,
                incorrect_answers = module_progress.incorrect_answers + EXCLUDED.incorrect_answers,
                last_improved_at = GREATEST(module_progress.last_improved_at, EXCLUDED.last_improved_at)
            "#,
        )
        .bind(attempt.user_id)
        .bind(attempt.module_id)
        .bind(attempt.questions_attempted)
        .bind(attempt.correct_answers)
        .bind(attempt.incorrect_answers)
        .bind(improved_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO activity_buckets
                (user_id, day, questions_attempted, correct_answers, exams_completed,
                 last_improved_at)
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (user_id, day) DO UPDATE SET
                questions_attempted = activity_buckets.questions_attempted + EXCLUDED.questions_attempted,
                correct_answers = activity_buckets.correct_answers + EXCLUDED.correct_answers,
                exams_completed = activity_buckets.exams_completed + 1,
                last_improved_at = GREATEST(activity_buckets.last_improved_at, EXCLUDED.last_improved_at)
            "#,
        )
        .bind(attempt.user_id)
        .bind(bucket_day)
        .bind(attempt.questions_attempted)
        .bind(attempt.correct_answers)
        .bind(improved_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Admission::Accepted)
    }

    async fn user_stats(&self, user_id: i64) -> Result<Option<UserStats>, AppError> {
        let stats = sqlx::query_as::<_, UserStats>(&format!(
            "SELECT {USER_STATS_COLUMNS} FROM user_stats WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn user_ids(&self) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT user_id FROM user_stats ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn module_progress(&self, user_id: i64) -> Result<Vec<ModuleProgressRow>, AppError> {
        let rows = sqlx::query_as::<_, ModuleProgressRow>(
            r#"
            SELECT
                mp.module_id,
                COALESCE(m.name, 'Module ' || mp.module_id) AS module_name,
                mp.questions_attempted,
                mp.correct_answers,
                mp.incorrect_answers
            FROM module_progress mp
            LEFT JOIN modules m ON m.id = mp.module_id
            WHERE mp.user_id = $1
            ORDER BY mp.module_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn activity_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ActivityBucket>, AppError> {
        let buckets = sqlx::query_as::<_, ActivityBucket>(
            r#"
            SELECT day, questions_attempted, correct_answers, exams_completed, last_improved_at
            FROM activity_buckets
            WHERE user_id = $1 AND day BETWEEN $2 AND $3
            ORDER BY day
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(buckets)
    }

    async fn ranking_rows(
        &self,
        scope: LeaderboardScope,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RankingRow>, AppError> {
        let rows = match (scope, since) {
            (LeaderboardScope::Global, None) => {
                sqlx::query_as::<_, RankingRow>(
                    r#"
                    SELECT user_id, total_correct_answers AS score, score_achieved_at AS achieved_at
                    FROM user_stats
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
            (LeaderboardScope::Global, Some(since)) => {
                sqlx::query_as::<_, RankingRow>(
                    r#"
                    SELECT
                        user_id,
                        CAST(COALESCE(SUM(correct_answers), 0) AS BIGINT) AS score,
                        MAX(last_improved_at) AS achieved_at
                    FROM activity_buckets
                    WHERE day >= $1
                    GROUP BY user_id
                    "#,
                )
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            (LeaderboardScope::Module(module_id), _) => {
                sqlx::query_as::<_, RankingRow>(
                    r#"
                    SELECT user_id, correct_answers AS score, last_improved_at AS achieved_at
                    FROM module_progress
                    WHERE module_id = $1
                    "#,
                )
                .bind(module_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn attempts_ordered(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<ExamAttempt>, AppError> {
        const COLUMNS: &str = "attempt_id, user_id, module_id, submitted_at, \
             questions_attempted, correct_answers, incorrect_answers, score, time_spent_seconds";

        let attempts = match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, ExamAttempt>(&format!(
                    "SELECT {COLUMNS} FROM exam_attempts WHERE user_id = $1 \
                     ORDER BY submitted_at, attempt_id"
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExamAttempt>(&format!(
                    "SELECT {COLUMNS} FROM exam_attempts ORDER BY submitted_at, attempt_id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(attempts)
    }

    async fn rebuild_from_log(
        &self,
        user_id: Option<i64>,
        utc_offset_minutes: i32,
    ) -> Result<ReplaySummary, AppError> {
        // Deletes go first so their row locks serialize this transaction
        // against live ingests for the same users; the log is then read
        // inside the same transaction, after those locks are held. A
        // concurrent ingest either committed before the read (and is part
        // of the fold) or commits after ours (and lands on top of the
        // rebuilt rows, via its own conflict-and-retry path).
        let mut tx = self.pool.begin().await?;

        match user_id {
            Some(user_id) => {
                sqlx::query("DELETE FROM user_stats WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM module_progress WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM activity_buckets WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM user_stats").execute(&mut *tx).await?;
                sqlx::query("DELETE FROM module_progress").execute(&mut *tx).await?;
                sqlx::query("DELETE FROM activity_buckets").execute(&mut *tx).await?;
            }
        }

        const COLUMNS: &str = "attempt_id, user_id, module_id, submitted_at, \
             questions_attempted, correct_answers, incorrect_answers, score, time_spent_seconds";
        let attempts = match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, ExamAttempt>(&format!(
                    "SELECT {COLUMNS} FROM exam_attempts WHERE user_id = $1 \
                     ORDER BY submitted_at, attempt_id"
                ))
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExamAttempt>(&format!(
                    "SELECT {COLUMNS} FROM exam_attempts ORDER BY submitted_at, attempt_id"
                ))
                .fetch_all(&mut *tx)
                .await?
            }
        };

        let rebuilt = fold_attempts(&attempts, utc_offset_minutes);
        let summary = ReplaySummary {
            attempts_replayed: attempts.len(),
            users_rebuilt: rebuilt.stats.len(),
        };

        // Upsert rather than plain insert: a brand-new user's first ingest
        // can commit between our deletes and here without touching any
        // locked row; the folded values for that user are identical, so
        // overwriting converges.
        for stats in &rebuilt.stats {
            sqlx::query(
                r#"
                INSERT INTO user_stats
                    (user_id, total_exams_completed, total_questions_attempted,
                     total_correct_answers, total_incorrect_answers, average_score,
                     total_time_spent_seconds, score_achieved_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (user_id) DO UPDATE SET
                    total_exams_completed = EXCLUDED.total_exams_completed,
                    total_questions_attempted = EXCLUDED.total_questions_attempted,
                    total_correct_answers = EXCLUDED.total_correct_answers,
                    total_incorrect_answers = EXCLUDED.total_incorrect_answers,
                    average_score = EXCLUDED.average_score,
                    total_time_spent_seconds = EXCLUDED.total_time_spent_seconds,
                    score_achieved_at = EXCLUDED.score_achieved_at,
                    version = EXCLUDED.version
                "#,
            )
            .bind(stats.user_id)
            .bind(stats.total_exams_completed)
            .bind(stats.total_questions_attempted)
            .bind(stats.total_correct_answers)
            .bind(stats.total_incorrect_answers)
            .bind(stats.average_score)
            .bind(stats.total_time_spent_seconds)
            .bind(stats.score_achieved_at)
            .bind(stats.version)
            .execute(&mut *tx)
            .await?;
        }

        for module in &rebuilt.modules {
            sqlx::query(
                r#"
                INSERT INTO module_progress
                    (user_id, module_id, questions_attempted, correct_answers, incorrect_answers,
                     last_improved_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, module_id) DO UPDATE SET
                    questions_attempted = EXCLUDED.questions_attempted,
                    correct_answers = EXCLUDED.correct_answers,
                    incorrect_answers = EXCLUDED.incorrect_answers,
                    last_improved_at = EXCLUDED.last_improved_at
                "#,
            )
            .bind(module.user_id)
            .bind(module.module_id)
            .bind(module.questions_attempted)
            .bind(module.correct_answers)
            .bind(module.incorrect_answers)
            .bind(module.last_improved_at)
            .execute(&mut *tx)
            .await?;
        }

        for (user_id, bucket) in &rebuilt.buckets {
            sqlx::query(
                r#"
                INSERT INTO activity_buckets
                    (user_id, day, questions_attempted, correct_answers, exams_completed,
                     last_improved_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, day) DO UPDATE SET
                    questions_attempted = EXCLUDED.questions_attempted,
                    correct_answers = EXCLUDED.correct_answers,
                    exams_completed = EXCLUDED.exams_completed,
                    last_improved_at = EXCLUDED.last_improved_at
                "#,
            )
            .bind(user_id)
            .bind(bucket.day)
            .bind(bucket.questions_attempted)
            .bind(bucket.correct_answers)
            .bind(bucket.exams_completed)
            .bind(bucket.last_improved_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn prune_activity_before(&self, cutoff: NaiveDate) -> Result<u64, AppError> {
        let removed = sqlx::query("DELETE FROM activity_buckets WHERE day < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }
}
