// src/models/stats.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::attempt::ExamAttempt;

/// Represents the 'user_stats' table: the cumulative aggregate for one user.
///
/// `average_score` is always derived from the running totals
/// (correct / attempted, scaled to 0–100) so exams of different sizes
/// carry proportional weight. It is never stored independently of the
/// counters it is computed from.
///
/// `version` is a monotonic counter used for optimistic concurrency:
/// a write only lands if the row still carries the version it was read at.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: i64,
    pub total_exams_completed: i64,
    pub total_questions_attempted: i64,
    pub total_correct_answers: i64,
    pub total_incorrect_answers: i64,
    pub average_score: f64,
    pub total_time_spent_seconds: i64,

    /// Latest `submitted_at` among attempts that raised this user's
    /// correct-answer total. Leaderboard tie-break: earlier achiever ranks
    /// higher. Kept as a commutative max over contributing attempts, so
    /// live ingestion and a replay of the log agree on it no matter what
    /// order attempts arrived in.
    pub score_achieved_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl UserStats {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            total_exams_completed: 0,
            total_questions_attempted: 0,
            total_correct_answers: 0,
            total_incorrect_answers: 0,
            average_score: 0.0,
            total_time_spent_seconds: 0,
            score_achieved_at: None,
            version: 0,
        }
    }

    /// Folds one attempt into the aggregate and bumps the version.
    /// Pure arithmetic; both store backends and the replay path go through
    /// here so they cannot drift apart.
    pub fn apply(&mut self, attempt: &ExamAttempt) {
        self.total_exams_completed += 1;
        self.total_questions_attempted += attempt.questions_attempted;
        self.total_correct_answers += attempt.correct_answers;
        self.total_incorrect_answers += attempt.incorrect_answers;
        self.total_time_spent_seconds += attempt.time_spent_seconds;
        self.average_score =
            weighted_average(self.total_correct_answers, self.total_questions_attempted);
        if attempt.correct_answers > 0 {
            self.score_achieved_at = self.score_achieved_at.max(Some(attempt.submitted_at));
        }
        self.version += 1;
    }
}

/// Running weighted average on a 0–100 scale, rounded to two decimals.
pub fn weighted_average(correct: i64, attempted: i64) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    let raw = correct as f64 / attempted as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Represents the 'module_progress' table: one row per user × module.
/// Updated by commutative additive upserts, so it needs no version column.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub user_id: i64,
    pub module_id: i64,
    pub questions_attempted: i64,
    pub correct_answers: i64,
    pub incorrect_answers: i64,

    /// Tie-break key for module-scoped leaderboards; same commutative-max
    /// semantics as `UserStats::score_achieved_at`.
    pub last_improved_at: Option<DateTime<Utc>>,
}

impl ModuleProgress {
    pub fn new(user_id: i64, module_id: i64) -> Self {
        Self {
            user_id,
            module_id,
            questions_attempted: 0,
            correct_answers: 0,
            incorrect_answers: 0,
            last_improved_at: None,
        }
    }

    pub fn apply(&mut self, attempt: &ExamAttempt) {
        self.questions_attempted += attempt.questions_attempted;
        self.correct_answers += attempt.correct_answers;
        self.incorrect_answers += attempt.incorrect_answers;
        if attempt.correct_answers > 0 {
            self.last_improved_at = self.last_improved_at.max(Some(attempt.submitted_at));
        }
    }
}

/// Represents one row of 'activity_buckets': one user's counters for one
/// calendar day. Retained for a rolling window and pruned by the sweep.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActivityBucket {
    pub day: NaiveDate,
    pub questions_attempted: i64,
    pub correct_answers: i64,
    pub exams_completed: i64,

    /// Tie-break key for windowed leaderboards: latest improving attempt
    /// that landed in this bucket.
    pub last_improved_at: Option<DateTime<Utc>>,
}

impl ActivityBucket {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            questions_attempted: 0,
            correct_answers: 0,
            exams_completed: 0,
            last_improved_at: None,
        }
    }

    pub fn apply(&mut self, attempt: &ExamAttempt) {
        self.questions_attempted += attempt.questions_attempted;
        self.correct_answers += attempt.correct_answers;
        self.exams_completed += 1;
        if attempt.correct_answers > 0 {
            self.last_improved_at = self.last_improved_at.max(Some(attempt.submitted_at));
        }
    }
}

/// DTO for the user dashboard. Owns the external field names; the aggregate
/// schema keeps a single canonical counter per concept.
#[derive(Debug, Serialize)]
pub struct UserStatsResponse {
    #[serde(rename = "totalExamsCompleted")]
    pub total_exams_completed: i64,
    #[serde(rename = "totalQuestionsAttempted")]
    pub total_questions_attempted: i64,
    #[serde(rename = "totalCorrectAnswers")]
    pub total_correct_answers: i64,
    #[serde(rename = "totalIncorrectAnswers")]
    pub total_incorrect_answers: i64,
    #[serde(rename = "averageScore")]
    pub average_score: f64,
    #[serde(rename = "studyHours")]
    pub study_hours: f64,
    pub rank: Option<i64>,
}

/// DTO for the per-module breakdown, joined with the module display name.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModuleProgressRow {
    #[serde(rename = "moduleId")]
    pub module_id: i64,
    #[serde(rename = "moduleName")]
    pub module_name: String,
    #[serde(rename = "questionsAttempted")]
    pub questions_attempted: i64,
    #[serde(rename = "correctAnswers")]
    pub correct_answers: i64,
    #[serde(rename = "incorrectAnswers")]
    pub incorrect_answers: i64,
}

/// One point of the zero-filled daily activity series.
#[derive(Debug, Serialize, PartialEq)]
pub struct ActivityPoint {
    pub date: NaiveDate,
    #[serde(rename = "questionsAttempted")]
    pub questions_attempted: i64,
    #[serde(rename = "examsCompleted")]
    pub exams_completed: i64,
}
