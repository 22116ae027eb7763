// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'exam_attempts' table in the database.
/// One row per completed exam submission; immutable once recorded and
/// retained for audit and replay. The attempt id doubles as the dedup
/// marker: its primary-key constraint is what makes ingestion idempotent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamAttempt {
    pub attempt_id: String,
    pub user_id: i64,
    pub module_id: i64,
    pub submitted_at: DateTime<Utc>,
    pub questions_attempted: i64,
    pub correct_answers: i64,
    pub incorrect_answers: i64,

    /// Per-attempt score on a 0–100 scale, as graded by the exam flow.
    pub score: i64,
    pub time_spent_seconds: i64,
}

/// DTO for submitting an attempt.
/// Safe to post multiple times with the same attempt_id (replay is a no-op).
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = validate_counts))]
pub struct SubmitAttemptRequest {
    #[validate(length(min = 1, max = 64))]
    pub attempt_id: String,
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(range(min = 1))]
    pub module_id: i64,

    /// When the exam was submitted, as reported by the exam-taking flow.
    pub timestamp: DateTime<Utc>,
    #[validate(range(min = 1, max = 1000))]
    pub questions_attempted: i64,
    #[validate(range(min = 0))]
    pub correct_answers: i64,
    #[validate(range(min = 0))]
    pub incorrect_answers: i64,
    #[validate(range(min = 0, max = 100))]
    pub score: i64,
    #[validate(range(min = 0))]
    pub time_spent_seconds: i64,
}

/// Malformed counts are rejected outright, never clamped.
fn validate_counts(req: &SubmitAttemptRequest) -> Result<(), validator::ValidationError> {
    if req.correct_answers + req.incorrect_answers > req.questions_attempted {
        return Err(validator::ValidationError::new(
            "answer_counts_exceed_attempted",
        ));
    }
    Ok(())
}

impl SubmitAttemptRequest {
    pub fn into_attempt(self) -> ExamAttempt {
        ExamAttempt {
            attempt_id: self.attempt_id,
            user_id: self.user_id,
            module_id: self.module_id,
            submitted_at: self.timestamp,
            questions_attempted: self.questions_attempted,
            correct_answers: self.correct_answers,
            incorrect_answers: self.incorrect_answers,
            score: self.score,
            time_spent_seconds: self.time_spent_seconds,
        }
    }
}
