// src/engine/activity.rs

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};

use crate::models::stats::{ActivityBucket, ActivityPoint};

/// Maps an attempt timestamp to its calendar day under the configured
/// bucketing offset. All day-window math in the engine goes through here
/// so "today" means the same thing everywhere.
pub fn bucket_day(timestamp: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| Utc.fix());
    timestamp.with_timezone(&offset).date_naive()
}

/// Expands sparse day buckets into a gapless ascending series over
/// [from, to]. Days without a bucket come back zeroed.
pub fn zero_filled(from: NaiveDate, to: NaiveDate, buckets: &[ActivityBucket]) -> Vec<ActivityPoint> {
    let mut series = Vec::new();
    let mut cursor = from;
    let mut idx = 0;
    while cursor <= to {
        let point = match buckets.get(idx) {
            Some(bucket) if bucket.day == cursor => {
                idx += 1;
                ActivityPoint {
                    date: cursor,
                    questions_attempted: bucket.questions_attempted,
                    exams_completed: bucket.exams_completed,
                }
            }
            _ => ActivityPoint {
                date: cursor,
                questions_attempted: 0,
                exams_completed: 0,
            },
        };
        series.push(point);
        cursor += Duration::days(1);
    }
    series
}

/// Inclusive day window ending today that spans `days` days.
pub fn trailing_window(today: NaiveDate, days: i64) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(days - 1), today)
}
