// src/config.rs

use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rust_log: String,

    /// UTC offset (in minutes) used to map attempt timestamps to calendar
    /// days for activity buckets.
    pub bucket_utc_offset_minutes: i32,

    /// How many times an ingest is retried after an optimistic-concurrency
    /// conflict before the caller sees Unavailable.
    pub max_ingest_retries: u32,
    pub ingest_backoff_ms: u64,

    /// How long a leaderboard snapshot stays valid before it is recomputed.
    pub leaderboard_ttl_secs: u64,
    pub leaderboard_max_page_size: u32,

    /// Rolling window kept for per-day activity buckets.
    pub activity_retention_days: i64,

    /// Interval of the background reconciliation sweep.
    pub reconcile_interval_secs: u64,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            rust_log,
            bucket_utc_offset_minutes: env_parsed("BUCKET_UTC_OFFSET_MINUTES", 0),
            max_ingest_retries: env_parsed("MAX_INGEST_RETRIES", 5),
            ingest_backoff_ms: env_parsed("INGEST_BACKOFF_MS", 25),
            leaderboard_ttl_secs: env_parsed("LEADERBOARD_TTL_SECS", 5),
            leaderboard_max_page_size: env_parsed("LEADERBOARD_MAX_PAGE_SIZE", 100),
            activity_retention_days: env_parsed("ACTIVITY_RETENTION_DAYS", 56),
            reconcile_interval_secs: env_parsed("RECONCILE_INTERVAL_SECS", 300),
        }
    }

    /// Engine defaults without touching the environment. Used by tests and
    /// by callers embedding the engine without a full service config.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            rust_log: "error".to_string(),
            bucket_utc_offset_minutes: 0,
            max_ingest_retries: 5,
            ingest_backoff_ms: 1,
            leaderboard_ttl_secs: 5,
            leaderboard_max_page_size: 100,
            activity_retention_days: 56,
            reconcile_interval_secs: 300,
        }
    }
}
