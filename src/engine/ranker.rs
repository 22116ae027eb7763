// src/engine/ranker.rs

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering as AtomicOrdering},
};
use std::time::{Duration, Instant};

use crate::models::leaderboard::{LeaderboardEntry, LeaderboardPeriod, LeaderboardScope};
use crate::store::RankingRow;

/// Sorts ranking candidates into a fully deterministic order and assigns
/// dense strict ranks (1, 2, 3, ... — ties never share a rank, the
/// tie-break chain resolves them completely).
///
/// Order: score descending, then earlier `achieved_at` first (a user who
/// reached the score earlier outranks a later achiever; rows without a
/// timestamp sort after rows with one), then user id ascending. The final
/// key is total, so repeated runs over identical data yield identical
/// output regardless of input order.
pub fn rank(mut rows: Vec<RankingRow>) -> Vec<LeaderboardEntry> {
    rows.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| match (a.achieved_at, b.achieved_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| LeaderboardEntry {
            user_id: row.user_id,
            rank: i as i64 + 1,
            score: row.score,
        })
        .collect()
}

/// One immutable, fully ranked view of a leaderboard.
#[derive(Debug)]
pub struct Snapshot {
    /// Monotonic id; pages served from the same epoch are mutually
    /// consistent even while ingestion mutates the live aggregates.
    pub epoch: u64,
    computed_at: Instant,
    pub entries: Vec<LeaderboardEntry>,
}

impl Snapshot {
    pub fn page(&self, page: u32, page_size: u32) -> &[LeaderboardEntry] {
        let start = (page as usize - 1) * page_size as usize;
        if start >= self.entries.len() {
            return &[];
        }
        let end = (start + page_size as usize).min(self.entries.len());
        &self.entries[start..end]
    }

    pub fn rank_of(&self, user_id: i64) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.user_id == user_id)
            .map(|e| e.rank)
    }
}

type SnapshotKey = (LeaderboardScope, LeaderboardPeriod);

/// Snapshot cache keyed by (scope, period).
///
/// Queries are answered from a cached snapshot until it ages past the TTL;
/// only the first query after expiry pays for a recompute. Ingestion never
/// waits on this and ranking never blocks ingestion.
pub struct SnapshotCache {
    ttl: Duration,
    next_epoch: AtomicU64,
    cache: RwLock<HashMap<SnapshotKey, Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_epoch: AtomicU64::new(1),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached snapshot for the key if it is still fresh.
    pub fn fresh(&self, scope: LeaderboardScope, period: LeaderboardPeriod) -> Option<Arc<Snapshot>> {
        let cache = self.cache.read().ok()?;
        cache
            .get(&(scope, period))
            .filter(|s| s.computed_at.elapsed() < self.ttl)
            .cloned()
    }

    /// Ranks `rows` into a new snapshot and installs it. If two callers
    /// race past `fresh`, the later install simply wins; both snapshots
    /// are internally consistent.
    pub fn install(
        &self,
        scope: LeaderboardScope,
        period: LeaderboardPeriod,
        rows: Vec<RankingRow>,
    ) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot {
            epoch: self.next_epoch.fetch_add(1, AtomicOrdering::Relaxed),
            computed_at: Instant::now(),
            entries: rank(rows),
        });
        if let Ok(mut cache) = self.cache.write() {
            cache.insert((scope, period), snapshot.clone());
        }
        snapshot
    }

    /// Drops all cached snapshots. Used after a rebuild so stale rankings
    /// do not outlive the aggregates they were drawn from.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}
