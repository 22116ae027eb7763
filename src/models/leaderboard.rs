// src/models/leaderboard.rs

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Which population a leaderboard ranks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaderboardScope {
    Global,
    Module(i64),
}

/// Which time window the ranking score is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaderboardPeriod {
    AllTime,
    Weekly,
}

/// One computed leaderboard row. Derived from the aggregates at a snapshot
/// epoch; never stored or hand-edited.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeaderboardEntry {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub rank: i64,
    pub score: i64,
}

/// Raw query parameters for the leaderboard endpoint.
#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub scope: Option<String>,
    pub module_id: Option<i64>,
    pub period: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Validated leaderboard query.
#[derive(Debug, Clone, Copy)]
pub struct LeaderboardQuery {
    pub scope: LeaderboardScope,
    pub period: LeaderboardPeriod,
    pub page: u32,
    pub page_size: u32,
}

impl LeaderboardParams {
    pub fn into_query(self, max_page_size: u32) -> Result<LeaderboardQuery, AppError> {
        let scope = match self.scope.as_deref().unwrap_or("global") {
            "global" => LeaderboardScope::Global,
            "module" => {
                let id = self.module_id.ok_or_else(|| {
                    AppError::BadRequest("scope=module requires module_id".to_string())
                })?;
                if id < 1 {
                    return Err(AppError::BadRequest("module_id must be positive".to_string()));
                }
                LeaderboardScope::Module(id)
            }
            other => {
                return Err(AppError::BadRequest(format!("unknown scope '{}'", other)));
            }
        };

        let period = match self.period.as_deref().unwrap_or("all") {
            "all" => LeaderboardPeriod::AllTime,
            "weekly" => LeaderboardPeriod::Weekly,
            other => {
                return Err(AppError::BadRequest(format!("unknown period '{}'", other)));
            }
        };

        // Weekly scores come from the per-day buckets, which are not broken
        // down by module.
        if matches!(scope, LeaderboardScope::Module(_)) && period == LeaderboardPeriod::Weekly {
            return Err(AppError::BadRequest(
                "weekly leaderboards are global only".to_string(),
            ));
        }

        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(AppError::BadRequest("page must be >= 1".to_string()));
        }

        let page_size = self.page_size.unwrap_or(20);
        if page_size < 1 || page_size > max_page_size {
            return Err(AppError::BadRequest(format!(
                "page_size must be between 1 and {}",
                max_page_size
            )));
        }

        Ok(LeaderboardQuery {
            scope,
            period,
            page,
            page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LeaderboardParams {
        LeaderboardParams {
            scope: None,
            module_id: None,
            period: None,
            page: None,
            page_size: None,
        }
    }

    #[test]
    fn defaults_to_global_all_time() {
        let q = params().into_query(100).unwrap();
        assert_eq!(q.scope, LeaderboardScope::Global);
        assert_eq!(q.period, LeaderboardPeriod::AllTime);
        assert_eq!(q.page, 1);
    }

    #[test]
    fn module_scope_requires_module_id() {
        let mut p = params();
        p.scope = Some("module".to_string());
        assert!(p.into_query(100).is_err());

        let mut p = params();
        p.scope = Some("module".to_string());
        p.module_id = Some(3);
        let q = p.into_query(100).unwrap();
        assert_eq!(q.scope, LeaderboardScope::Module(3));
    }

    #[test]
    fn rejects_weekly_module_combination() {
        let mut p = params();
        p.scope = Some("module".to_string());
        p.module_id = Some(3);
        p.period = Some("weekly".to_string());
        assert!(p.into_query(100).is_err());
    }

    #[test]
    fn rejects_bad_pagination() {
        let mut p = params();
        p.page = Some(0);
        assert!(p.into_query(100).is_err());

        let mut p = params();
        p.page_size = Some(500);
        assert!(p.into_query(100).is_err());
    }
}
