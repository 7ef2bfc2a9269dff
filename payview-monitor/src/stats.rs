//! Operator-facing monitoring statistics

use payview_common::config::CadenceConfig;
use payview_common::db::Tier;
use payview_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db::submissions;
use crate::rate_limiter::RateLimiter;

const MINUTES_PER_DAY: f64 = 1440.0;

/// Monitored submissions per tier
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub hot: i64,
    pub warm: i64,
    pub cold: i64,
    pub archived: i64,
    pub unclassified: i64,
}

impl TierCounts {
    pub fn from_map(counts: &HashMap<Tier, i64>) -> Self {
        let get = |tier| counts.get(&tier).copied().unwrap_or(0);
        Self {
            hot: get(Tier::Hot),
            warm: get(Tier::Warm),
            cold: get(Tier::Cold),
            archived: get(Tier::Archived),
            unclassified: get(Tier::Unclassified),
        }
    }

    pub fn total(&self) -> i64 {
        self.hot + self.warm + self.cold + self.archived + self.unclassified
    }

    fn entries(&self) -> [(Tier, i64); 5] {
        [
            (Tier::Hot, self.hot),
            (Tier::Warm, self.warm),
            (Tier::Cold, self.cold),
            (Tier::Archived, self.archived),
            (Tier::Unclassified, self.unclassified),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStats {
    pub tier_counts: TierCounts,
    pub requests_last_minute: usize,
    pub utilization_percent: f64,
    pub quota: usize,
    /// Every monitored submission polled at the hot cadence
    pub naive_calls_per_day: f64,
    pub tiered_calls_per_day: f64,
    pub estimated_savings_percent: f64,
}

impl MonitoringStats {
    pub async fn collect(pool: &SqlitePool, limiter: &RateLimiter, cadence: &CadenceConfig) -> Result<Self> {
        let counts = TierCounts::from_map(&submissions::tier_counts(pool).await?);
        Ok(Self::from_counts(
            counts,
            cadence,
            limiter.requests_last_minute(),
            limiter.utilization_percent(),
            limiter.quota(),
        ))
    }

    pub fn from_counts(
        tier_counts: TierCounts,
        cadence: &CadenceConfig,
        requests_last_minute: usize,
        utilization_percent: f64,
        quota: usize,
    ) -> Self {
        let per_day = |minutes: u64| MINUTES_PER_DAY / minutes.max(1) as f64;

        let naive_calls_per_day = tier_counts.total() as f64 * per_day(cadence.hot_minutes);
        let tiered_calls_per_day: f64 = tier_counts
            .entries()
            .into_iter()
            .map(|(tier, count)| count as f64 * per_day(cadence.minutes_for(tier)))
            .sum();

        let estimated_savings_percent = if naive_calls_per_day > 0.0 {
            (1.0 - tiered_calls_per_day / naive_calls_per_day) * 100.0
        } else {
            0.0
        };

        Self {
            tier_counts,
            requests_last_minute,
            utilization_percent,
            quota,
            naive_calls_per_day,
            tiered_calls_per_day,
            estimated_savings_percent,
        }
    }
}
