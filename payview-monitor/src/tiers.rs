//! TierClassifier
//!
//! Assigns a monitoring tier from the trailing-day growth rate. Runs right
//! after every successful poll (fast promotion) and as a periodic sweep
//! over all monitored submissions (demotion of decaying content).

use chrono::{DateTime, Utc};
use payview_common::config::TierThresholds;
use payview_common::db::{Submission, Tier};
use payview_common::events::{EventBus, MonitorEvent};
use payview_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db::submissions;
use crate::history::growth_rate;

/// Map a growth rate (views/hour) to a tier
pub fn classify_rate(rate: f64, thresholds: &TierThresholds) -> Tier {
    if rate >= thresholds.hot_min_growth {
        Tier::Hot
    } else if rate >= thresholds.warm_min_growth {
        Tier::Warm
    } else if rate >= thresholds.cold_min_growth {
        Tier::Cold
    } else {
        Tier::Archived
    }
}

/// Tier and growth rate for a submission's current inline history
///
/// `None` when the history cannot yet support a growth rate; the caller
/// keeps whatever tier the submission already has.
pub fn classify(submission: &Submission, thresholds: &TierThresholds) -> Option<(Tier, f64)> {
    let rate = growth_rate(&submission.view_history)?;
    Some((classify_rate(rate, thresholds), rate))
}

/// Result of one reclassification sweep
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepSummary {
    pub examined: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub unchanged: usize,
    /// Not enough history for a growth rate
    pub insufficient_history: usize,
    pub failed: usize,
}

/// Writes tier decisions and announces changes
pub struct TierClassifier {
    pool: SqlitePool,
    thresholds: TierThresholds,
    events: EventBus,
}

impl TierClassifier {
    pub fn new(pool: SqlitePool, thresholds: TierThresholds, events: EventBus) -> Self {
        Self {
            pool,
            thresholds,
            events,
        }
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// Reclassify one submission and persist the result
    ///
    /// Returns the tier the submission holds afterwards.
    pub async fn classify_submission(&self, submission: &Submission, now: DateTime<Utc>) -> Result<Tier> {
        let Some((new_tier, rate)) = classify(submission, &self.thresholds) else {
            debug!(
                submission_id = %submission.id,
                samples = submission.view_history.len(),
                "Growth rate not computable yet, tier unchanged"
            );
            return Ok(submission.monitoring_tier);
        };

        submissions::update_tier(&self.pool, submission.id, new_tier, Some(rate), now).await?;

        let old_tier = submission.monitoring_tier;
        if old_tier != new_tier {
            debug!(
                submission_id = %submission.id,
                old_tier = %old_tier,
                new_tier = %new_tier,
                growth_rate = rate,
                "Tier changed"
            );
            self.events.emit_lossy(MonitorEvent::TierChanged {
                submission_id: submission.id,
                old_tier,
                new_tier,
                growth_rate: rate,
                timestamp: now,
            });
        }

        Ok(new_tier)
    }

    /// Reclassify every monitored submission
    ///
    /// A failure on one submission is logged and counted; the sweep goes on.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let monitored = submissions::list_monitored(&self.pool).await?;
        let mut summary = SweepSummary {
            examined: monitored.len(),
            ..Default::default()
        };

        for submission in &monitored {
            if classify(submission, &self.thresholds).is_none() {
                summary.insufficient_history += 1;
                continue;
            }

            match self.classify_submission(submission, now).await {
                Ok(tier) => match polling_rank(tier).cmp(&polling_rank(submission.monitoring_tier)) {
                    std::cmp::Ordering::Greater => summary.promoted += 1,
                    std::cmp::Ordering::Less => summary.demoted += 1,
                    std::cmp::Ordering::Equal => summary.unchanged += 1,
                },
                Err(e) => {
                    warn!(submission_id = %submission.id, error = %e, "Failed to reclassify submission");
                    summary.failed += 1;
                }
            }
        }

        info!(
            examined = summary.examined,
            promoted = summary.promoted,
            demoted = summary.demoted,
            unchanged = summary.unchanged,
            insufficient_history = summary.insufficient_history,
            failed = summary.failed,
            "Tier reclassification sweep complete"
        );

        Ok(summary)
    }
}

/// Higher polls more often; unclassified polls at the warm cadence
fn polling_rank(tier: Tier) -> u8 {
    match tier {
        Tier::Hot => 3,
        Tier::Warm | Tier::Unclassified => 2,
        Tier::Cold => 1,
        Tier::Archived => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use payview_common::db::{HistorySample, Platform};
    use uuid::Uuid;

    fn thresholds() -> TierThresholds {
        TierThresholds::default()
    }

    #[test]
    fn test_threshold_boundaries() {
        let t = thresholds();
        assert_eq!(classify_rate(500.0, &t), Tier::Hot);
        assert_eq!(classify_rate(499.9, &t), Tier::Warm);
        assert_eq!(classify_rate(50.0, &t), Tier::Warm);
        assert_eq!(classify_rate(49.9, &t), Tier::Cold);
        assert_eq!(classify_rate(1.0, &t), Tier::Cold);
        assert_eq!(classify_rate(0.99, &t), Tier::Archived);
    }

    #[test]
    fn test_flat_and_negative_growth_archive() {
        let t = thresholds();
        assert_eq!(classify_rate(0.0, &t), Tier::Archived);
        assert_eq!(classify_rate(-120.0, &t), Tier::Archived);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = TierThresholds {
            hot_min_growth: 10_000.0,
            warm_min_growth: 1_000.0,
            cold_min_growth: 10.0,
        };
        assert_eq!(classify_rate(5_000.0, &t), Tier::Warm);
        assert_eq!(classify_rate(500.0, &t), Tier::Cold);
    }

    #[test]
    fn test_classify_needs_an_hour_of_history() {
        let now = Utc::now();
        let mut submission = Submission::new(Uuid::new_v4(), Uuid::new_v4(), Platform::Tiktok, "v");
        submission.view_history = vec![HistorySample {
            timestamp: now,
            view_count: 10,
        }];
        assert_eq!(classify(&submission, &thresholds()), None);

        submission.view_history.insert(
            0,
            HistorySample {
                timestamp: now - Duration::hours(2),
                view_count: 0,
            },
        );
        // 10 views over 2 hours
        assert_eq!(classify(&submission, &thresholds()), Some((Tier::Cold, 5.0)));
    }

    #[test]
    fn test_hot_yesterday_flat_today_demotes() {
        let now = Utc::now();
        let mut submission = Submission::new(Uuid::new_v4(), Uuid::new_v4(), Platform::Youtube, "v");
        submission.monitoring_tier = Tier::Hot;
        submission.view_history = vec![
            HistorySample {
                timestamp: now - Duration::hours(48),
                view_count: 0,
            },
            HistorySample {
                timestamp: now - Duration::hours(24),
                view_count: 40_000,
            },
            HistorySample {
                timestamp: now,
                view_count: 40_010,
            },
        ];

        let (tier, _) = classify(&submission, &thresholds()).unwrap();
        assert_eq!(tier, Tier::Archived);
    }

    #[test]
    fn test_polling_rank_orders_cadence() {
        assert!(polling_rank(Tier::Hot) > polling_rank(Tier::Warm));
        assert_eq!(polling_rank(Tier::Unclassified), polling_rank(Tier::Warm));
        assert!(polling_rank(Tier::Cold) > polling_rank(Tier::Archived));
    }
}
