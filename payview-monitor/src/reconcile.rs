//! ReconciliationEngine
//!
//! Turns a fetched view count into tracking updates, an earnings delta,
//! a campaign budget decrement and a creator total, committed as one
//! transaction over the (submission, campaign) pair.
//!
//! Serialization per campaign happens at two levels:
//! - in-process, an async mutex per campaign orders reconciliations that
//!   share a budget;
//! - in the database, `version` guards on both rows turn a lost race with
//!   another process into `Error::Conflict`, retried with fresh reads.

use chrono::{DateTime, Utc};
use payview_common::config::{HistoryConfig, ReconcileConfig};
use payview_common::db::{Campaign, CampaignStatus, HistorySample, SubmissionStatus, ViewSource};
use payview_common::events::{EventBus, MonitorEvent};
use payview_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::{campaigns, profiles, submissions};
use crate::earnings::{calculate_earnings, max_purchasable_views};
use crate::history::{push_sample, record_sample};
use crate::utils::retry_on_conflict;

/// What a reconciliation changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Same view count; only timestamps and a history sample were written
    Unchanged,
    /// View count moved but no money changed hands
    ViewsOnly,
    /// Earnings delta applied to budget and creator total
    EarningsApplied,
}

/// Result of one reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub submission_id: Uuid,
    pub campaign_id: Uuid,
    pub creator_id: Uuid,
    pub outcome: ReconcileOutcome,
    pub previous_view_count: i64,
    pub view_count: i64,
    /// Cents, after this reconciliation
    pub earnings: i64,
    /// Cents taken from the campaign budget by this reconciliation
    pub earnings_delta: i64,
    /// Cents, after this reconciliation
    pub remaining_budget: i64,
    pub campaign_total_views: i64,
    /// This reconciliation moved the campaign to `completed`
    pub campaign_completed: bool,
    /// This reconciliation stamped `threshold_met_at`
    pub threshold_met: bool,
    pub reconciled_at: DateTime<Utc>,
}

/// Per-campaign async locks, dropped once no reconciliation holds them
#[derive(Default)]
struct CampaignLocks {
    locks: Mutex<HashMap<Uuid, Weak<tokio::sync::Mutex<()>>>>,
}

impl CampaignLocks {
    fn lock_for(&self, campaign_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(lock) = locks.get(&campaign_id).and_then(Weak::upgrade) {
            return lock;
        }

        if locks.len() >= 1024 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(campaign_id, Arc::downgrade(&lock));
        lock
    }
}

/// The single reconciliation code path for scheduled and manual refreshes
pub struct ReconciliationEngine {
    pool: SqlitePool,
    events: EventBus,
    config: ReconcileConfig,
    inline_history_days: i64,
    campaign_locks: CampaignLocks,
}

impl ReconciliationEngine {
    pub fn new(pool: SqlitePool, events: EventBus, config: ReconcileConfig, history: &HistoryConfig) -> Self {
        Self {
            pool,
            events,
            config,
            inline_history_days: history.inline_days,
            campaign_locks: CampaignLocks::default(),
        }
    }

    /// Reconcile a freshly observed view count, stamped with the current time
    pub async fn reconcile(
        &self,
        submission_id: Uuid,
        new_view_count: i64,
        source: ViewSource,
    ) -> Result<ReconciliationResult> {
        self.reconcile_at(submission_id, new_view_count, source, Utc::now()).await
    }

    /// Reconcile a view count observed at `observed_at`
    pub async fn reconcile_at(
        &self,
        submission_id: Uuid,
        new_view_count: i64,
        source: ViewSource,
        observed_at: DateTime<Utc>,
    ) -> Result<ReconciliationResult> {
        if new_view_count < 0 {
            return Err(Error::InvalidInput(format!(
                "negative view count {} for submission {}",
                new_view_count, submission_id
            )));
        }

        // campaign_id never changes, so reading it outside the lock is safe
        let campaign_id = submissions::load_submission(&self.pool, submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission_id)))?
            .campaign_id;

        let lock = self.campaign_locks.lock_for(campaign_id);
        let result = {
            let _guard = lock.lock().await;
            retry_on_conflict(
                "reconcile",
                self.config.max_conflict_retries,
                Duration::from_millis(self.config.max_lock_wait_ms),
                || self.attempt(submission_id, new_view_count, source, observed_at),
            )
            .await?
        };

        self.publish(&result, source);
        Ok(result)
    }

    /// One read-modify-write attempt inside a transaction
    async fn attempt(
        &self,
        submission_id: Uuid,
        new_view_count: i64,
        source: ViewSource,
        at: DateTime<Utc>,
    ) -> Result<ReconciliationResult> {
        // Take the write lock up front: a deferred transaction that upgrades
        // after reading fails with SQLITE_BUSY without honoring busy_timeout
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let mut submission = submissions::load_submission(&mut *tx, submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission_id)))?;
        let mut campaign = campaigns::load_campaign(&mut *tx, submission.campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {}", submission.campaign_id)))?;

        let submission_version = submission.version;
        let campaign_version = campaign.version;
        let previous_view_count = submission.view_count;

        // Tracking state is written on every successful fetch
        submission.last_view_update = Some(at);
        submission.last_api_call = Some(at);
        push_sample(
            &mut submission.view_history,
            HistorySample {
                timestamp: at,
                view_count: new_view_count,
            },
            at,
            self.inline_history_days,
        );
        record_sample(&mut *tx, submission_id, new_view_count, source, at).await?;

        if new_view_count == previous_view_count {
            submissions::update_reconciled(&mut *tx, &submission, submission_version).await?;
            tx.commit().await?;

            debug!(submission_id = %submission_id, view_count = new_view_count, "View count unchanged");
            return Ok(ReconciliationResult {
                submission_id,
                campaign_id: campaign.id,
                creator_id: submission.creator_id,
                outcome: ReconcileOutcome::Unchanged,
                previous_view_count,
                view_count: new_view_count,
                earnings: submission.earnings,
                earnings_delta: 0,
                remaining_budget: campaign.remaining_budget,
                campaign_total_views: campaign.total_views,
                campaign_completed: false,
                threshold_met: false,
                reconciled_at: at,
            });
        }

        submission.view_count = new_view_count;
        campaign.total_views = (campaign.total_views + (new_view_count - previous_view_count)).max(0);

        let threshold = self.config.earnings_threshold_views;
        let threshold_met = submission.status == SubmissionStatus::Pending
            && submission.threshold_met_at.is_none()
            && previous_view_count < threshold
            && new_view_count >= threshold;
        if threshold_met {
            submission.threshold_met_at = Some(at);
        }

        let monetized = campaign.status == CampaignStatus::Active
            && submission.status != SubmissionStatus::Rejected;

        let mut earnings_delta = 0;
        if monetized {
            let new_earnings = calculate_earnings(
                new_view_count,
                campaign.cpm_rate,
                campaign.max_payout_per_submission,
            );
            // Earnings never decrease; a lower count only corrects the views
            earnings_delta = (new_earnings - submission.earnings).max(0);

            if earnings_delta > 0 {
                campaign.remaining_budget = self.debit_budget(&campaign, submission_id, earnings_delta);
                submission.earnings = new_earnings;
                profiles::apply_earnings_delta(&mut *tx, submission.creator_id, earnings_delta, at).await?;
            }
        }

        let campaign_completed = campaign.status == CampaignStatus::Active && self.should_complete(&campaign);
        if campaign_completed {
            campaign.status = CampaignStatus::Completed;
        }

        submissions::update_reconciled(&mut *tx, &submission, submission_version).await?;
        campaigns::update_money_fields(&mut *tx, &campaign, campaign_version, at).await?;
        tx.commit().await?;

        if campaign_completed {
            info!(
                campaign_id = %campaign.id,
                remaining_budget = campaign.remaining_budget,
                total_views = campaign.total_views,
                "Campaign budget exhausted, marked completed"
            );
        }

        debug!(
            submission_id = %submission_id,
            previous_view_count,
            view_count = new_view_count,
            earnings_delta,
            remaining_budget = campaign.remaining_budget,
            "Reconciled view count"
        );

        Ok(ReconciliationResult {
            submission_id,
            campaign_id: campaign.id,
            creator_id: submission.creator_id,
            outcome: if earnings_delta > 0 {
                ReconcileOutcome::EarningsApplied
            } else {
                ReconcileOutcome::ViewsOnly
            },
            previous_view_count,
            view_count: new_view_count,
            earnings: submission.earnings,
            earnings_delta,
            remaining_budget: campaign.remaining_budget,
            campaign_total_views: campaign.total_views,
            campaign_completed,
            threshold_met,
            reconciled_at: at,
        })
    }

    /// Remaining budget after taking `delta`, clamped at zero
    fn debit_budget(&self, campaign: &Campaign, submission_id: Uuid, delta: i64) -> i64 {
        let unclamped = campaign.remaining_budget - delta;
        if unclamped < -self.config.overdraw_tolerance_cents {
            error!(
                campaign_id = %campaign.id,
                submission_id = %submission_id,
                remaining_budget = campaign.remaining_budget,
                earnings_delta = delta,
                overdraw_cents = -unclamped,
                "Invariant violation: earnings delta exceeds remaining budget, clamping to zero"
            );
        }
        unclamped.max(0)
    }

    /// Budget can no longer buy a meaningful number of views
    fn should_complete(&self, campaign: &Campaign) -> bool {
        if campaign.remaining_budget <= 0 {
            return true;
        }
        max_purchasable_views(campaign.remaining_budget, campaign.cpm_rate)
            .is_some_and(|views| views < self.config.completion_min_views)
    }

    fn publish(&self, result: &ReconciliationResult, source: ViewSource) {
        self.events.emit_lossy(MonitorEvent::SubmissionUpdated {
            submission_id: result.submission_id,
            campaign_id: result.campaign_id,
            view_count: result.view_count,
            earnings: result.earnings,
            earnings_delta: result.earnings_delta,
            source,
            timestamp: result.reconciled_at,
        });

        if result.threshold_met {
            self.events.emit_lossy(MonitorEvent::ThresholdMet {
                submission_id: result.submission_id,
                campaign_id: result.campaign_id,
                creator_id: result.creator_id,
                view_count: result.view_count,
                timestamp: result.reconciled_at,
            });
        }

        if result.campaign_completed {
            self.events.emit_lossy(MonitorEvent::CampaignCompleted {
                campaign_id: result.campaign_id,
                remaining_budget: result.remaining_budget,
                total_views: result.campaign_total_views,
                timestamp: result.reconciled_at,
            });
        }
    }
}
