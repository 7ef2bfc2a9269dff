//! Manual "refresh now"
//!
//! A user-triggered poll of one submission. Gated by a per-submission
//! cooldown and the global rate limiter, then handed to the same
//! fetch+reconcile path the scheduler uses. Denials are outcomes, not
//! errors.

use chrono::{DateTime, Duration, Utc};
use payview_common::config::RefreshConfig;
use payview_common::db::{CampaignStatus, SubmissionStatus, ViewSource};
use payview_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{campaigns, submissions};
use crate::reconcile::ReconciliationResult;
use crate::scheduler::{PollOutcome, PollScheduler};

/// Result of a manual refresh request
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(ReconciliationResult),
    /// The submission was called too recently
    CoolingDown { retry_after_secs: u64 },
    /// No global slot in the current window
    RateLimited,
    FetchFailed { reason: String },
    /// Rejected submission or campaign not active
    NotMonitored,
}

impl RefreshOutcome {
    /// Denials the caller should present as "try again shortly"
    pub fn is_retryable_denial(&self) -> bool {
        matches!(self, RefreshOutcome::CoolingDown { .. } | RefreshOutcome::RateLimited)
    }
}

pub struct ManualRefresh {
    pool: SqlitePool,
    scheduler: PollScheduler,
    cooldown: Duration,
}

impl ManualRefresh {
    pub fn new(pool: SqlitePool, scheduler: PollScheduler, config: &RefreshConfig) -> Self {
        Self {
            pool,
            scheduler,
            cooldown: Duration::seconds(config.cooldown_secs as i64),
        }
    }

    pub async fn refresh_now(&self, submission_id: Uuid) -> Result<RefreshOutcome> {
        self.refresh_at(submission_id, Utc::now()).await
    }

    pub async fn refresh_at(&self, submission_id: Uuid, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let submission = submissions::load_submission(&self.pool, submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission_id)))?;

        let campaign_active = campaigns::load_campaign(&self.pool, submission.campaign_id)
            .await?
            .is_some_and(|c| c.status == CampaignStatus::Active);
        if submission.status == SubmissionStatus::Rejected || !campaign_active {
            debug!(submission_id = %submission_id, "Refresh requested for unmonitored submission");
            return Ok(RefreshOutcome::NotMonitored);
        }

        let available_after = now - self.cooldown;
        if !submissions::claim_api_call(&self.pool, submission_id, now, available_after).await? {
            let retry_after = submission
                .last_api_call
                .map(|last| (last + self.cooldown - now).num_seconds())
                .unwrap_or(self.cooldown.num_seconds())
                .max(1) as u64;
            debug!(submission_id = %submission_id, retry_after, "Refresh denied by cooldown");
            return Ok(RefreshOutcome::CoolingDown {
                retry_after_secs: retry_after,
            });
        }

        if !self.scheduler.limiter().try_acquire() {
            submissions::release_api_call(&self.pool, submission_id, now, submission.last_api_call).await?;
            debug!(submission_id = %submission_id, "Refresh denied by rate limiter");
            return Ok(RefreshOutcome::RateLimited);
        }

        info!(submission_id = %submission_id, "Manual refresh");
        match self
            .scheduler
            .poll_submission(&submission, ViewSource::ManualRefresh, now)
            .await?
        {
            PollOutcome::Reconciled(result) => Ok(RefreshOutcome::Refreshed(result)),
            PollOutcome::FetchFailed(e) => Ok(RefreshOutcome::FetchFailed { reason: e.to_string() }),
        }
    }
}
