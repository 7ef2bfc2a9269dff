//! PollScheduler
//!
//! One firing per tier: select due submissions, ask the rate limiter for a
//! slot per submission, then fetch and reconcile every admitted submission
//! concurrently. The rate limiter is the only throttle; there is no worker
//! pool bound.

pub mod periodic;
pub mod tasks;

pub use periodic::{PeriodicTask, TaskRunner};

use chrono::{DateTime, Utc};
use payview_common::config::CadenceConfig;
use payview_common::db::{Submission, Tier, ViewSource};
use payview_common::events::{EventBus, MonitorEvent};
use payview_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::db::submissions;
use crate::fetcher::{fetch_with_timeout, FetchError, ViewFetcher};
use crate::rate_limiter::RateLimiter;
use crate::reconcile::{ReconciliationEngine, ReconciliationResult};
use crate::tiers::TierClassifier;

/// What happened to one admitted submission
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Reconciled(ReconciliationResult),
    /// Fetch failed; only `last_api_call` was stamped
    FetchFailed(FetchError),
}

/// Counters for one tier firing
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub tier: Tier,
    pub selected: usize,
    pub admitted: usize,
    /// Denied by the rate limiter; retried at the next firing
    pub deferred: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PollReport {
    fn new(tier: Tier, selected: usize) -> Self {
        Self {
            tier,
            selected,
            admitted: 0,
            deferred: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

/// Everything a fetch+reconcile cycle needs, cheap to clone into tasks
#[derive(Clone)]
pub struct PollScheduler {
    pool: SqlitePool,
    cadence: CadenceConfig,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn ViewFetcher>,
    engine: Arc<ReconciliationEngine>,
    classifier: Arc<TierClassifier>,
    events: EventBus,
    fetch_timeout: Duration,
}

impl PollScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        cadence: CadenceConfig,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn ViewFetcher>,
        engine: Arc<ReconciliationEngine>,
        classifier: Arc<TierClassifier>,
        events: EventBus,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            cadence,
            limiter,
            fetcher,
            engine,
            classifier,
            events,
            fetch_timeout,
        }
    }

    pub fn cadence(&self) -> &CadenceConfig {
        &self.cadence
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Submissions a firing of `tier` at `now` should poll
    ///
    /// Only submissions not refreshed within the tier's interval qualify, so
    /// a late or duplicate firing cannot poll a submission twice in one
    /// interval. Rejected submissions and non-active campaigns never qualify.
    pub async fn select_due(&self, tier: Tier, now: DateTime<Utc>) -> Result<Vec<Submission>> {
        let stale_before = now - self.cadence.interval_for(tier);
        submissions::select_due(&self.pool, tier.polled_tiers(), stale_before).await
    }

    /// One firing of `tier`'s timer
    pub async fn run_tier(&self, tier: Tier, now: DateTime<Utc>) -> Result<PollReport> {
        let due = self.select_due(tier, now).await?;
        let mut report = PollReport::new(tier, due.len());

        if due.is_empty() {
            debug!(tier = %tier, "No submissions due");
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for submission in due {
            // A denial defers this submission only; later ones still ask
            if !self.limiter.try_acquire() {
                debug!(tier = %tier, submission_id = %submission.id, "Deferred by rate limiter");
                report.deferred += 1;
                continue;
            }

            report.admitted += 1;
            let scheduler = self.clone();
            tasks.spawn(async move {
                let id = submission.id;
                (id, scheduler.poll_submission(&submission, ViewSource::ExternalApi, now).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(PollOutcome::Reconciled(_)))) => report.succeeded += 1,
                Ok((_, Ok(PollOutcome::FetchFailed(_)))) => report.failed += 1,
                Ok((id, Err(e))) => {
                    error!(tier = %tier, submission_id = %id, error = %e, "Reconciliation failed");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(tier = %tier, error = %e, "Poll task panicked or was cancelled");
                    report.failed += 1;
                }
            }
        }

        info!(
            tier = %tier,
            selected = report.selected,
            admitted = report.admitted,
            deferred = report.deferred,
            succeeded = report.succeeded,
            failed = report.failed,
            "Tier poll complete"
        );

        Ok(report)
    }

    /// Fetch, reconcile and reclassify one submission that already holds a
    /// rate-limiter slot
    ///
    /// Shared by scheduled polls and manual refresh. `at` stamps every
    /// timestamp written, including `last_api_call` on failure.
    pub async fn poll_submission(
        &self,
        submission: &Submission,
        source: ViewSource,
        at: DateTime<Utc>,
    ) -> Result<PollOutcome> {
        let fetched = fetch_with_timeout(
            self.fetcher.as_ref(),
            submission.platform,
            &submission.video_url,
            self.fetch_timeout,
        )
        .await;

        let view_count = match fetched {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    submission_id = %submission.id,
                    platform = %submission.platform,
                    error = %e,
                    "View fetch failed, retrying at next firing"
                );
                submissions::stamp_api_call(&self.pool, submission.id, at).await?;
                self.events.emit_lossy(MonitorEvent::FetchFailed {
                    submission_id: submission.id,
                    reason: e.to_string(),
                    timestamp: at,
                });
                return Ok(PollOutcome::FetchFailed(e));
            }
        };

        let result = match self.engine.reconcile_at(submission.id, view_count, source, at).await {
            Ok(result) => result,
            Err(e) => {
                // The external call was still spent
                if let Err(stamp_err) = submissions::stamp_api_call(&self.pool, submission.id, at).await {
                    warn!(submission_id = %submission.id, error = %stamp_err, "Failed to stamp api call");
                }
                return Err(e);
            }
        };

        // Promotion right after the poll; demotion is the sweep's job too
        match submissions::load_submission(&self.pool, submission.id).await {
            Ok(Some(updated)) => {
                if let Err(e) = self.classifier.classify_submission(&updated, at).await {
                    warn!(submission_id = %submission.id, error = %e, "Post-poll classification failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(submission_id = %submission.id, error = %e, "Failed to reload submission"),
        }

        Ok(PollOutcome::Reconciled(result))
    }
}
