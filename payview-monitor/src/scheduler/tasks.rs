//! Periodic tasks the monitor registers at startup

use async_trait::async_trait;
use chrono::Utc;
use payview_common::config::CadenceConfig;
use payview_common::db::Tier;
use payview_common::Result;
use std::sync::Arc;
use std::time::Duration;

use super::periodic::{PeriodicTask, TaskRunner};
use super::PollScheduler;
use crate::history::ViewHistoryStore;
use crate::tiers::TierClassifier;

/// Poll timer for one tier
pub struct TierPollTask {
    scheduler: PollScheduler,
    tier: Tier,
    name: String,
}

impl TierPollTask {
    pub fn new(scheduler: PollScheduler, tier: Tier) -> Self {
        Self {
            scheduler,
            tier,
            name: format!("poll-{}", tier),
        }
    }
}

#[async_trait]
impl PeriodicTask for TierPollTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        self.scheduler.run_tier(self.tier, Utc::now()).await.map(|_| ())
    }
}

/// Demotion sweep over all monitored submissions
pub struct ReclassifyTask {
    classifier: Arc<TierClassifier>,
}

impl ReclassifyTask {
    pub fn new(classifier: Arc<TierClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl PeriodicTask for ReclassifyTask {
    fn name(&self) -> &str {
        "reclassify"
    }

    async fn run(&self) -> Result<()> {
        self.classifier.sweep(Utc::now()).await.map(|_| ())
    }
}

/// View-tracking retention sweep
pub struct HistoryCleanupTask {
    history: ViewHistoryStore,
}

impl HistoryCleanupTask {
    pub fn new(history: ViewHistoryStore) -> Self {
        Self { history }
    }
}

#[async_trait]
impl PeriodicTask for HistoryCleanupTask {
    fn name(&self) -> &str {
        "history-cleanup"
    }

    async fn run(&self) -> Result<()> {
        self.history.purge_expired(Utc::now()).await.map(|_| ())
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

/// Register one poll task per scheduled tier plus both sweeps
pub fn register_monitor_tasks(
    runner: &TaskRunner,
    cadence: &CadenceConfig,
    scheduler: PollScheduler,
    classifier: Arc<TierClassifier>,
    history: ViewHistoryStore,
) {
    for tier in Tier::SCHEDULED {
        runner.register(
            minutes(cadence.minutes_for(tier)),
            Arc::new(TierPollTask::new(scheduler.clone(), tier)),
        );
    }

    runner.register(minutes(cadence.reclassify_minutes), Arc::new(ReclassifyTask::new(classifier)));
    runner.register(
        minutes(cadence.history_cleanup_minutes),
        Arc::new(HistoryCleanupTask::new(history)),
    );
}
