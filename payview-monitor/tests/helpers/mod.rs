//! Test helpers for payview-monitor integration tests
//!
//! Provides:
//! - TestDb: a fresh SQLite database in a temp directory
//! - Seed functions for campaigns, submissions and profiles
//! - MockFetcher: a scripted ViewFetcher

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use payview_common::config::TomlConfig;
use payview_common::db::{Campaign, CampaignStatus, CreatorProfile, Platform, Submission, SubmissionStatus};
use payview_common::events::EventBus;
use payview_monitor::db::{campaigns, profiles, submissions};
use payview_monitor::fetcher::{FetchError, ViewFetcher};
use payview_monitor::Monitor;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

/// Database that lives as long as its temp directory
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().expect("temp dir");
    let pool = payview_common::db::init_database(&dir.path().join("payview.db"))
        .await
        .expect("init database");
    TestDb { pool, _dir: dir }
}

/// Fixed reference instant so cadence arithmetic is exact
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub async fn seed_campaign(pool: &SqlitePool, total_budget: i64, cpm_rate: i64, max_payout: Option<i64>) -> Campaign {
    let campaign = Campaign::new("Spring launch", total_budget, cpm_rate, max_payout);
    campaigns::insert_campaign(pool, &campaign).await.expect("insert campaign");
    campaign
}

pub async fn seed_submission(pool: &SqlitePool, campaign: &Campaign) -> Submission {
    let creator_id = Uuid::new_v4();
    profiles::insert_profile(
        pool,
        &CreatorProfile {
            creator_id,
            display_name: "creator".to_string(),
            total_earnings: 0,
        },
        t0(),
    )
    .await
    .expect("insert profile");

    let submission = Submission::new(
        campaign.id,
        creator_id,
        Platform::Tiktok,
        format!("https://www.tiktok.com/@creator/video/{}", Uuid::new_v4().as_u128() % 10_000_000_000_000_000_000),
    );
    submissions::insert_submission(pool, &submission).await.expect("insert submission");
    submission
}

pub async fn set_submission_status(pool: &SqlitePool, id: Uuid, status: SubmissionStatus) {
    submissions::set_status(pool, id, status).await.expect("set status");
}

pub async fn set_campaign_status(pool: &SqlitePool, id: Uuid, status: CampaignStatus) {
    campaigns::set_status(pool, id, status, t0()).await.expect("set campaign status");
}

pub async fn load_submission(pool: &SqlitePool, id: Uuid) -> Submission {
    submissions::load_submission(pool, id).await.expect("load").expect("submission exists")
}

pub async fn load_campaign(pool: &SqlitePool, id: Uuid) -> Campaign {
    campaigns::load_campaign(pool, id).await.expect("load").expect("campaign exists")
}

pub async fn creator_total(pool: &SqlitePool, creator_id: Uuid) -> i64 {
    profiles::load_profile(pool, creator_id)
        .await
        .expect("load profile")
        .map(|p| p.total_earnings)
        .unwrap_or(0)
}

/// Scripted fetcher keyed by video URL; unknown URLs fail with NotFound
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Result<i64, FetchError>>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_views(&self, url: &str, views: i64) {
        self.responses.lock().unwrap().insert(url.to_string(), Ok(views));
    }

    pub fn set_error(&self, url: &str, error: FetchError) {
        self.responses.lock().unwrap().insert(url.to_string(), Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewFetcher for MockFetcher {
    async fn fetch(&self, _platform: Platform, handle: &str) -> Result<i64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NotFound(handle.to_string())))
    }
}

/// Monitor over a test database with a scripted fetcher
pub fn monitor_with(pool: &SqlitePool, config: &TomlConfig, fetcher: Arc<MockFetcher>) -> (Monitor, EventBus) {
    let events = EventBus::new(1024);
    let monitor = Monitor::new(pool.clone(), config, fetcher, events.clone());
    (monitor, events)
}
