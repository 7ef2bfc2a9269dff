//! Integration tests for the reconciliation transaction
//!
//! Covers earnings application, the never-decrease rule, threshold
//! crossing, campaign completion and the budget invariant under
//! concurrent writers.

mod helpers;

use chrono::Duration;
use helpers::*;
use payview_common::config::TomlConfig;
use payview_common::db::{CampaignStatus, SubmissionStatus, Tier, ViewSource};
use payview_common::events::MonitorEvent;
use payview_common::Error;
use payview_monitor::earnings::{calculate_earnings, calculate_earnings_delta};
use payview_monitor::reconcile::{ReconcileOutcome, ReconciliationEngine};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

fn engine_for(pool: &sqlx::SqlitePool, config: &TomlConfig) -> (Arc<ReconciliationEngine>, payview_common::events::EventBus) {
    let events = payview_common::events::EventBus::new(1024);
    let engine = Arc::new(ReconciliationEngine::new(
        pool.clone(),
        events.clone(),
        config.reconcile.clone(),
        &config.history,
    ));
    (engine, events)
}

#[tokio::test]
async fn test_earnings_delta_updates_budget_views_and_profile() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine
        .reconcile_at(submission.id, 2_000, ViewSource::ExternalApi, t0())
        .await
        .unwrap();

    assert_eq!(result.outcome, ReconcileOutcome::EarningsApplied);
    assert_eq!(result.earnings_delta, 1_000);
    assert_eq!(result.earnings, 1_000);
    assert_eq!(result.remaining_budget, 99_000);

    let stored = load_submission(&db.pool, submission.id).await;
    assert_eq!(stored.view_count, 2_000);
    assert_eq!(stored.earnings, 1_000);
    assert_eq!(stored.last_view_update, Some(t0()));
    assert_eq!(stored.view_history.len(), 1);

    let campaign = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(campaign.remaining_budget, 99_000);
    assert_eq!(campaign.total_views, 2_000);
    assert_eq!(campaign.status, CampaignStatus::Active);

    assert_eq!(creator_total(&db.pool, submission.creator_id).await, 1_000);
}

#[tokio::test]
async fn test_applied_delta_matches_formula_delta() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 1_000_000, 737, Some(5_000)).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let counts = [0_i64, 1_337, 2_999, 4_500, 6_000, 9_999];
    let mut remaining = campaign.total_budget;
    for pair in counts.windows(2) {
        let expected = calculate_earnings_delta(pair[0], pair[1], 737, Some(5_000));
        let result = engine
            .reconcile(submission.id, pair[1], ViewSource::ExternalApi)
            .await
            .unwrap();
        assert_eq!(result.earnings_delta, expected, "{} -> {}", pair[0], pair[1]);
        remaining -= expected;
        assert_eq!(result.remaining_budget, remaining);
    }

    let stored = load_submission(&db.pool, submission.id).await;
    assert_eq!(stored.earnings, calculate_earnings(9_999, 737, Some(5_000)));
    assert_eq!(stored.earnings, 5_000);
}

#[tokio::test]
async fn test_unchanged_count_only_records_sample() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (monitor, _) = monitor_with(&db.pool, &TomlConfig::default(), MockFetcher::new());
    let engine = monitor.engine();

    engine.reconcile_at(submission.id, 2_000, ViewSource::ExternalApi, t0()).await.unwrap();
    let later = t0() + Duration::hours(1);
    let result = engine
        .reconcile_at(submission.id, 2_000, ViewSource::ExternalApi, later)
        .await
        .unwrap();

    assert_eq!(result.outcome, ReconcileOutcome::Unchanged);
    assert_eq!(result.earnings_delta, 0);

    let stored = load_submission(&db.pool, submission.id).await;
    assert_eq!(stored.last_view_update, Some(later));
    assert_eq!(stored.view_history.len(), 2);
    assert_eq!(load_campaign(&db.pool, campaign.id).await.remaining_budget, 99_000);

    let chart = monitor.history().chart(submission.id, t0() - Duration::days(1)).await.unwrap();
    assert_eq!(chart.len(), 2);
    assert!(chart.iter().all(|r| r.view_count == 2_000));
}

#[tokio::test]
async fn test_capped_submission_stops_spending_budget() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, Some(800)).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let first = engine.reconcile(submission.id, 2_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(first.earnings, 800);

    let second = engine.reconcile(submission.id, 50_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(second.outcome, ReconcileOutcome::ViewsOnly);
    assert_eq!(second.earnings, 800);
    assert_eq!(second.remaining_budget, 99_200);

    let campaign = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(campaign.total_views, 50_000);
}

#[tokio::test]
async fn test_lower_view_count_never_claws_back_earnings() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    engine.reconcile(submission.id, 2_000, ViewSource::ExternalApi).await.unwrap();
    let result = engine.reconcile(submission.id, 1_500, ViewSource::ExternalApi).await.unwrap();

    assert_eq!(result.outcome, ReconcileOutcome::ViewsOnly);
    assert_eq!(result.earnings, 1_000);
    assert_eq!(result.remaining_budget, 99_000);

    let stored = load_submission(&db.pool, submission.id).await;
    assert_eq!(stored.view_count, 1_500);
    assert_eq!(load_campaign(&db.pool, campaign.id).await.total_views, 1_500);
    assert_eq!(creator_total(&db.pool, submission.creator_id).await, 1_000);
}

#[tokio::test]
async fn test_threshold_crossing_fires_exactly_once() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 1_000_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, events) = engine_for(&db.pool, &TomlConfig::default());
    let mut rx = events.subscribe();

    let r1 = engine.reconcile_at(submission.id, 800, ViewSource::ExternalApi, t0()).await.unwrap();
    assert!(!r1.threshold_met);

    let crossed_at = t0() + Duration::minutes(15);
    let r2 = engine
        .reconcile_at(submission.id, 1_200, ViewSource::ExternalApi, crossed_at)
        .await
        .unwrap();
    assert!(r2.threshold_met);

    let r3 = engine
        .reconcile_at(submission.id, 1_500, ViewSource::ExternalApi, crossed_at + Duration::minutes(15))
        .await
        .unwrap();
    assert!(!r3.threshold_met);

    let stored = load_submission(&db.pool, submission.id).await;
    assert_eq!(stored.threshold_met_at, Some(crossed_at));

    let mut threshold_events = 0;
    while let Ok(event) = rx.try_recv() {
        if let MonitorEvent::ThresholdMet { submission_id, creator_id, view_count, .. } = event {
            assert_eq!(submission_id, submission.id);
            assert_eq!(creator_id, submission.creator_id);
            assert_eq!(view_count, 1_200);
            threshold_events += 1;
        }
    }
    assert_eq!(threshold_events, 1);
}

#[tokio::test]
async fn test_threshold_ignored_for_approved_submission() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 1_000_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    set_submission_status(&db.pool, submission.id, SubmissionStatus::Approved).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine.reconcile(submission.id, 5_000, ViewSource::ExternalApi).await.unwrap();
    assert!(!result.threshold_met);
    assert_eq!(load_submission(&db.pool, submission.id).await.threshold_met_at, None);
}

#[tokio::test]
async fn test_exhausted_budget_completes_campaign() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 1_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, events) = engine_for(&db.pool, &TomlConfig::default());
    let mut rx = events.subscribe();

    let result = engine.reconcile(submission.id, 2_000, ViewSource::ExternalApi).await.unwrap();
    assert!(result.campaign_completed);
    assert_eq!(result.remaining_budget, 0);

    let stored = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(stored.status, CampaignStatus::Completed);

    let completed = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, MonitorEvent::CampaignCompleted { .. }))
        .count();
    assert_eq!(completed, 1);

    // Completed campaigns accrue nothing further
    let after = engine.reconcile(submission.id, 10_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(after.earnings_delta, 0);
    assert!(!after.campaign_completed);
    assert_eq!(load_campaign(&db.pool, campaign.id).await.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_budget_below_meaningful_views_completes_campaign() {
    let db = test_db().await;
    // 400 cents left at $5 CPM buys 800 views
    let campaign = seed_campaign(&db.pool, 1_400, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine.reconcile(submission.id, 2_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(result.remaining_budget, 400);
    assert!(result.campaign_completed);
}

#[tokio::test]
async fn test_budget_buying_exactly_threshold_views_stays_active() {
    let db = test_db().await;
    // 500 cents left buys exactly 1000 views
    let campaign = seed_campaign(&db.pool, 1_500, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine.reconcile(submission.id, 2_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(result.remaining_budget, 500);
    assert!(!result.campaign_completed);
}

#[tokio::test]
async fn test_overdraw_is_clamped_to_zero() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 500, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine.reconcile(submission.id, 2_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(result.remaining_budget, 0);
    assert!(result.campaign_completed);

    let stored = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(stored.remaining_budget, 0);
}

#[tokio::test]
async fn test_paused_campaign_records_views_without_money() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    set_campaign_status(&db.pool, campaign.id, CampaignStatus::Paused).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine.reconcile(submission.id, 4_000, ViewSource::System).await.unwrap();
    assert_eq!(result.outcome, ReconcileOutcome::ViewsOnly);
    assert_eq!(result.remaining_budget, 100_000);
    assert_eq!(load_submission(&db.pool, submission.id).await.view_count, 4_000);
    assert_eq!(load_campaign(&db.pool, campaign.id).await.status, CampaignStatus::Paused);
}

#[tokio::test]
async fn test_rejected_submission_earns_nothing() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    set_submission_status(&db.pool, submission.id, SubmissionStatus::Rejected).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let result = engine.reconcile(submission.id, 4_000, ViewSource::ExternalApi).await.unwrap();
    assert_eq!(result.earnings, 0);
    assert_eq!(creator_total(&db.pool, submission.creator_id).await, 0);
}

#[tokio::test]
async fn test_invalid_inputs_rejected() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 100_000, 500, None).await;
    let submission = seed_submission(&db.pool, &campaign).await;
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let negative = engine.reconcile(submission.id, -1, ViewSource::ExternalApi).await;
    assert!(matches!(negative, Err(Error::InvalidInput(_))));

    let missing = engine.reconcile(Uuid::new_v4(), 10, ViewSource::ExternalApi).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    // Nothing was written for the rejected call
    let stored = load_submission(&db.pool, submission.id).await;
    assert_eq!(stored.last_view_update, None);
    assert_eq!(stored.monitoring_tier, Tier::Unclassified);
}

/// Reconcile every submission through `steps` concurrently across
/// submissions, sequentially within one
async fn hammer(engines: &[Arc<ReconciliationEngine>], submission_ids: &[Uuid], steps: &[i64]) {
    let mut tasks = JoinSet::new();
    for (i, id) in submission_ids.iter().enumerate() {
        let engine = Arc::clone(&engines[i % engines.len()]);
        let id = *id;
        let steps = steps.to_vec();
        tasks.spawn(async move {
            for views in steps {
                engine.reconcile(id, views, ViewSource::ExternalApi).await.unwrap();
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
}

async fn sum_earnings(pool: &sqlx::SqlitePool, ids: &[Uuid]) -> i64 {
    let mut total = 0;
    for id in ids {
        total += load_submission(pool, *id).await.earnings;
    }
    total
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconciliations_never_lose_budget_updates() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 10_000_000, 1_000, None).await;
    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(seed_submission(&db.pool, &campaign).await.id);
    }
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    hammer(&[engine], &ids, &[1_000, 2_500, 4_000, 7_777]).await;

    let earned = sum_earnings(&db.pool, &ids).await;
    assert_eq!(earned, 20 * 7_777);

    let stored = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(stored.remaining_budget, stored.total_budget - earned);
    assert_eq!(stored.total_views, 20 * 7_777);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_engines_serialize_on_write_lock() {
    let db = test_db().await;
    let campaign = seed_campaign(&db.pool, 10_000_000, 1_000, None).await;
    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(seed_submission(&db.pool, &campaign).await.id);
    }

    // Separate engines share no in-process lock, like two processes
    let (a, _) = engine_for(&db.pool, &TomlConfig::default());
    let (b, _) = engine_for(&db.pool, &TomlConfig::default());

    hammer(&[a, b], &ids, &[500, 1_500, 3_000]).await;

    let earned = sum_earnings(&db.pool, &ids).await;
    assert_eq!(earned, 12 * 3_000);
    let stored = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(stored.remaining_budget, stored.total_budget - earned);
    assert_eq!(stored.total_views, 12 * 3_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_budget_invariant_holds_when_exhausted_concurrently() {
    let db = test_db().await;
    // 1 cent per view; 20 submissions want 60_000 cents from a 50_000 budget
    let campaign = seed_campaign(&db.pool, 50_000, 1_000, None).await;
    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(seed_submission(&db.pool, &campaign).await.id);
    }
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    hammer(&[engine], &ids, &[1_000, 2_000, 3_000]).await;

    let earned = sum_earnings(&db.pool, &ids).await;
    let stored = load_campaign(&db.pool, campaign.id).await;
    assert_eq!(stored.remaining_budget, (stored.total_budget - earned).max(0));
    assert!(stored.remaining_budget >= 0);
    assert_eq!(stored.status, CampaignStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_campaigns_reconcile_concurrently() {
    let db = test_db().await;
    let mut pairs = Vec::new();
    for _ in 0..60 {
        let campaign = seed_campaign(&db.pool, 1_000_000, 500, None).await;
        let submission = seed_submission(&db.pool, &campaign).await;
        pairs.push((campaign.id, submission.id));
    }
    let (engine, _) = engine_for(&db.pool, &TomlConfig::default());

    let mut tasks = JoinSet::new();
    for (_, submission_id) in &pairs {
        let engine = engine.clone();
        let id = *submission_id;
        tasks.spawn(async move { engine.reconcile(id, 5_000, ViewSource::ExternalApi).await });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined.unwrap() {
            failures.push(e.to_string());
        }
    }
    assert!(failures.is_empty(), "{} reconciliations failed: {:?}", failures.len(), failures);

    for (campaign_id, submission_id) in pairs {
        let submission = load_submission(&db.pool, submission_id).await;
        assert_eq!(submission.view_count, 5_000);
        assert_eq!(submission.earnings, 2_500);

        let campaign = load_campaign(&db.pool, campaign_id).await;
        assert_eq!(campaign.remaining_budget, campaign.total_budget - submission.earnings);
        assert_eq!(campaign.total_views, 5_000);
    }
}
