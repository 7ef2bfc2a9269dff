//! payview-monitor library
//!
//! View monitoring and budget reconciliation engine: tiered polling of
//! submission view counts under a global rate budget, growth-based tier
//! classification, and the transaction that turns view changes into
//! campaign budget and creator earnings updates.

pub mod api;
pub mod db;
pub mod earnings;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod rate_limiter;
pub mod reconcile;
pub mod refresh;
pub mod scheduler;
pub mod stats;
pub mod tiers;
pub mod utils;

use axum::Router;
use chrono::{DateTime, Utc};
use payview_common::config::{CadenceConfig, TomlConfig};
use payview_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::fetcher::ViewFetcher;
use crate::history::ViewHistoryStore;
use crate::rate_limiter::RateLimiter;
use crate::reconcile::ReconciliationEngine;
use crate::refresh::ManualRefresh;
use crate::scheduler::tasks::register_monitor_tasks;
use crate::scheduler::{PollScheduler, TaskRunner};
use crate::tiers::TierClassifier;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub limiter: Arc<RateLimiter>,
    pub cadence: CadenceConfig,
    pub refresh: Arc<ManualRefresh>,
    pub history: ViewHistoryStore,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

/// The wired engine: one instance of every component, sharing one pool,
/// one event bus and one rate limiter
pub struct Monitor {
    pool: SqlitePool,
    events: EventBus,
    cadence: CadenceConfig,
    limiter: Arc<RateLimiter>,
    engine: Arc<ReconciliationEngine>,
    classifier: Arc<TierClassifier>,
    history: ViewHistoryStore,
    scheduler: PollScheduler,
    refresh: Arc<ManualRefresh>,
}

impl Monitor {
    pub fn new(pool: SqlitePool, config: &TomlConfig, fetcher: Arc<dyn ViewFetcher>, events: EventBus) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let engine = Arc::new(ReconciliationEngine::new(
            pool.clone(),
            events.clone(),
            config.reconcile.clone(),
            &config.history,
        ));
        let classifier = Arc::new(TierClassifier::new(pool.clone(), config.tiers.clone(), events.clone()));
        let history = ViewHistoryStore::new(pool.clone(), config.history.clone());

        let scheduler = PollScheduler::new(
            pool.clone(),
            config.cadence.clone(),
            Arc::clone(&limiter),
            fetcher,
            Arc::clone(&engine),
            Arc::clone(&classifier),
            events.clone(),
            Duration::from_secs(config.refresh.fetch_timeout_secs),
        );
        let refresh = Arc::new(ManualRefresh::new(pool.clone(), scheduler.clone(), &config.refresh));

        Self {
            pool,
            events,
            cadence: config.cadence.clone(),
            limiter,
            engine,
            classifier,
            history,
            scheduler,
            refresh,
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn classifier(&self) -> &Arc<TierClassifier> {
        &self.classifier
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn refresh(&self) -> &Arc<ManualRefresh> {
        &self.refresh
    }

    pub fn history(&self) -> &ViewHistoryStore {
        &self.history
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Register the tier poll timers and both sweeps
    pub fn register_tasks(&self, runner: &TaskRunner) {
        register_monitor_tasks(
            runner,
            &self.cadence,
            self.scheduler.clone(),
            Arc::clone(&self.classifier),
            self.history.clone(),
        );
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            db: self.pool.clone(),
            event_bus: self.events.clone(),
            limiter: Arc::clone(&self.limiter),
            cadence: self.cadence.clone(),
            refresh: Arc::clone(&self.refresh),
            history: self.history.clone(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::monitoring_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
