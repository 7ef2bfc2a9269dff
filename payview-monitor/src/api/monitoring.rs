//! Monitoring statistics, manual refresh and chart history

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use payview_common::db::ViewTrackingRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::submissions;
use crate::error::{ApiError, ApiResult};
use crate::reconcile::ReconciliationResult;
use crate::refresh::RefreshOutcome;
use crate::stats::MonitoringStats;
use crate::AppState;

/// Chart window when `hours` is not given
const DEFAULT_HISTORY_HOURS: i64 = 24 * 7;

/// Longer windows are clamped; tracking rows expire long before this
const MAX_HISTORY_HOURS: i64 = 24 * 366;

/// Body of POST /api/submissions/:id/refresh
///
/// Denials are 200 responses with `status = "try_again"`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshResponse {
    Refreshed {
        result: ReconciliationResult,
    },
    TryAgain {
        reason: &'static str,
        retry_after_secs: u64,
    },
    FetchFailed {
        message: String,
    },
    NotMonitored,
}

impl RefreshResponse {
    fn from_outcome(outcome: RefreshOutcome, window_secs: u64) -> Self {
        match outcome {
            RefreshOutcome::Refreshed(result) => RefreshResponse::Refreshed { result },
            RefreshOutcome::CoolingDown { retry_after_secs } => RefreshResponse::TryAgain {
                reason: "cooldown",
                retry_after_secs,
            },
            RefreshOutcome::RateLimited => RefreshResponse::TryAgain {
                reason: "rate_limited",
                retry_after_secs: window_secs,
            },
            RefreshOutcome::FetchFailed { reason } => RefreshResponse::FetchFailed { message: reason },
            RefreshOutcome::NotMonitored => RefreshResponse::NotMonitored,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub submission_id: Uuid,
    pub hours: i64,
    pub samples: Vec<ViewTrackingRecord>,
}

/// GET /api/monitoring/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<MonitoringStats>> {
    let stats = MonitoringStats::collect(&state.db, &state.limiter, &state.cadence).await?;
    Ok(Json(stats))
}

/// POST /api/submissions/:id/refresh
pub async fn refresh_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
) -> ApiResult<Json<RefreshResponse>> {
    let outcome = state.refresh.refresh_now(submission_id).await?;
    Ok(Json(RefreshResponse::from_outcome(
        outcome,
        state.limiter.window().as_secs(),
    )))
}

/// GET /api/submissions/:id/history?hours=N
pub async fn submission_history(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let hours = query.hours.unwrap_or(DEFAULT_HISTORY_HOURS);
    if hours <= 0 {
        return Err(ApiError::BadRequest(format!("hours must be positive, got {}", hours)));
    }
    let hours = hours.min(MAX_HISTORY_HOURS);

    if submissions::load_submission(&state.db, submission_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("submission {}", submission_id)));
    }

    let since = Utc::now() - Duration::hours(hours);
    let samples = state.history.chart(submission_id, since).await?;

    Ok(Json(HistoryResponse {
        submission_id,
        hours,
        samples,
    }))
}

/// Build monitoring routes
pub fn monitoring_routes() -> Router<AppState> {
    Router::new()
        .route("/api/monitoring/stats", get(get_stats))
        .route("/api/submissions/:id/refresh", post(refresh_submission))
        .route("/api/submissions/:id/history", get(submission_history))
}
