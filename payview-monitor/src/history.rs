//! ViewHistoryStore
//!
//! Two views of the same samples:
//! - `view_tracking` rows: immutable, append-only, kept for the retention
//!   window and used for charts.
//! - `submissions.view_history`: a bounded inline series at decreasing
//!   resolution, used for growth-rate computation.

use chrono::{DateTime, Duration, Utc};
use payview_common::config::HistoryConfig;
use payview_common::db::{HistorySample, ViewSource, ViewTrackingRecord};
use payview_common::time::{from_millis, to_millis};
use payview_common::{Error, Result};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Upper bound on inline samples regardless of age
pub const MAX_INLINE_SAMPLES: usize = 512;

/// Span a growth rate is measured over
const GROWTH_WINDOW_HOURS: i64 = 24;

/// Append one immutable tracking sample
///
/// Generic over the executor so reconciliation can write it inside its
/// transaction.
pub async fn record_sample<'e, E>(
    executor: E,
    submission_id: Uuid,
    view_count: i64,
    source: ViewSource,
    at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO view_tracking (submission_id, view_count, recorded_at, source) VALUES (?, ?, ?, ?)",
    )
    .bind(submission_id.to_string())
    .bind(view_count)
    .bind(to_millis(at))
    .bind(source.as_str())
    .execute(executor)
    .await?;

    Ok(())
}

/// Append `sample` to an inline history and re-compact it
pub fn push_sample(history: &mut Vec<HistorySample>, sample: HistorySample, now: DateTime<Utc>, inline_days: i64) {
    history.push(sample);
    *history = compact(history, now, inline_days);
}

/// Downsample an inline history
///
/// - newer than 24 h: every sample
/// - 1–3 days: latest sample per hour
/// - 3 days to `inline_days`: latest sample per 6 hours
/// - older: dropped
pub fn compact(samples: &[HistorySample], now: DateTime<Utc>, inline_days: i64) -> Vec<HistorySample> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let horizon = Duration::days(inline_days);
    let mut kept: Vec<(Option<(i64, i64)>, HistorySample)> = Vec::with_capacity(sorted.len());

    for sample in sorted {
        let age = now - sample.timestamp;
        if age > horizon {
            continue;
        }

        let bucket = if age <= Duration::hours(24) {
            None
        } else {
            let resolution = if age <= Duration::days(3) { 3_600 } else { 21_600 };
            Some((resolution, sample.timestamp.timestamp().div_euclid(resolution)))
        };

        match kept.last_mut() {
            Some((last_bucket, last)) if bucket.is_some() && *last_bucket == bucket => {
                *last = sample;
            }
            _ => kept.push((bucket, sample)),
        }
    }

    let overflow = kept.len().saturating_sub(MAX_INLINE_SAMPLES);
    kept.into_iter().skip(overflow).map(|(_, s)| s).collect()
}

/// Views/hour over roughly the trailing day
///
/// Baseline is the newest sample at least 24 h older than the latest one,
/// or the oldest sample when history is shorter than that. `None` when the
/// samples span less than one hour.
pub fn growth_rate(samples: &[HistorySample]) -> Option<f64> {
    let latest = samples.iter().max_by_key(|s| s.timestamp)?;
    let cutoff = latest.timestamp - Duration::hours(GROWTH_WINDOW_HOURS);

    let baseline = samples
        .iter()
        .filter(|s| s.timestamp <= cutoff)
        .max_by_key(|s| s.timestamp)
        .or_else(|| samples.iter().min_by_key(|s| s.timestamp))?;

    let elapsed_secs = (latest.timestamp - baseline.timestamp).num_seconds();
    if elapsed_secs < 3_600 {
        return None;
    }

    let hours = elapsed_secs as f64 / 3_600.0;
    Some((latest.view_count - baseline.view_count) as f64 / hours)
}

/// Read side of the tracking log plus retention housekeeping
#[derive(Clone)]
pub struct ViewHistoryStore {
    pool: SqlitePool,
    config: HistoryConfig,
}

impl ViewHistoryStore {
    pub fn new(pool: SqlitePool, config: HistoryConfig) -> Self {
        Self { pool, config }
    }

    pub fn inline_days(&self) -> i64 {
        self.config.inline_days
    }

    /// Tracking samples for one submission since `since`, oldest first
    pub async fn chart(&self, submission_id: Uuid, since: DateTime<Utc>) -> Result<Vec<ViewTrackingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, submission_id, view_count, recorded_at, source
            FROM view_tracking
            WHERE submission_id = ? AND recorded_at >= ?
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(submission_id.to_string())
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let source: String = row.get("source");
                let submission: String = row.get("submission_id");
                Ok(ViewTrackingRecord {
                    id: row.get("id"),
                    submission_id: Uuid::parse_str(&submission)
                        .map_err(|e| Error::Internal(format!("Bad submission id {}: {}", submission, e)))?,
                    view_count: row.get("view_count"),
                    recorded_at: from_millis(row.get("recorded_at")),
                    source: source.parse()?,
                })
            })
            .collect()
    }

    /// Delete tracking rows older than the retention window
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::days(self.config.retention_days);
        let result = sqlx::query("DELETE FROM view_tracking WHERE recorded_at < ?")
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(purged, retention_days = self.config.retention_days, "Purged expired view tracking samples");
        }
        Ok(purged)
    }
}
