//! Submission tracking-state queries

use chrono::{DateTime, Utc};
use payview_common::db::{HistorySample, Submission, SubmissionStatus, Tier};
use payview_common::time::{from_millis, from_millis_opt, to_millis};
use payview_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::parse_uuid;

const SUBMISSION_COLUMNS: &str = r#"
    s.id, s.campaign_id, s.creator_id, s.platform, s.video_url, s.status,
    s.view_count, s.last_view_update, s.last_api_call, s.monitoring_tier,
    s.last_tier_update, s.growth_rate, s.view_history, s.threshold_met_at,
    s.earnings, s.paid_out_amount, s.version, s.created_at
"#;

/// Submissions the engine still monitors: not rejected, campaign active
const MONITORED_PREDICATE: &str = "s.status != 'rejected' AND c.status = 'active'";

fn row_to_submission(row: &SqliteRow) -> Result<Submission> {
    let platform: String = row.get("platform");
    let status: String = row.get("status");
    let tier: String = row.get("monitoring_tier");
    let history: String = row.get("view_history");
    let view_history: Vec<HistorySample> = serde_json::from_str(&history)
        .map_err(|e| Error::Internal(format!("Failed to deserialize view_history: {}", e)))?;

    Ok(Submission {
        id: parse_uuid("submission id", row.get("id"))?,
        campaign_id: parse_uuid("campaign id", row.get("campaign_id"))?,
        creator_id: parse_uuid("creator id", row.get("creator_id"))?,
        platform: platform.parse()?,
        video_url: row.get("video_url"),
        status: status.parse()?,
        view_count: row.get("view_count"),
        last_view_update: from_millis_opt(row.get("last_view_update")),
        last_api_call: from_millis_opt(row.get("last_api_call")),
        monitoring_tier: tier.parse()?,
        last_tier_update: from_millis_opt(row.get("last_tier_update")),
        growth_rate: row.get("growth_rate"),
        view_history,
        threshold_met_at: from_millis_opt(row.get("threshold_met_at")),
        earnings: row.get("earnings"),
        paid_out_amount: row.get("paid_out_amount"),
        version: row.get("version"),
        created_at: from_millis(row.get("created_at")),
    })
}

fn history_json(history: &[HistorySample]) -> Result<String> {
    serde_json::to_string(history)
        .map_err(|e| Error::Internal(format!("Failed to serialize view_history: {}", e)))
}

/// Insert a submission (seeding path; submission intake lives elsewhere)
pub async fn insert_submission<'e, E>(executor: E, submission: &Submission) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let history = history_json(&submission.view_history)?;

    sqlx::query(
        r#"
        INSERT INTO submissions (
            id, campaign_id, creator_id, platform, video_url, status,
            view_count, last_view_update, last_api_call, monitoring_tier,
            last_tier_update, growth_rate, view_history, threshold_met_at,
            earnings, paid_out_amount, version, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission.id.to_string())
    .bind(submission.campaign_id.to_string())
    .bind(submission.creator_id.to_string())
    .bind(submission.platform.as_str())
    .bind(&submission.video_url)
    .bind(submission.status.as_str())
    .bind(submission.view_count)
    .bind(submission.last_view_update.map(to_millis))
    .bind(submission.last_api_call.map(to_millis))
    .bind(submission.monitoring_tier.as_str())
    .bind(submission.last_tier_update.map(to_millis))
    .bind(submission.growth_rate)
    .bind(history)
    .bind(submission.threshold_met_at.map(to_millis))
    .bind(submission.earnings)
    .bind(submission.paid_out_amount)
    .bind(submission.version)
    .bind(to_millis(submission.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Load a submission by id
pub async fn load_submission<'e, E>(executor: E, id: Uuid) -> Result<Option<Submission>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM submissions s WHERE s.id = ?", SUBMISSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_submission).transpose()
}

/// Monitored submissions in `tiers` not refreshed since `stale_before`
///
/// Least recently refreshed first; never-polled submissions lead.
pub async fn select_due(pool: &SqlitePool, tiers: &[Tier], stale_before: DateTime<Utc>) -> Result<Vec<Submission>> {
    let placeholders = vec!["?"; tiers.len()].join(", ");
    let sql = format!(
        r#"
        SELECT {columns}
        FROM submissions s
        JOIN campaigns c ON c.id = s.campaign_id
        WHERE {monitored}
          AND s.monitoring_tier IN ({placeholders})
          AND (s.last_view_update IS NULL OR s.last_view_update <= ?)
          AND (s.last_api_call IS NULL OR s.last_api_call <= ?)
        ORDER BY s.last_view_update IS NOT NULL, s.last_view_update ASC
        "#,
        columns = SUBMISSION_COLUMNS,
        monitored = MONITORED_PREDICATE,
        placeholders = placeholders,
    );

    let mut query = sqlx::query(&sql);
    for tier in tiers {
        query = query.bind(tier.as_str());
    }
    let cutoff = to_millis(stale_before);
    let rows = query.bind(cutoff).bind(cutoff).fetch_all(pool).await?;

    rows.iter().map(row_to_submission).collect()
}

/// All monitored submissions (reclassification sweep input)
pub async fn list_monitored(pool: &SqlitePool) -> Result<Vec<Submission>> {
    let sql = format!(
        "SELECT {} FROM submissions s JOIN campaigns c ON c.id = s.campaign_id WHERE {}",
        SUBMISSION_COLUMNS, MONITORED_PREDICATE
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_submission).collect()
}

/// Monitored submission count per tier
pub async fn tier_counts(pool: &SqlitePool) -> Result<HashMap<Tier, i64>> {
    let sql = format!(
        r#"
        SELECT s.monitoring_tier AS tier, COUNT(*) AS n
        FROM submissions s
        JOIN campaigns c ON c.id = s.campaign_id
        WHERE {}
        GROUP BY s.monitoring_tier
        "#,
        MONITORED_PREDICATE
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut counts = HashMap::new();
    for row in rows {
        let tier: String = row.get("tier");
        counts.insert(tier.parse::<Tier>()?, row.get::<i64, _>("n"));
    }
    Ok(counts)
}

/// Write classifier output; no money or tracking fields are touched
pub async fn update_tier(
    pool: &SqlitePool,
    id: Uuid,
    tier: Tier,
    growth_rate: Option<f64>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET monitoring_tier = ?, growth_rate = ?, last_tier_update = ? WHERE id = ?",
    )
    .bind(tier.as_str())
    .bind(growth_rate)
    .bind(to_millis(at))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record an external call attempt without touching tracking state
pub async fn stamp_api_call(pool: &SqlitePool, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE submissions SET last_api_call = ? WHERE id = ?")
        .bind(to_millis(at))
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Atomically claim the per-submission cooldown slot
///
/// Stamps `last_api_call = at` only if the previous call is no later than
/// `available_after`; returns whether the claim succeeded.
pub async fn claim_api_call(
    pool: &SqlitePool,
    id: Uuid,
    at: DateTime<Utc>,
    available_after: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE submissions SET last_api_call = ? WHERE id = ? AND (last_api_call IS NULL OR last_api_call <= ?)",
    )
    .bind(to_millis(at))
    .bind(id.to_string())
    .bind(to_millis(available_after))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Undo a cooldown claim that never led to an external call
///
/// Only reverts if nothing stamped `last_api_call` after the claim.
pub async fn release_api_call(
    pool: &SqlitePool,
    id: Uuid,
    claimed_at: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE submissions SET last_api_call = ? WHERE id = ? AND last_api_call = ?")
        .bind(previous.map(to_millis))
        .bind(id.to_string())
        .bind(to_millis(claimed_at))
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist reconciled tracking and money fields, guarded by version
///
/// Returns `Error::Conflict` when another writer committed first.
pub async fn update_reconciled<'e, E>(
    executor: E,
    submission: &Submission,
    expected_version: i64,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let history = history_json(&submission.view_history)?;

    let result = sqlx::query(
        r#"
        UPDATE submissions
        SET view_count = ?, last_view_update = ?, last_api_call = ?,
            view_history = ?, threshold_met_at = ?, earnings = ?,
            version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(submission.view_count)
    .bind(submission.last_view_update.map(to_millis))
    .bind(submission.last_api_call.map(to_millis))
    .bind(history)
    .bind(submission.threshold_met_at.map(to_millis))
    .bind(submission.earnings)
    .bind(submission.id.to_string())
    .bind(expected_version)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "submission {} changed since version {}",
            submission.id, expected_version
        )));
    }

    Ok(())
}

/// Change review status (seeding and test path; review itself lives elsewhere)
pub async fn set_status(pool: &SqlitePool, id: Uuid, status: SubmissionStatus) -> Result<()> {
    sqlx::query("UPDATE submissions SET status = ?, version = version + 1 WHERE id = ?")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}
