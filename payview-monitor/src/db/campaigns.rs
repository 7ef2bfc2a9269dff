//! Campaign reads and money-field writes

use chrono::{DateTime, Utc};
use payview_common::db::{Campaign, CampaignStatus};
use payview_common::time::{from_millis, to_millis};
use payview_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::parse_uuid;

fn row_to_campaign(row: &SqliteRow) -> Result<Campaign> {
    let status: String = row.get("status");
    Ok(Campaign {
        id: parse_uuid("campaign id", row.get("id"))?,
        title: row.get("title"),
        total_budget: row.get("total_budget"),
        remaining_budget: row.get("remaining_budget"),
        cpm_rate: row.get("cpm_rate"),
        max_payout_per_submission: row.get("max_payout_per_submission"),
        total_views: row.get("total_views"),
        status: status.parse()?,
        version: row.get("version"),
        created_at: from_millis(row.get("created_at")),
    })
}

/// Insert a campaign (seeding path; campaign management lives elsewhere)
pub async fn insert_campaign<'e, E>(executor: E, campaign: &Campaign) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO campaigns (
            id, title, total_budget, remaining_budget, cpm_rate,
            max_payout_per_submission, total_views, status, version,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(campaign.id.to_string())
    .bind(&campaign.title)
    .bind(campaign.total_budget)
    .bind(campaign.remaining_budget)
    .bind(campaign.cpm_rate)
    .bind(campaign.max_payout_per_submission)
    .bind(campaign.total_views)
    .bind(campaign.status.as_str())
    .bind(campaign.version)
    .bind(to_millis(campaign.created_at))
    .bind(to_millis(campaign.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Load a campaign by id
pub async fn load_campaign<'e, E>(executor: E, id: Uuid) -> Result<Option<Campaign>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, title, total_budget, remaining_budget, cpm_rate,
               max_payout_per_submission, total_views, status, version, created_at
        FROM campaigns
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_campaign).transpose()
}

/// Write reconciled money fields, guarded by the version that was read
///
/// Returns `Error::Conflict` when another writer committed first.
pub async fn update_money_fields<'e, E>(
    executor: E,
    campaign: &Campaign,
    expected_version: i64,
    at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET remaining_budget = ?, total_views = ?, status = ?,
            version = version + 1, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(campaign.remaining_budget)
    .bind(campaign.total_views)
    .bind(campaign.status.as_str())
    .bind(to_millis(at))
    .bind(campaign.id.to_string())
    .bind(expected_version)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "campaign {} changed since version {}",
            campaign.id, expected_version
        )));
    }

    Ok(())
}

/// Set a campaign's lifecycle status; completed campaigns are never reopened
pub async fn set_status<'e, E>(executor: E, id: Uuid, status: CampaignStatus, at: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = ?, version = version + 1, updated_at = ?
        WHERE id = ? AND status != 'completed'
        "#,
    )
    .bind(status.as_str())
    .bind(to_millis(at))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}
