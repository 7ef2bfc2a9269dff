//! Creator profile aggregate

use chrono::{DateTime, Utc};
use payview_common::db::CreatorProfile;
use payview_common::time::to_millis;
use payview_common::Result;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

/// Insert a profile (seeding path)
pub async fn insert_profile<'e, E>(executor: E, profile: &CreatorProfile, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO creator_profiles (creator_id, display_name, total_earnings, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(profile.creator_id.to_string())
    .bind(&profile.display_name)
    .bind(profile.total_earnings)
    .bind(to_millis(at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Load a profile by creator id
pub async fn load_profile<'e, E>(executor: E, creator_id: Uuid) -> Result<Option<CreatorProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT creator_id, display_name, total_earnings FROM creator_profiles WHERE creator_id = ?")
        .bind(creator_id.to_string())
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|row| CreatorProfile {
        creator_id,
        display_name: row.get("display_name"),
        total_earnings: row.get("total_earnings"),
    }))
}

/// Add an earnings delta to a creator's running total, never below zero
///
/// Creates the profile row if the creator has none yet. The clamp happens
/// in SQL so out-of-order deltas cannot drive the total negative.
pub async fn apply_earnings_delta<'e, E>(executor: E, creator_id: Uuid, delta: i64, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO creator_profiles (creator_id, display_name, total_earnings, updated_at)
        VALUES (?, '', MAX(0, ?), ?)
        ON CONFLICT(creator_id) DO UPDATE SET
            total_earnings = MAX(0, total_earnings + ?),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(creator_id.to_string())
    .bind(delta)
    .bind(to_millis(at))
    .bind(delta)
    .execute(executor)
    .await?;

    Ok(())
}
