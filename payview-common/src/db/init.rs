//! Database initialization
//!
//! Creates the database file on first run and idempotently creates every
//! table the monitor reads or writes. Safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection (ms)
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragmas: a pool hands out many connections
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_creator_profiles_table(pool).await?;
    create_campaigns_table(pool).await?;
    create_submissions_table(pool).await?;
    create_view_tracking_table(pool).await?;
    Ok(())
}

async fn create_creator_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS creator_profiles (
            creator_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL DEFAULT '',
            total_earnings INTEGER NOT NULL DEFAULT 0 CHECK (total_earnings >= 0),
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_campaigns_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            total_budget INTEGER NOT NULL CHECK (total_budget >= 0),
            remaining_budget INTEGER NOT NULL
                CHECK (remaining_budget >= 0 AND remaining_budget <= total_budget),
            cpm_rate INTEGER NOT NULL CHECK (cpm_rate >= 0),
            max_payout_per_submission INTEGER CHECK (max_payout_per_submission >= 0),
            total_views INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'active', 'paused', 'completed')),
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            creator_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            video_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected')),
            view_count INTEGER NOT NULL DEFAULT 0 CHECK (view_count >= 0),
            last_view_update INTEGER,
            last_api_call INTEGER,
            monitoring_tier TEXT NOT NULL DEFAULT 'unclassified',
            last_tier_update INTEGER,
            growth_rate REAL,
            view_history TEXT NOT NULL DEFAULT '[]',
            threshold_met_at INTEGER,
            earnings INTEGER NOT NULL DEFAULT 0 CHECK (earnings >= 0),
            paid_out_amount INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Scheduler selection: tier + staleness
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_tier_due \
         ON submissions(monitoring_tier, last_view_update)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_campaign ON submissions(campaign_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_view_tracking_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS view_tracking (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            view_count INTEGER NOT NULL,
            recorded_at INTEGER NOT NULL,
            source TEXT NOT NULL
                CHECK (source IN ('external_api', 'manual_refresh', 'system'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_view_tracking_submission \
         ON view_tracking(submission_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_view_tracking_recorded ON view_tracking(recorded_at)")
        .execute(pool)
        .await?;

    Ok(())
}
