//! Configuration loading and path resolution
//!
//! Configuration is a single TOML file. Every section is optional and falls
//! back to compiled defaults, so a missing or partial file never prevents
//! startup. Paths resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::db::Tier;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "PAYVIEW_CONFIG";

/// Environment variable naming the SQLite database file
pub const DATABASE_ENV_VAR: &str = "PAYVIEW_DATABASE";

/// Default bind address for the monitor HTTP surface
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5740";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database file (overridden by CLI / environment)
    pub database_path: Option<PathBuf>,
    /// HTTP bind address (overridden by CLI)
    pub bind_addr: Option<String>,
    pub logging: LoggingConfig,
    pub cadence: CadenceConfig,
    pub tiers: TierThresholds,
    pub rate_limit: RateLimitConfig,
    pub reconcile: ReconcileConfig,
    pub refresh: RefreshConfig,
    pub history: HistoryConfig,
    pub fetcher: FetcherConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset ("error" .. "trace")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Poll cadence per tier plus the housekeeping task intervals (minutes)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CadenceConfig {
    pub hot_minutes: u64,
    pub warm_minutes: u64,
    pub cold_minutes: u64,
    pub archived_minutes: u64,
    /// Reclassification sweep interval
    pub reclassify_minutes: u64,
    /// View-tracking garbage collection interval
    pub history_cleanup_minutes: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            hot_minutes: 15,
            warm_minutes: 60,
            cold_minutes: 360,
            archived_minutes: 1440,
            reclassify_minutes: 360,
            history_cleanup_minutes: 1440,
        }
    }
}

impl CadenceConfig {
    /// Poll interval for a tier; unclassified submissions poll at the warm cadence
    pub fn minutes_for(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Hot => self.hot_minutes,
            Tier::Warm | Tier::Unclassified => self.warm_minutes,
            Tier::Cold => self.cold_minutes,
            Tier::Archived => self.archived_minutes,
        }
    }

    /// Poll interval for a tier as a chrono duration
    pub fn interval_for(&self, tier: Tier) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes_for(tier) as i64)
    }
}

/// Growth-rate thresholds (views/hour) separating the tiers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierThresholds {
    /// Minimum growth for `hot`
    pub hot_min_growth: f64,
    /// Minimum growth for `warm`
    pub warm_min_growth: f64,
    /// Minimum growth for `cold`; anything lower is `archived`
    pub cold_min_growth: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            hot_min_growth: 500.0,
            warm_min_growth: 50.0,
            cold_min_growth: 1.0,
        }
    }
}

/// Global external-call budget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 120,
            window_secs: 60,
        }
    }
}

/// Reconciliation policy knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// View count a pending submission must reach before brand review
    pub earnings_threshold_views: i64,
    /// A campaign completes once its remaining budget buys fewer views than this
    pub completion_min_views: i64,
    /// Attempts before a conflicting reconciliation is abandoned
    pub max_conflict_retries: u32,
    /// Total time to keep retrying while SQLite reports the database locked
    pub max_lock_wait_ms: u64,
    /// Overdraw (cents) tolerated silently before logging an invariant violation
    pub overdraw_tolerance_cents: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            earnings_threshold_views: 1000,
            completion_min_views: 1000,
            max_conflict_retries: 5,
            max_lock_wait_ms: 10_000,
            overdraw_tolerance_cents: 1,
        }
    }
}

/// Manual refresh and fetch limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Per-submission cooldown between external calls
    pub cooldown_secs: u64,
    /// Upper bound on a single external fetch
    pub fetch_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            fetch_timeout_secs: 30,
        }
    }
}

/// View history retention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Age after which `view_tracking` rows are garbage-collected
    pub retention_days: i64,
    /// Age after which samples drop out of a submission's inline history
    pub inline_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            inline_days: 7,
        }
    }
}

/// Scraper gateway used by the HTTP view fetcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetcherConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5741".to_string(),
            api_key: None,
        }
    }
}

impl TomlConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let c = &self.cadence;
        for (name, minutes) in [
            ("hot_minutes", c.hot_minutes),
            ("warm_minutes", c.warm_minutes),
            ("cold_minutes", c.cold_minutes),
            ("archived_minutes", c.archived_minutes),
            ("reclassify_minutes", c.reclassify_minutes),
            ("history_cleanup_minutes", c.history_cleanup_minutes),
        ] {
            if minutes == 0 {
                return Err(Error::Config(format!("cadence.{} must be > 0", name)));
            }
        }

        let t = &self.tiers;
        if !(t.hot_min_growth > t.warm_min_growth && t.warm_min_growth > t.cold_min_growth) {
            return Err(Error::Config(format!(
                "tier thresholds must be strictly decreasing (hot {} > warm {} > cold {})",
                t.hot_min_growth, t.warm_min_growth, t.cold_min_growth
            )));
        }

        if self.rate_limit.requests_per_window == 0 || self.rate_limit.window_secs == 0 {
            return Err(Error::Config(
                "rate_limit.requests_per_window and rate_limit.window_secs must be > 0".to_string(),
            ));
        }

        if self.reconcile.max_conflict_retries == 0 {
            return Err(Error::Config("reconcile.max_conflict_retries must be > 0".to_string()));
        }

        if self.reconcile.max_lock_wait_ms == 0 {
            return Err(Error::Config("reconcile.max_lock_wait_ms must be > 0".to_string()));
        }

        if self.refresh.fetch_timeout_secs == 0 {
            return Err(Error::Config("refresh.fetch_timeout_secs must be > 0".to_string()));
        }

        if self.history.retention_days <= 0 || self.history.inline_days <= 0 {
            return Err(Error::Config("history retention windows must be > 0 days".to_string()));
        }

        Ok(())
    }
}

/// Resolve the config file path: CLI argument → environment → OS default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    default_config_path()
}

/// Resolve the database path: CLI argument → environment → TOML → OS default
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// OS-dependent default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("payview").join("payview-monitor.toml"))
        .unwrap_or_else(|| PathBuf::from("/etc/payview/payview-monitor.toml"))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("payview").join("payview.db"))
        .unwrap_or_else(|| PathBuf::from("./payview_data/payview.db"))
}

/// Load and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Load a TOML config file, falling back to defaults when it is absent
///
/// A file that exists but fails to parse or validate is still an error:
/// silently ignoring a typo'd cadence would poll at the wrong rate.
pub fn load_or_default(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let config = load_toml_config(path)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write a config file (creates parent directories)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
