//! Entity models shared by PayView services
//!
//! Enumerations persist as lowercase TEXT via `as_str` / `FromStr`;
//! money is always integer cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stored TEXT form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Monitoring frequency class assigned from view-growth velocity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Archived,
    /// Not enough history to compute a growth rate yet
    Unclassified,
}

text_enum!(Tier {
    Hot => "hot",
    Warm => "warm",
    Cold => "cold",
    Archived => "archived",
    Unclassified => "unclassified",
});

impl Tier {
    /// Tiers with their own poll timer (unclassified rides with warm)
    pub const SCHEDULED: [Tier; 4] = [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Archived];

    /// Tier values a poll timer for `self` selects
    pub fn polled_tiers(&self) -> &'static [Tier] {
        match self {
            Tier::Hot => &[Tier::Hot],
            Tier::Warm | Tier::Unclassified => &[Tier::Warm, Tier::Unclassified],
            Tier::Cold => &[Tier::Cold],
            Tier::Archived => &[Tier::Archived],
        }
    }
}

/// Submission review lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(SubmissionStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Campaign lifecycle; `Completed` is one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

text_enum!(CampaignStatus {
    Draft => "draft",
    Active => "active",
    Paused => "paused",
    Completed => "completed",
});

/// Short-form video platform hosting a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Instagram,
    Youtube,
}

text_enum!(Platform {
    Tiktok => "tiktok",
    Instagram => "instagram",
    Youtube => "youtube",
});

/// Origin of a view-count sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSource {
    /// Scheduled tier poll
    ExternalApi,
    /// User-triggered "refresh now"
    ManualRefresh,
    /// Internal adjustments (seeding, repair)
    System,
}

text_enum!(ViewSource {
    ExternalApi => "external_api",
    ManualRefresh => "manual_refresh",
    System => "system",
});

/// One point of a submission's inline view history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub view_count: i64,
}

/// One creator's entry into one campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub creator_id: Uuid,
    pub platform: Platform,
    /// Platform handle or video URL passed to the fetcher
    pub video_url: String,
    pub status: SubmissionStatus,
    pub view_count: i64,
    pub last_view_update: Option<DateTime<Utc>>,
    pub last_api_call: Option<DateTime<Utc>>,
    pub monitoring_tier: Tier,
    pub last_tier_update: Option<DateTime<Utc>>,
    /// Views/hour over the trailing day, when computable
    pub growth_rate: Option<f64>,
    pub view_history: Vec<HistorySample>,
    pub threshold_met_at: Option<DateTime<Utc>>,
    /// Cents
    pub earnings: i64,
    /// Cents already transferred
    pub paid_out_amount: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// New pending submission with empty tracking state
    pub fn new(campaign_id: Uuid, creator_id: Uuid, platform: Platform, video_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            creator_id,
            platform,
            video_url: video_url.into(),
            status: SubmissionStatus::Pending,
            view_count: 0,
            last_view_update: None,
            last_api_call: None,
            monitoring_tier: Tier::Unclassified,
            last_tier_update: None,
            growth_rate: None,
            view_history: Vec::new(),
            threshold_met_at: None,
            earnings: 0,
            paid_out_amount: 0,
            version: 0,
            created_at: Utc::now(),
        }
    }
}

/// A brand's funded offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    /// Cents
    pub total_budget: i64,
    /// Cents, 0 ≤ remaining ≤ total
    pub remaining_budget: i64,
    /// Cents per 1000 views
    pub cpm_rate: i64,
    /// Cents; `None` means uncapped
    pub max_payout_per_submission: Option<i64>,
    pub total_views: i64,
    pub status: CampaignStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// New active campaign with its full budget remaining
    pub fn new(title: impl Into<String>, total_budget: i64, cpm_rate: i64, max_payout_per_submission: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            total_budget,
            remaining_budget: total_budget,
            cpm_rate,
            max_payout_per_submission,
            total_views: 0,
            status: CampaignStatus::Active,
            version: 0,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate view of a creator across campaigns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorProfile {
    pub creator_id: Uuid,
    pub display_name: String,
    /// Cents, never negative
    pub total_earnings: i64,
}

/// Immutable append-only view-count sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewTrackingRecord {
    pub id: i64,
    pub submission_id: Uuid,
    pub view_count: i64,
    pub recorded_at: DateTime<Utc>,
    pub source: ViewSource,
}
