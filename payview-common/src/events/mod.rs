//! Event types for the PayView event system
//!
//! Provides the shared event definitions and the EventBus used to tell
//! UI-facing read paths that an entity changed. Consumers either subscribe
//! to the bus or re-read on notification; nothing is pushed implicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{Tier, ViewSource};

/// PayView event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorEvent {
    /// A reconciliation committed new tracking or money state
    ///
    /// Triggers:
    /// - SSE: refresh submission row and campaign budget display
    SubmissionUpdated {
        submission_id: Uuid,
        campaign_id: Uuid,
        view_count: i64,
        /// Cents
        earnings: i64,
        /// Cents applied to the campaign budget by this update
        earnings_delta: i64,
        source: ViewSource,
        timestamp: DateTime<Utc>,
    },

    /// A pending submission reached the view threshold for the first time
    ///
    /// Triggers:
    /// - Notifier: tell the brand a submission is ready for review
    ThresholdMet {
        submission_id: Uuid,
        campaign_id: Uuid,
        creator_id: Uuid,
        view_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A campaign's budget is exhausted; polling of its submissions stops
    CampaignCompleted {
        campaign_id: Uuid,
        /// Cents left when completion fired (below one meaningful payout)
        remaining_budget: i64,
        total_views: i64,
        timestamp: DateTime<Utc>,
    },

    /// Classifier moved a submission to a different tier
    TierChanged {
        submission_id: Uuid,
        old_tier: Tier,
        new_tier: Tier,
        growth_rate: f64,
        timestamp: DateTime<Utc>,
    },

    /// External fetch failed; state left untouched apart from `last_api_call`
    FetchFailed {
        submission_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::SubmissionUpdated { .. } => "SubmissionUpdated",
            MonitorEvent::ThresholdMet { .. } => "ThresholdMet",
            MonitorEvent::CampaignCompleted { .. } => "CampaignCompleted",
            MonitorEvent::TierChanged { .. } => "TierChanged",
            MonitorEvent::FetchFailed { .. } => "FetchFailed",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use payview_common::events::{EventBus, MonitorEvent};
/// use uuid::Uuid;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(MonitorEvent::FetchFailed {
///     submission_id: Uuid::new_v4(),
///     reason: "timeout".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MonitorEvent,
    ) -> Result<usize, broadcast::error::SendError<MonitorEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        let result = bus.emit(MonitorEvent::FetchFailed {
            submission_id: Uuid::new_v4(),
            reason: "network".to_string(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let campaign_id = Uuid::new_v4();

        bus.emit_lossy(MonitorEvent::CampaignCompleted {
            campaign_id,
            remaining_budget: 0,
            total_views: 42_000,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            MonitorEvent::CampaignCompleted { campaign_id: id, .. } => assert_eq!(id, campaign_id),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = MonitorEvent::TierChanged {
            submission_id: Uuid::nil(),
            old_tier: Tier::Warm,
            new_tier: Tier::Hot,
            growth_rate: 812.5,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TierChanged");
        assert_eq!(json["new_tier"], "hot");
        assert_eq!(event.event_type(), "TierChanged");
    }
}
