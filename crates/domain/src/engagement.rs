//! Engagement events propagated by the event-propagation saga.

use chrono::{DateTime, NaiveDate, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// What a viewer did with a tweet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EngagementKind {
    Liked,
    Unliked,
    Viewed,
    /// Time spent looking at the tweet.
    TimeSpent { seconds: u32 },
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementKind::Liked => "Liked",
            EngagementKind::Unliked => "Unliked",
            EngagementKind::Viewed => "Viewed",
            EngagementKind::TimeSpent { .. } => "TimeSpent",
        }
    }
}

/// One engagement with a tweet.
///
/// `event_id` identifies the event across every store it is written to,
/// which is what makes re-delivery harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub event_id: EntityId,
    pub tweet_id: EntityId,
    #[serde(flatten)]
    pub kind: EngagementKind,
    pub timestamp: DateTime<Utc>,
}

impl EngagementEvent {
    /// Creates an event stamped with the current time.
    pub fn new(tweet_id: EntityId, kind: EngagementKind) -> Self {
        Self {
            event_id: EntityId::new(),
            tweet_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Overrides the event timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The calendar day (UTC) the event is reported under.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let EngagementKind::TimeSpent { seconds: 0 } = self.kind {
            return Err(DomainError::InvalidEvent(
                "time spent must be positive".to_string(),
            ));
        }
        if self.timestamp > Utc::now() + chrono::Duration::minutes(5) {
            return Err(DomainError::InvalidEvent(
                "timestamp is in the future".to_string(),
            ));
        }
        Ok(())
    }
}
