use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::domain::ClientMetadata;
use crate::error::{Error, Result};

use super::QueueEvent;

/// Kind of engagement signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingEventType {
    Opened,
    Clicked,
    Unsubscribed,
}

impl TrackingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

impl From<TrackingEventType> for QueueEvent {
    fn from(value: TrackingEventType) -> Self {
        match value {
            TrackingEventType::Opened => QueueEvent::Opened,
            TrackingEventType::Clicked => QueueEvent::Clicked,
            TrackingEventType::Unsubscribed => QueueEvent::Unsubscribed,
        }
    }
}

impl FromStr for TrackingEventType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            "unsubscribed" => Ok(Self::Unsubscribed),
            other => Err(Error::ParsingError(format!(
                "{} is not a valid tracking event type",
                other
            ))),
        }
    }
}

impl fmt::Display for TrackingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking event about to be appended
#[derive(Debug, Clone)]
pub struct NewTrackingEvent {
    pub queue_item_id: Uuid,
    pub prospect_id: Uuid,
    pub campaign_id: Uuid,
    pub event_type: TrackingEventType,
    pub metadata: ClientMetadata,
    /// Destination of a click
    pub url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Immutable engagement log row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub queue_item_id: Uuid,
    pub prospect_id: Uuid,
    pub campaign_id: Uuid,
    pub event_type: TrackingEventType,
    pub metadata: ClientMetadata,
    pub url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl NewTrackingEvent {
    pub fn into_event(self, id: Uuid) -> TrackingEvent {
        TrackingEvent {
            id,
            queue_item_id: self.queue_item_id,
            prospect_id: self.prospect_id,
            campaign_id: self.campaign_id,
            event_type: self.event_type,
            metadata: self.metadata,
            url: self.url,
            occurred_at: self.occurred_at,
        }
    }
}
