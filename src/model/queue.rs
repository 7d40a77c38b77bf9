use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle status of a queue item
///
/// Non-terminal statuses are totally ordered:
/// `pending < sending < sent < opened < clicked`.
/// `failed` and `unsubscribed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Sending,
    Sent,
    Opened,
    Clicked,
    Failed,
    Unsubscribed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Failed => "failed",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Unsubscribed)
    }

    /// Position in the forward order, `None` for terminal statuses
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sending => Some(1),
            Self::Sent => Some(2),
            Self::Opened => Some(3),
            Self::Clicked => Some(4),
            Self::Failed | Self::Unsubscribed => None,
        }
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            "failed" => Ok(Self::Failed),
            "unsubscribed" => Ok(Self::Unsubscribed),
            other => Err(Error::ParsingError(format!(
                "{} is not a valid queue status",
                other
            ))),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// A delivery worker claimed the item
    Sending,
    /// The email provider accepted the message
    Sent,
    /// The email provider rejected the message
    Failed,
    Opened,
    Clicked,
    Unsubscribed,
}

/// The queue state machine.
///
/// Returns the next status, or `None` when the event must not move the item
/// (duplicates, backward moves and anything after a terminal status).
pub fn advance(current: QueueStatus, event: QueueEvent) -> Option<QueueStatus> {
    use QueueStatus as S;

    if current.is_terminal() {
        return None;
    }
    match event {
        QueueEvent::Sending => (current == S::Pending).then_some(S::Sending),
        QueueEvent::Sent => matches!(current, S::Pending | S::Sending).then_some(S::Sent),
        QueueEvent::Failed => matches!(current, S::Pending | S::Sending).then_some(S::Failed),
        QueueEvent::Opened => forward(current, S::Opened),
        QueueEvent::Clicked => forward(current, S::Clicked),
        QueueEvent::Unsubscribed => Some(S::Unsubscribed),
    }
}

fn forward(current: QueueStatus, target: QueueStatus) -> Option<QueueStatus> {
    match (current.rank(), target.rank()) {
        (Some(from), Some(to)) if from < to => Some(target),
        _ => None,
    }
}

/// A scheduled or sent message to a single prospect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub prospect_id: Uuid,
    pub campaign_id: Uuid,
    pub step_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    /// Stable id embedded in the open pixel and unsubscribe link
    pub pixel_id: String,
    /// Click tracking id to destination URL
    pub click_map: BTreeMap<String, String>,
}

/// Outcome of applying an event to a queue item
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub item: QueueItem,
    /// The status moved
    pub status_changed: bool,
    /// This is the first time the event was observed for the item, i.e. its
    /// first-occurrence timestamp was just written
    pub first_occurrence: bool,
}

impl QueueItem {
    /// Apply an event, stamping first-occurrence timestamps.
    ///
    /// Opens, clicks and sends on a live item stamp `opened_at`, `clicked_at`
    /// and `sent_at` the first time they are seen even when the status cannot
    /// move (an open arriving after a click, or a prefetched pixel arriving
    /// before the send is confirmed). Terminal items never change.
    pub fn apply(&mut self, event: QueueEvent, at: DateTime<Utc>) -> (bool, bool) {
        let next = advance(self.status, event);
        let first_occurrence = match event {
            QueueEvent::Opened if !self.status.is_terminal() => stamp(&mut self.opened_at, at),
            QueueEvent::Clicked if !self.status.is_terminal() => stamp(&mut self.clicked_at, at),
            QueueEvent::Unsubscribed if next.is_some() => stamp(&mut self.unsubscribed_at, at),
            QueueEvent::Sent if !self.status.is_terminal() => stamp(&mut self.sent_at, at),
            QueueEvent::Sending | QueueEvent::Failed => next.is_some(),
            _ => false,
        };
        let status_changed = match next {
            Some(status) => {
                self.status = status;
                true
            }
            None => false,
        };
        (status_changed, first_occurrence)
    }

    pub fn into_transition(mut self, event: QueueEvent, at: DateTime<Utc>) -> Transition {
        let (status_changed, first_occurrence) = self.apply(event, at);
        Transition {
            item: self,
            status_changed,
            first_occurrence,
        }
    }

    /// Destination URL registered for a click tracking id
    pub fn click_destination(&self, tracking_id: &str) -> Option<&str> {
        self.click_map.get(tracking_id).map(String::as_str)
    }
}

fn stamp(slot: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(at);
    true
}

/// A queue item about to be written by the scheduler
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub prospect_id: Uuid,
    pub campaign_id: Uuid,
    pub step_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub pixel_id: String,
}

impl NewQueueItem {
    pub fn new(
        prospect_id: Uuid,
        campaign_id: Uuid,
        step_id: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            prospect_id,
            campaign_id,
            step_id: step_id.into(),
            scheduled_at,
            pixel_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Materialize the stored record in `pending`
    pub fn into_item(self, id: Uuid) -> QueueItem {
        QueueItem {
            id,
            prospect_id: self.prospect_id,
            campaign_id: self.campaign_id,
            step_id: self.step_id,
            scheduled_at: self.scheduled_at,
            status: QueueStatus::Pending,
            sent_at: None,
            opened_at: None,
            clicked_at: None,
            unsubscribed_at: None,
            pixel_id: self.pixel_id,
            click_map: BTreeMap::new(),
        }
    }
}
