use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::domain::{BusinessName, EmailAddress, PersonName, Segment};
use crate::error::{Error, Result};

/// Lifecycle status of a prospect
///
/// `new → qualified → contacted → registered`, with `unsubscribed` reachable
/// from anywhere and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProspectStatus {
    New,
    Qualified,
    Contacted,
    Registered,
    Unsubscribed,
}

impl ProspectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Qualified => "qualified",
            Self::Contacted => "contacted",
            Self::Registered => "registered",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    /// Whether moving from `self` to `target` is a forward move
    pub fn can_advance_to(&self, target: ProspectStatus) -> bool {
        match (self, target) {
            (Self::Unsubscribed, _) => false,
            (_, Self::Unsubscribed) => true,
            (from, to) => from.rank() < to.rank(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Qualified => 1,
            Self::Contacted => 2,
            Self::Registered => 3,
            Self::Unsubscribed => u8::MAX,
        }
    }
}

impl FromStr for ProspectStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "new" => Ok(Self::New),
            "qualified" => Ok(Self::Qualified),
            "contacted" => Ok(Self::Contacted),
            "registered" => Ok(Self::Registered),
            "unsubscribed" => Ok(Self::Unsubscribed),
            other => Err(Error::ParsingError(format!(
                "{} is not a valid prospect status",
                other
            ))),
        }
    }
}

impl fmt::Display for ProspectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// New prospect request
#[derive(Debug, Clone)]
pub struct NewProspect {
    pub business_name: BusinessName,
    pub contact_name: PersonName,
    pub email: EmailAddress,
    pub segment: Segment,
    pub status: ProspectStatus,
}

/// Stored prospect record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prospect {
    pub id: Uuid,
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub segment: String,
    pub status: ProspectStatus,
    /// Set once, when the first queue item is created
    pub initial_outreach_at: Option<DateTime<Utc>>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Prospect {
    pub fn segment(&self) -> Result<Segment> {
        self.segment.parse()
    }

    /// Eligible for a first outreach
    pub fn is_eligible(&self) -> bool {
        self.status == ProspectStatus::Qualified && self.initial_outreach_at.is_none()
    }
}
