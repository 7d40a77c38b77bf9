use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::domain::Segment;
use crate::error::{Error, Result};

/// One email in a campaign sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStep {
    pub id: String,
    /// Template reference, used to tag outgoing messages
    pub template: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Delay after the previous step was sent. Ignored for the first step.
    #[serde(default)]
    pub offset_hours: i64,
}

impl CampaignStep {
    pub fn offset(&self) -> Duration {
        Duration::hours(self.offset_hours)
    }
}

/// Campaign definition as submitted by an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub segment_filter: String,
    pub steps: Vec<CampaignStep>,
    pub max_emails_per_day: i32,
    #[serde(default)]
    pub min_hours_between_emails: i32,
    #[serde(default)]
    pub respect_business_hours: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_active() -> bool {
    true
}

impl NewCampaign {
    /// Check the definition, normalizing the segment filter
    pub fn validate(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(Error::ParsingError("Campaign name cannot be empty".into()));
        }
        let filter = self.segment_filter.trim();
        self.segment_filter = if filter == "*" {
            filter.to_string()
        } else {
            filter.parse::<Segment>()?.to_string()
        };
        if self.steps.is_empty() {
            return Err(Error::ParsingError(
                "Campaign needs at least one step".into(),
            ));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(Error::ParsingError("Step id cannot be empty".into()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(Error::ParsingError(format!(
                    "Duplicate step id {}",
                    step.id
                )));
            }
            if step.offset_hours < 0 {
                return Err(Error::ParsingError(format!(
                    "Step {} has a negative offset",
                    step.id
                )));
            }
            if step.subject.trim().is_empty() {
                return Err(Error::ParsingError(format!(
                    "Step {} has an empty subject",
                    step.id
                )));
            }
        }
        if self.max_emails_per_day <= 0 {
            return Err(Error::ParsingError(
                "max_emails_per_day must be positive".into(),
            ));
        }
        if self.min_hours_between_emails < 0 {
            return Err(Error::ParsingError(
                "min_hours_between_emails cannot be negative".into(),
            ));
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::ParsingError(format!("{} is not a valid timezone", self.timezone)))?;
        Ok(self)
    }
}

/// Stored campaign record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub segment_filter: String,
    pub steps: Vec<CampaignStep>,
    pub max_emails_per_day: i32,
    pub min_hours_between_emails: i32,
    pub respect_business_hours: bool,
    pub timezone: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn from_definition(id: Uuid, def: NewCampaign, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: def.name,
            segment_filter: def.segment_filter,
            steps: def.steps,
            max_emails_per_day: def.max_emails_per_day,
            min_hours_between_emails: def.min_hours_between_emails,
            respect_business_hours: def.respect_business_hours,
            timezone: def.timezone,
            active: def.active,
            created_at,
            archived_at: None,
        }
    }

    /// Campaign timezone, UTC if the stored name no longer parses
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    pub fn is_live(&self) -> bool {
        self.active && self.archived_at.is_none()
    }

    pub fn matches(&self, segment: &Segment) -> bool {
        segment.matches_filter(&self.segment_filter)
    }

    pub fn first_step(&self) -> Option<&CampaignStep> {
        self.steps.first()
    }

    pub fn step(&self, step_id: &str) -> Option<&CampaignStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Consecutive `(previous, next)` step pairs
    pub fn follow_ups(&self) -> impl Iterator<Item = (&CampaignStep, &CampaignStep)> {
        self.steps.iter().zip(self.steps.iter().skip(1))
    }

    pub fn min_gap(&self) -> Duration {
        Duration::hours(i64::from(self.min_hours_between_emails))
    }
}
