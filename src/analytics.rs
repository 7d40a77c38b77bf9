//! Read-only campaign analytics derived from the delivery queue and the
//! tracking event log.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use serde::Serialize;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ProspectStatus, QueueItem, TrackingEvent};
use crate::repo::Repositories;

/// Reporting window ending now
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatsPeriod {
    #[serde(rename = "1d")]
    Day,
    #[default]
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "all")]
    All,
}

impl StatsPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "1d",
            Self::Week => "7d",
            Self::Month => "30d",
            Self::All => "all",
        }
    }

    /// Start of the window, `None` for all time
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Day => Some(now - Duration::days(1)),
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => Some(now - Duration::days(30)),
            Self::All => None,
        }
    }
}

impl FromStr for StatsPeriod {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "1d" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => Err(Error::ParsingError(format!(
                "Invalid period '{}', expected one of 1d, 7d, 30d, all",
                other
            ))),
        }
    }
}

impl fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Counts {
    pub total_queued: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub unsubscribed: u64,
    pub registered: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Rates {
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub unsubscribe_rate: f64,
    pub conversion_rate: f64,
}

/// Group counts of tracking events
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub by_event_type: BTreeMap<String, u64>,
    pub by_device: BTreeMap<String, u64>,
    pub by_client: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub period: StatsPeriod,
    #[serde(flatten)]
    pub counts: Counts,
    pub rates: Rates,
    pub breakdown: Breakdown,
}

/// `numerator / denominator`, or 0 when nothing was sent
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl From<&Counts> for Rates {
    fn from(c: &Counts) -> Self {
        Self {
            delivery_rate: ratio(c.sent, c.total_queued),
            open_rate: ratio(c.opened, c.sent),
            click_rate: ratio(c.clicked, c.sent),
            unsubscribe_rate: ratio(c.unsubscribed, c.sent),
            conversion_rate: ratio(c.registered, c.sent),
        }
    }
}

/// Counts over queue items. `registered` holds the recipients whose
/// prospect is now `registered`.
pub fn count(items: &[QueueItem], registered: &HashSet<Uuid>) -> Counts {
    let count_where = |f: fn(&QueueItem) -> bool| items.iter().filter(|i| f(i)).count() as u64;
    let converted: BTreeSet<Uuid> = items
        .iter()
        .filter(|i| i.sent_at.is_some() && registered.contains(&i.prospect_id))
        .map(|i| i.prospect_id)
        .collect();

    Counts {
        total_queued: items.len() as u64,
        sent: count_where(|i| i.sent_at.is_some()),
        opened: count_where(|i| i.opened_at.is_some()),
        clicked: count_where(|i| i.clicked_at.is_some()),
        unsubscribed: count_where(|i| i.unsubscribed_at.is_some()),
        registered: converted.len() as u64,
    }
}

pub fn breakdown(events: &[TrackingEvent]) -> Breakdown {
    let mut breakdown = Breakdown::default();
    for event in events {
        *breakdown
            .by_event_type
            .entry(event.event_type.as_str().to_string())
            .or_default() += 1;
        *breakdown
            .by_device
            .entry(event.metadata.device.as_str().to_string())
            .or_default() += 1;
        *breakdown
            .by_client
            .entry(event.metadata.client.as_str().to_string())
            .or_default() += 1;
    }
    breakdown
}

/// Stats for one campaign over items scheduled, and events seen, in the window
#[tracing::instrument(name = "Compute campaign stats", skip(repos))]
pub async fn campaign_stats(
    repos: &Repositories,
    campaign_id: Uuid,
    period: StatsPeriod,
    now: DateTime<Utc>,
) -> Result<CampaignStats> {
    repos
        .campaigns
        .fetch_by_id(campaign_id)
        .await?
        .ok_or(Error::NotFound("Campaign"))?;

    let since = period.since(now);
    let items = repos.queue.fetch_for_campaign(campaign_id, since).await?;
    let events = repos.events.fetch_for_campaign(campaign_id, since).await?;

    let recipients: BTreeSet<Uuid> = items
        .iter()
        .filter(|i| i.sent_at.is_some())
        .map(|i| i.prospect_id)
        .collect();
    let recipients: Vec<Uuid> = recipients.into_iter().collect();
    let registered: HashSet<Uuid> = repos
        .prospects
        .fetch_by_ids(&recipients)
        .await?
        .into_iter()
        .filter(|p| p.status == ProspectStatus::Registered)
        .map(|p| p.id)
        .collect();

    let counts = count(&items, &registered);
    Ok(CampaignStats {
        campaign_id,
        period,
        rates: Rates::from(&counts),
        counts,
        breakdown: breakdown(&events),
    })
}
