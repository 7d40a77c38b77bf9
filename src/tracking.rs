//! Engagement tracking: open pixels, click redirects and unsubscribe links.
//!
//! Callers are untrusted and retry freely (image prefetchers, link scanners),
//! so every operation is idempotent per queue item and never fails outward.
//! Errors are logged and the caller still gets its pixel, redirect or page.

use std::sync::Arc;

use url::Url;

use crate::clock::Clock;
use crate::crypto::pixel_id_of;
use crate::domain::ClientMetadata;
use crate::error::Result;
use crate::model::{NewTrackingEvent, ProspectStatus, QueueItem, TrackingEventType, Transition};
use crate::repo::Repositories;

/// Result of an unsubscribe request, as shown to the recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Confirmed,
    UnknownLink,
    /// Storage failed; the recipient should try again later
    Unavailable,
}

pub struct TrackingIngestor {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    fallback_url: Url,
}

impl TrackingIngestor {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>, fallback_url: Url) -> Self {
        Self {
            repos,
            clock,
            fallback_url,
        }
    }

    #[tracing::instrument(name = "Record open", skip(self, metadata))]
    pub async fn record_open(&self, pixel_id: &str, metadata: ClientMetadata) {
        if let Err(error) = self.try_record_open(pixel_id, metadata).await {
            tracing::warn!(error.cause_chain = ?error, "Failed to record open");
        }
    }

    /// Record a click and pick the redirect target: the requested URL, else
    /// the URL registered for the tracking id, else the fallback
    #[tracing::instrument(name = "Record click", skip(self, metadata))]
    pub async fn record_click(
        &self,
        tracking_id: &str,
        requested_url: Option<&str>,
        metadata: ClientMetadata,
    ) -> String {
        let requested = requested_url.and_then(parse_web_url);
        let mapped = match self
            .try_record_click(tracking_id, requested.as_ref(), metadata)
            .await
        {
            Ok(mapped) => mapped,
            Err(error) => {
                tracing::warn!(error.cause_chain = ?error, "Failed to record click");
                None
            }
        };

        requested
            .map(String::from)
            .or(mapped)
            .unwrap_or_else(|| self.fallback_url.to_string())
    }

    #[tracing::instrument(name = "Unsubscribe", skip(self, metadata))]
    pub async fn unsubscribe(&self, pixel_id: &str, metadata: ClientMetadata) -> UnsubscribeOutcome {
        match self.try_unsubscribe(pixel_id, metadata).await {
            Ok(true) => UnsubscribeOutcome::Confirmed,
            Ok(false) => UnsubscribeOutcome::UnknownLink,
            Err(error) => {
                tracing::warn!(error.cause_chain = ?error, "Failed to process unsubscribe");
                UnsubscribeOutcome::Unavailable
            }
        }
    }

    async fn try_record_open(&self, pixel_id: &str, metadata: ClientMetadata) -> Result<()> {
        let Some(item) = self.repos.queue.fetch_by_pixel_id(pixel_id).await? else {
            tracing::debug!("Unknown pixel id");
            return Ok(());
        };
        self.apply(&item, TrackingEventType::Opened, metadata, None)
            .await?;
        Ok(())
    }

    /// The destination registered for `tracking_id`, if any
    async fn try_record_click(
        &self,
        tracking_id: &str,
        requested: Option<&Url>,
        metadata: ClientMetadata,
    ) -> Result<Option<String>> {
        let Some(pixel_id) = pixel_id_of(tracking_id) else {
            tracing::debug!("Malformed tracking id");
            return Ok(None);
        };
        let Some(item) = self.repos.queue.fetch_by_pixel_id(pixel_id).await? else {
            tracing::debug!("Unknown pixel id");
            return Ok(None);
        };
        let Some(mapped) = item.click_destination(tracking_id).map(String::from) else {
            tracing::debug!("Tracking id not registered for this email");
            return Ok(None);
        };

        let agrees = requested.map_or(true, |url| same_destination(url, &mapped));
        if !agrees {
            tracing::debug!("Requested URL disagrees with the registered link");
            return Ok(Some(mapped));
        }

        // A storage failure still redirects to the registered link
        if let Err(error) = self
            .apply(&item, TrackingEventType::Clicked, metadata, Some(mapped.clone()))
            .await
        {
            tracing::warn!(error.cause_chain = ?error, "Failed to record click");
        }
        Ok(Some(mapped))
    }

    /// `false` when the pixel id is unknown
    async fn try_unsubscribe(&self, pixel_id: &str, metadata: ClientMetadata) -> Result<bool> {
        let Some(item) = self.repos.queue.fetch_by_pixel_id(pixel_id).await? else {
            return Ok(false);
        };
        self.apply(&item, TrackingEventType::Unsubscribed, metadata, None)
            .await?;

        // Cascade regardless of the item's state; the prospect may have
        // come back through another campaign
        if let Some((_, true)) = self
            .repos
            .prospects
            .advance_status(item.prospect_id, ProspectStatus::Unsubscribed)
            .await?
        {
            tracing::info!(prospect_id = %item.prospect_id, "Prospect unsubscribed");
        }
        Ok(true)
    }

    /// Advance the item and append an event on first occurrence only
    async fn apply(
        &self,
        item: &QueueItem,
        event_type: TrackingEventType,
        metadata: ClientMetadata,
        url: Option<String>,
    ) -> Result<Option<Transition>> {
        let transition = self
            .repos
            .queue
            .record_tracking_event(&NewTrackingEvent {
                queue_item_id: item.id,
                prospect_id: item.prospect_id,
                campaign_id: item.campaign_id,
                event_type,
                metadata,
                url,
                occurred_at: self.clock.now(),
            })
            .await?;

        if matches!(&transition, Some(t) if t.first_occurrence) {
            tracing::info!(queue_item_id = %item.id, %event_type, "Recorded tracking event");
        }
        Ok(transition)
    }
}

/// Only absolute http(s) URLs are acceptable redirect targets
fn parse_web_url(value: &str) -> Option<Url> {
    Url::parse(value)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn same_destination(requested: &Url, mapped: &str) -> bool {
    Url::parse(mapped).map_or(false, |mapped| &mapped == requested)
}
