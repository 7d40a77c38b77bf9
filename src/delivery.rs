//! Delivery worker: drains due `pending` queue items, renders and sends them
//! through the email provider, then marks each item `sent` or `failed`.
//! Failed items are not retried.

use std::sync::Arc;

use serde::Serialize;

use tokio::time::MissedTickBehavior;

use crate::client::{Email, EmailClient};
use crate::clock::Clock;
use crate::crypto::SigningKey;
use crate::domain::EmailAddress;
use crate::error::{Error, Result};
use crate::job::RunFlag;
use crate::model::{Prospect, ProspectStatus, QueueEvent, QueueItem};
use crate::repo::Repositories;

mod render;

pub use render::{render, RenderedEmail, TrackingUrls};

/// Counters for a finished delivery pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
}

#[derive(Debug)]
enum Delivery {
    Sent,
    Failed,
    Skipped(&'static str),
}

pub struct DeliveryWorker {
    repos: Repositories,
    email_client: Arc<EmailClient>,
    signing_key: SigningKey,
    urls: TrackingUrls,
    clock: Arc<dyn Clock>,
    batch_size: i64,
    running: RunFlag,
}

impl DeliveryWorker {
    pub fn new(
        repos: Repositories,
        email_client: Arc<EmailClient>,
        signing_key: SigningKey,
        urls: TrackingUrls,
        clock: Arc<dyn Clock>,
        batch_size: i64,
    ) -> Self {
        Self {
            repos,
            email_client,
            signing_key,
            urls,
            clock,
            batch_size,
            running: RunFlag::default(),
        }
    }

    /// Deliver one batch unless another pass is in flight
    pub async fn try_run_pass(&self) -> Result<Option<DeliveryReport>> {
        let Some(_guard) = self.running.try_acquire() else {
            tracing::info!("Delivery pass already running, skipping");
            return Ok(None);
        };
        self.run_pass().await.map(Some)
    }

    pub async fn run_until_stopped(self: Arc<Self>, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.try_run_pass().await {
                Ok(Some(report)) if report != DeliveryReport::default() => {
                    tracing::info!(?report, "Delivery pass finished")
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(error.cause_chain = ?error, "Delivery pass failed")
                }
            }
        }
    }

    #[tracing::instrument(name = "Delivery pass", skip(self))]
    async fn run_pass(&self) -> Result<DeliveryReport> {
        let now = self.clock.now();
        let due = self.repos.queue.fetch_due(now, self.batch_size).await?;

        let mut report = DeliveryReport::default();
        for item in &due {
            match self.deliver(item).await {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Failed) => report.failed += 1,
                Ok(Delivery::Skipped(reason)) => {
                    tracing::info!(queue_item_id = %item.id, reason, "Skipped queue item");
                    report.skipped += 1;
                }
                Err(error) => {
                    tracing::error!(
                        error.cause_chain = ?error,
                        queue_item_id = %item.id,
                        "Failed to deliver queue item"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    #[tracing::instrument(name = "Deliver queue item", skip(self, item), fields(queue_item_id = %item.id))]
    async fn deliver(&self, item: &QueueItem) -> Result<Delivery> {
        let claimed = self
            .repos
            .queue
            .apply_event(item.id, QueueEvent::Sending, self.clock.now())
            .await?;
        let item = match claimed {
            Some(transition) if transition.status_changed => transition.item,
            _ => return Ok(Delivery::Skipped("claimed elsewhere")),
        };

        match self.send_claimed(&item).await {
            Ok(Delivery::Sent) => {
                self.repos
                    .queue
                    .apply_event(item.id, QueueEvent::Sent, self.clock.now())
                    .await?;
                tracing::info!(step_id = %item.step_id, "Sent outreach email");
                Ok(Delivery::Sent)
            }
            Ok(other) => Ok(other),
            Err(error) => {
                tracing::warn!(error.cause_chain = ?error, "Marking queue item failed");
                self.repos
                    .queue
                    .apply_event(item.id, QueueEvent::Failed, self.clock.now())
                    .await?;
                Ok(Delivery::Failed)
            }
        }
    }

    /// Send an item already claimed as `sending`
    async fn send_claimed(&self, item: &QueueItem) -> Result<Delivery> {
        let prospect = self
            .repos
            .prospects
            .fetch_by_id(item.prospect_id)
            .await?
            .ok_or(Error::NotFound("Prospect"))?;
        if prospect.status == ProspectStatus::Unsubscribed {
            self.repos
                .queue
                .apply_event(item.id, QueueEvent::Unsubscribed, self.clock.now())
                .await?;
            return Ok(Delivery::Skipped("prospect unsubscribed"));
        }
        if prospect.status == ProspectStatus::Registered {
            // Release the claim so the item does not sit in `sending`
            self.repos
                .queue
                .apply_event(item.id, QueueEvent::Failed, self.clock.now())
                .await?;
            return Ok(Delivery::Skipped("prospect registered"));
        }

        let email = self.compose(item, &prospect).await?;
        self.email_client.send(&email).await?;
        Ok(Delivery::Sent)
    }

    async fn compose(&self, item: &QueueItem, prospect: &Prospect) -> Result<Email> {
        let campaign = self
            .repos
            .campaigns
            .fetch_by_id(item.campaign_id)
            .await?
            .ok_or(Error::NotFound("Campaign"))?;
        let step = campaign
            .step(&item.step_id)
            .ok_or(Error::NotFound("Campaign step"))?;

        let rendered = render(step, prospect, item, &self.urls, &self.signing_key)?;
        for (tracking_id, url) in &rendered.links {
            self.repos
                .queue
                .register_click_link(item.id, tracking_id, url)
                .await?;
        }

        Ok(Email {
            recipient: prospect.email.parse::<EmailAddress>()?,
            subject: rendered.subject,
            html_body: rendered.html_body,
            text_body: rendered.text_body,
            tag: Some(step.template.clone()),
        })
    }
}
