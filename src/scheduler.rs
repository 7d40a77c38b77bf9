//! Outreach scheduler: turns eligible prospects into `pending` queue items,
//! honoring per-campaign daily caps, minimum gaps between emails and
//! business-hour windows, and enqueues follow-up steps once their offset has
//! elapsed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use serde::Serialize;

use tokio::time::MissedTickBehavior;

use uuid::Uuid;

use crate::clock::{Clock, JitterSource};
use crate::error::{Error, Result};
use crate::job::RunFlag;
use crate::model::{Campaign, CampaignStep, NewQueueItem, Prospect, ProspectStatus, QueueItem};
use crate::repo::Repositories;

mod window;

pub use window::{day_bounds, plan_send_time, BusinessHours};

/// Tunables for scheduling passes
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: i64,
    pub max_jitter: Duration,
    pub business_hours: BusinessHours,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_jitter: Duration::minutes(60),
            business_hours: BusinessHours::default(),
        }
    }
}

/// Which prospects a pass considers
#[derive(Debug, Clone, PartialEq)]
pub enum PassScope {
    /// Every active campaign
    All,
    /// One campaign, optionally restricted to specific prospects
    Campaign {
        campaign_id: Uuid,
        prospect_ids: Option<Vec<Uuid>>,
    },
}

/// Counters for a finished pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub scheduled: u32,
    pub follow_ups: u32,
    pub deferred: u32,
    pub skipped: u32,
    pub failed: u32,
}

#[derive(Debug)]
enum Outcome {
    Scheduled(QueueItem),
    Deferred(&'static str),
    Skipped(&'static str),
}

pub struct Scheduler {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    config: SchedulerConfig,
    running: RunFlag,
}

impl Scheduler {
    pub fn new(
        repos: Repositories,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repos,
            clock,
            jitter,
            config,
            running: RunFlag::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Run one pass unless another is in flight, in which case `None`
    pub async fn try_run_pass(&self, scope: PassScope) -> Result<Option<PassReport>> {
        let Some(_guard) = self.running.try_acquire() else {
            tracing::info!("Scheduling pass already running, skipping");
            return Ok(None);
        };
        self.run_pass(scope).await.map(Some)
    }

    /// Run passes on a fixed period until the task is dropped
    pub async fn run_until_stopped(self: Arc<Self>, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.try_run_pass(PassScope::All).await {
                Ok(Some(report)) => tracing::info!(?report, "Scheduling pass finished"),
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(error.cause_chain = ?error, "Scheduling pass failed")
                }
            }
        }
    }

    #[tracing::instrument(name = "Scheduling pass", skip(self))]
    async fn run_pass(&self, scope: PassScope) -> Result<PassReport> {
        let now = self.clock.now();
        let (campaigns, only) = match &scope {
            PassScope::All => (self.repos.campaigns.fetch_active().await?, None),
            PassScope::Campaign {
                campaign_id,
                prospect_ids,
            } => {
                let campaign = self
                    .repos
                    .campaigns
                    .fetch_by_id(*campaign_id)
                    .await?
                    .ok_or(Error::NotFound("Campaign"))?;
                if !campaign.is_live() {
                    return Err(Error::Conflict("Campaign is not active".into()));
                }
                (vec![campaign], prospect_ids.as_deref())
            }
        };

        let mut report = PassReport::default();

        let prospects = self
            .repos
            .prospects
            .fetch_eligible(self.config.batch_size, only)
            .await?;
        for prospect in &prospects {
            match self.schedule_initial(prospect, &campaigns, now).await {
                Ok(Outcome::Scheduled(item)) => {
                    tracing::info!(
                        prospect_id = %prospect.id,
                        queue_item_id = %item.id,
                        scheduled_at = %item.scheduled_at,
                        "Scheduled initial outreach"
                    );
                    report.scheduled += 1;
                }
                Ok(Outcome::Deferred(reason)) => {
                    tracing::info!(prospect_id = %prospect.id, reason, "Deferred prospect");
                    report.deferred += 1;
                }
                Ok(Outcome::Skipped(reason)) => {
                    tracing::info!(prospect_id = %prospect.id, reason, "Skipped prospect");
                    report.skipped += 1;
                }
                Err(error) => {
                    tracing::error!(
                        error.cause_chain = ?error,
                        prospect_id = %prospect.id,
                        "Failed to schedule prospect"
                    );
                    report.failed += 1;
                }
            }
        }

        let remaining = self.config.batch_size - i64::from(report.scheduled);
        self.schedule_follow_ups(&campaigns, only, remaining, now, &mut report)
            .await;

        Ok(report)
    }

    async fn schedule_initial(
        &self,
        prospect: &Prospect,
        campaigns: &[Campaign],
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        if let Some(existing) = self
            .repos
            .queue
            .fetch_first_for_prospect(prospect.id)
            .await?
        {
            // A previous pass wrote the item but not the prospect
            self.repos
                .prospects
                .mark_contacted(prospect.id, existing.scheduled_at)
                .await?;
            return Ok(Outcome::Skipped("already queued"));
        }

        let segment = prospect.segment()?;
        let Some((campaign, step)) = campaigns
            .iter()
            .filter(|c| c.matches(&segment))
            .find_map(|c| c.first_step().map(|step| (c, step)))
        else {
            return Ok(Outcome::Skipped("no campaign for segment"));
        };

        let scheduled_at = self.plan(campaign, now);
        if let Some(reason) = self
            .rate_limit(campaign, prospect.last_contact_at, scheduled_at)
            .await?
        {
            return Ok(Outcome::Deferred(reason));
        }

        let item = self
            .repos
            .queue
            .insert(&NewQueueItem::new(
                prospect.id,
                campaign.id,
                &step.id,
                scheduled_at,
            ))
            .await?;
        if !self
            .repos
            .prospects
            .mark_contacted(prospect.id, scheduled_at)
            .await?
        {
            tracing::warn!(prospect_id = %prospect.id, "Prospect left qualified before it was marked contacted");
        }
        Ok(Outcome::Scheduled(item))
    }

    async fn schedule_follow_ups(
        &self,
        campaigns: &[Campaign],
        only: Option<&[Uuid]>,
        mut remaining: i64,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) {
        for campaign in campaigns {
            for (previous, next) in campaign.follow_ups() {
                if remaining <= 0 {
                    return;
                }
                let candidates = match self
                    .repos
                    .queue
                    .fetch_follow_up_candidates(
                        campaign.id,
                        &previous.id,
                        &next.id,
                        now - next.offset(),
                        remaining,
                    )
                    .await
                {
                    Ok(candidates) => candidates,
                    Err(error) => {
                        tracing::error!(
                            error.cause_chain = ?error,
                            campaign_id = %campaign.id,
                            step_id = %next.id,
                            "Failed to fetch follow-up candidates"
                        );
                        report.failed += 1;
                        continue;
                    }
                };

                for item in candidates
                    .iter()
                    .filter(|i| only.map_or(true, |ids| ids.contains(&i.prospect_id)))
                {
                    match self.schedule_follow_up(campaign, next, item, now).await {
                        Ok(Outcome::Scheduled(_)) => {
                            report.follow_ups += 1;
                            remaining -= 1;
                        }
                        Ok(Outcome::Deferred(_)) => report.deferred += 1,
                        Ok(Outcome::Skipped(_)) => report.skipped += 1,
                        Err(error) => {
                            tracing::error!(
                                error.cause_chain = ?error,
                                prospect_id = %item.prospect_id,
                                step_id = %next.id,
                                "Failed to schedule follow-up"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }
    }

    async fn schedule_follow_up(
        &self,
        campaign: &Campaign,
        step: &CampaignStep,
        previous: &QueueItem,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let Some(prospect) = self.repos.prospects.fetch_by_id(previous.prospect_id).await? else {
            return Ok(Outcome::Skipped("prospect missing"));
        };
        if prospect.status != ProspectStatus::Contacted {
            return Ok(Outcome::Skipped("prospect no longer contacted"));
        }
        if self
            .repos
            .queue
            .has_item_for_step(prospect.id, campaign.id, &step.id)
            .await?
        {
            return Ok(Outcome::Skipped("already queued"));
        }

        let scheduled_at = self.plan(campaign, now);
        if let Some(reason) = self
            .rate_limit(campaign, prospect.last_contact_at, scheduled_at)
            .await?
        {
            return Ok(Outcome::Deferred(reason));
        }

        let item = self
            .repos
            .queue
            .insert(&NewQueueItem::new(
                prospect.id,
                campaign.id,
                &step.id,
                scheduled_at,
            ))
            .await?;
        self.repos
            .prospects
            .touch_last_contact(prospect.id, scheduled_at)
            .await?;
        tracing::info!(
            prospect_id = %prospect.id,
            queue_item_id = %item.id,
            step_id = %step.id,
            "Scheduled follow-up"
        );
        Ok(Outcome::Scheduled(item))
    }

    fn plan(&self, campaign: &Campaign, now: DateTime<Utc>) -> DateTime<Utc> {
        let hours = campaign
            .respect_business_hours
            .then(|| (self.config.business_hours, campaign.tz()));
        plan_send_time(now, self.jitter.as_ref(), self.config.max_jitter, hours)
    }

    /// Reason to defer, if sending at `scheduled_at` would break a limit
    async fn rate_limit(
        &self,
        campaign: &Campaign,
        last_contact_at: Option<DateTime<Utc>>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Option<&'static str>> {
        if let Some(last_contact_at) = last_contact_at {
            if scheduled_at - last_contact_at < campaign.min_gap() {
                return Ok(Some("min hours between emails"));
            }
        }

        let (day_start, day_end) = day_bounds(scheduled_at, campaign.tz());
        let scheduled_that_day = self
            .repos
            .queue
            .count_scheduled_between(campaign.id, day_start, day_end)
            .await?;
        if scheduled_that_day >= i64::from(campaign.max_emails_per_day) {
            return Ok(Some("daily limit reached"));
        }
        Ok(None)
    }
}
