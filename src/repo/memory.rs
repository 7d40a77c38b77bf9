use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tokio::sync::Mutex;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Campaign, NewCampaign, NewProspect, NewQueueItem, NewTrackingEvent, Prospect,
    ProspectStatus, QueueEvent, QueueItem, QueueStatus, TrackingEvent, Transition,
};

use super::{CampaignRepo, ProspectRepo, QueueRepo, Repositories, TrackingEventRepo};

#[derive(Debug, Default)]
struct State {
    prospects: Vec<Prospect>,
    campaigns: Vec<Campaign>,
    queue: Vec<QueueItem>,
    events: Vec<TrackingEvent>,
    /// Prospects whose writes fail, to exercise error paths
    failing: HashSet<Uuid>,
    /// Tracking event appends fail
    failing_events: bool,
}

impl State {
    fn prospect_mut(&mut self, id: Uuid) -> Result<Option<&mut Prospect>> {
        if self.failing.contains(&id) {
            return Err(Error::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        Ok(self.prospects.iter_mut().find(|p| p.id == id))
    }

    fn check_event_writes(&self) -> Result<()> {
        if self.failing_events {
            return Err(Error::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

/// Process-local store implementing every repository trait over one lock
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn repositories(&self) -> Repositories {
        Repositories {
            prospects: Arc::new(self.clone()),
            campaigns: Arc::new(self.clone()),
            queue: Arc::new(self.clone()),
            events: Arc::new(self.clone()),
        }
    }

    /// Make every write touching `prospect_id` fail with a database error
    pub async fn fail_writes_for(&self, prospect_id: Uuid) {
        self.state.lock().await.failing.insert(prospect_id);
    }

    /// Make tracking event appends fail, or succeed again
    pub async fn fail_event_writes(&self, failing: bool) {
        self.state.lock().await.failing_events = failing;
    }

    pub async fn queue_items(&self) -> Vec<QueueItem> {
        self.state.lock().await.queue.clone()
    }

    pub async fn tracking_events(&self) -> Vec<TrackingEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait::async_trait]
impl ProspectRepo for MemoryStore {
    async fn insert(&self, new_prospect: &NewProspect) -> Result<Prospect> {
        let mut state = self.state.lock().await;
        if state
            .prospects
            .iter()
            .any(|p| p.email == new_prospect.email.as_ref())
        {
            return Err(Error::Conflict(
                "Prospect with this email already exists".into(),
            ));
        }
        let prospect = Prospect {
            id: Uuid::new_v4(),
            business_name: new_prospect.business_name.as_ref().to_string(),
            contact_name: new_prospect.contact_name.as_ref().to_string(),
            email: new_prospect.email.as_ref().to_string(),
            segment: new_prospect.segment.as_ref().to_string(),
            status: new_prospect.status,
            initial_outreach_at: None,
            last_contact_at: None,
            created_at: Utc::now(),
        };
        state.prospects.push(prospect.clone());
        Ok(prospect)
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Prospect>> {
        let state = self.state.lock().await;
        Ok(state.prospects.iter().find(|p| p.id == id).cloned())
    }

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Prospect>> {
        let state = self.state.lock().await;
        Ok(state
            .prospects
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn fetch_eligible(&self, limit: i64, only: Option<&[Uuid]>) -> Result<Vec<Prospect>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or_default();
        Ok(state
            .prospects
            .iter()
            .filter(|p| p.is_eligible())
            .filter(|p| only.map_or(true, |ids| ids.contains(&p.id)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_contacted(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.prospect_mut(id)? {
            Some(p) if p.status == ProspectStatus::Qualified => {
                p.status = ProspectStatus::Contacted;
                p.initial_outreach_at.get_or_insert(at);
                p.last_contact_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_last_contact(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.prospect_mut(id)? {
            Some(p) if p.status == ProspectStatus::Contacted => {
                p.last_contact_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn advance_status(
        &self,
        id: Uuid,
        target: ProspectStatus,
    ) -> Result<Option<(Prospect, bool)>> {
        let mut state = self.state.lock().await;
        Ok(state.prospect_mut(id)?.map(|p| {
            let changed = p.status.can_advance_to(target);
            if changed {
                p.status = target;
            }
            (p.clone(), changed)
        }))
    }
}

#[async_trait::async_trait]
impl CampaignRepo for MemoryStore {
    async fn insert(&self, campaign: &NewCampaign) -> Result<Campaign> {
        let campaign = Campaign::from_definition(Uuid::new_v4(), campaign.clone(), Utc::now());
        self.state.lock().await.campaigns.push(campaign.clone());
        Ok(campaign)
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Campaign>> {
        let state = self.state.lock().await;
        Ok(state
            .campaigns
            .iter()
            .find(|c| c.id == id && c.archived_at.is_none())
            .cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<Campaign>> {
        let state = self.state.lock().await;
        Ok(state
            .campaigns
            .iter()
            .filter(|c| c.archived_at.is_none())
            .cloned()
            .collect())
    }

    async fn fetch_active(&self) -> Result<Vec<Campaign>> {
        let state = self.state.lock().await;
        Ok(state.campaigns.iter().filter(|c| c.is_live()).cloned().collect())
    }

    async fn update(&self, id: Uuid, campaign: &NewCampaign) -> Result<Option<Campaign>> {
        let mut state = self.state.lock().await;
        let Some(stored) = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.archived_at.is_none())
        else {
            return Ok(None);
        };
        *stored = Campaign::from_definition(id, campaign.clone(), stored.created_at);
        Ok(Some(stored.clone()))
    }

    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.archived_at.is_none())
        {
            Some(c) => {
                c.active = false;
                c.archived_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl QueueRepo for MemoryStore {
    async fn insert(&self, new_item: &NewQueueItem) -> Result<QueueItem> {
        let mut state = self.state.lock().await;
        if state.failing.contains(&new_item.prospect_id) {
            return Err(Error::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        let duplicate = state.queue.iter().any(|i| {
            i.prospect_id == new_item.prospect_id
                && i.campaign_id == new_item.campaign_id
                && i.step_id == new_item.step_id
        });
        if duplicate {
            return Err(Error::Conflict(
                "Queue item for this step already exists".into(),
            ));
        }
        let item = new_item.clone().into_item(Uuid::new_v4());
        state.queue.push(item.clone());
        Ok(item)
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let state = self.state.lock().await;
        Ok(state.queue.iter().find(|i| i.id == id).cloned())
    }

    async fn fetch_by_pixel_id(&self, pixel_id: &str) -> Result<Option<QueueItem>> {
        let state = self.state.lock().await;
        Ok(state.queue.iter().find(|i| i.pixel_id == pixel_id).cloned())
    }

    async fn count_scheduled_between(
        &self,
        campaign_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .queue
            .iter()
            .filter(|i| i.campaign_id == campaign_id && i.scheduled_at >= from && i.scheduled_at < to)
            .count();
        Ok(count as i64)
    }

    async fn fetch_first_for_prospect(&self, prospect_id: Uuid) -> Result<Option<QueueItem>> {
        let state = self.state.lock().await;
        Ok(state
            .queue
            .iter()
            .filter(|i| i.prospect_id == prospect_id)
            .min_by_key(|i| i.scheduled_at)
            .cloned())
    }

    async fn has_item_for_step(
        &self,
        prospect_id: Uuid,
        campaign_id: Uuid,
        step_id: &str,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.queue.iter().any(|i| {
            i.prospect_id == prospect_id && i.campaign_id == campaign_id && i.step_id == step_id
        }))
    }

    async fn fetch_follow_up_candidates(
        &self,
        campaign_id: Uuid,
        step_id: &str,
        next_step_id: &str,
        sent_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or_default();
        let still_contacted = |prospect_id: Uuid| {
            state
                .prospects
                .iter()
                .any(|p| p.id == prospect_id && p.status == ProspectStatus::Contacted)
        };
        let already_queued = |prospect_id: Uuid| {
            state.queue.iter().any(|i| {
                i.prospect_id == prospect_id
                    && i.campaign_id == campaign_id
                    && i.step_id == next_step_id
            })
        };
        let mut candidates: Vec<_> = state
            .queue
            .iter()
            .filter(|i| i.campaign_id == campaign_id && i.step_id == step_id)
            .filter(|i| {
                matches!(
                    i.status,
                    QueueStatus::Sent | QueueStatus::Opened | QueueStatus::Clicked
                )
            })
            .filter(|i| i.sent_at.map_or(false, |sent| sent <= sent_before))
            .filter(|i| still_contacted(i.prospect_id) && !already_queued(i.prospect_id))
            .cloned()
            .collect();
        candidates.sort_by_key(|i| i.sent_at);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or_default();
        let mut due: Vec<_> = state
            .queue
            .iter()
            .filter(|i| i.status == QueueStatus::Pending && i.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|i| i.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn apply_event(
        &self,
        id: Uuid,
        event: QueueEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<Transition>> {
        let mut state = self.state.lock().await;
        let Some(item) = state.queue.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        let (status_changed, first_occurrence) = item.apply(event, at);
        Ok(Some(Transition {
            item: item.clone(),
            status_changed,
            first_occurrence,
        }))
    }

    async fn record_tracking_event(&self, event: &NewTrackingEvent) -> Result<Option<Transition>> {
        let mut state = self.state.lock().await;
        let Some(index) = state.queue.iter().position(|i| i.id == event.queue_item_id) else {
            return Ok(None);
        };
        let transition = state.queue[index]
            .clone()
            .into_transition(event.event_type.into(), event.occurred_at);

        // Nothing is written unless the event is written too
        if transition.first_occurrence {
            state.check_event_writes()?;
            state.events.push(event.clone().into_event(Uuid::new_v4()));
        }
        state.queue[index] = transition.item.clone();
        Ok(Some(transition))
    }

    async fn register_click_link(&self, id: Uuid, tracking_id: &str, url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let item = state
            .queue
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(Error::NotFound("Queue item"))?;
        item.click_map.insert(tracking_id.to_string(), url.to_string());
        Ok(())
    }

    async fn fetch_for_campaign(
        &self,
        campaign_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        Ok(state
            .queue
            .iter()
            .filter(|i| i.campaign_id == campaign_id)
            .filter(|i| since.map_or(true, |since| i.scheduled_at >= since))
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl TrackingEventRepo for MemoryStore {
    async fn append(&self, event: &NewTrackingEvent) -> Result<TrackingEvent> {
        let mut state = self.state.lock().await;
        state.check_event_writes()?;
        let event = event.clone().into_event(Uuid::new_v4());
        state.events.push(event.clone());
        Ok(event)
    }

    async fn fetch_for_queue_item(&self, queue_item_id: Uuid) -> Result<Vec<TrackingEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.queue_item_id == queue_item_id)
            .cloned()
            .collect())
    }

    async fn fetch_for_campaign(
        &self,
        campaign_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TrackingEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .filter(|e| since.map_or(true, |since| e.occurred_at >= since))
            .cloned()
            .collect())
    }
}
