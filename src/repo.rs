//! Repository traits for the four stores the outreach engine works against,
//! with a Postgres implementation for production and an in-memory one for
//! tests and local runs.
//!
//! Every queue transition goes through [`QueueRepo::apply_event`], which must
//! read, advance and write a single row atomically. That per-row conditional
//! update is what makes concurrent duplicate tracking requests safe.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use sqlx::PgPool;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Campaign, NewCampaign, NewProspect, NewQueueItem, NewTrackingEvent, Prospect,
    ProspectStatus, QueueEvent, QueueItem, TrackingEvent, Transition,
};

mod campaigns;
mod events;
pub mod memory;
mod prospects;
mod queue;

pub use campaigns::PgCampaignRepo;
pub use events::PgTrackingEventRepo;
pub use prospects::PgProspectRepo;
pub use queue::PgQueueRepo;

/// Prospect store
#[async_trait::async_trait]
pub trait ProspectRepo: Send + Sync {
    async fn insert(&self, new_prospect: &NewProspect) -> Result<Prospect>;

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Prospect>>;

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Prospect>>;

    /// Prospects `qualified` with no initial outreach, oldest first. `only`
    /// restricts the selection to an explicit subset.
    ///
    /// Prospects whose queue item was written without the matching
    /// `mark_contacted` are included so the scheduler can repair them.
    async fn fetch_eligible(&self, limit: i64, only: Option<&[Uuid]>) -> Result<Vec<Prospect>>;

    /// `qualified → contacted`, setting initial outreach and last contact.
    /// Returns `false` if the prospect was not `qualified`.
    async fn mark_contacted(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Record a follow-up contact on a `contacted` prospect
    async fn touch_last_contact(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Move forward to `target`. `None` if the prospect does not exist,
    /// otherwise the stored record and whether it changed.
    async fn advance_status(
        &self,
        id: Uuid,
        target: ProspectStatus,
    ) -> Result<Option<(Prospect, bool)>>;
}

/// Campaign registry
#[async_trait::async_trait]
pub trait CampaignRepo: Send + Sync {
    async fn insert(&self, campaign: &NewCampaign) -> Result<Campaign>;

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Campaign>>;

    /// All non-archived campaigns, oldest first
    async fn fetch_all(&self) -> Result<Vec<Campaign>>;

    /// Active, non-archived campaigns, oldest first
    async fn fetch_active(&self) -> Result<Vec<Campaign>>;

    async fn update(&self, id: Uuid, campaign: &NewCampaign) -> Result<Option<Campaign>>;

    /// Deactivate and hide a campaign. Queue history stays intact.
    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

/// Delivery queue
#[async_trait::async_trait]
pub trait QueueRepo: Send + Sync {
    async fn insert(&self, new_item: &NewQueueItem) -> Result<QueueItem>;

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<QueueItem>>;

    async fn fetch_by_pixel_id(&self, pixel_id: &str) -> Result<Option<QueueItem>>;

    /// Items of a campaign with `scheduled_at` in `[from, to)`
    async fn count_scheduled_between(
        &self,
        campaign_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    /// Earliest scheduled item for a prospect in any campaign
    async fn fetch_first_for_prospect(&self, prospect_id: Uuid) -> Result<Option<QueueItem>>;

    async fn has_item_for_step(
        &self,
        prospect_id: Uuid,
        campaign_id: Uuid,
        step_id: &str,
    ) -> Result<bool>;

    /// Delivered items of `step_id` sent at or before `sent_before` whose
    /// prospect is still `contacted` and has nothing queued for `next_step_id`
    async fn fetch_follow_up_candidates(
        &self,
        campaign_id: Uuid,
        step_id: &str,
        next_step_id: &str,
        sent_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueItem>>;

    /// `pending` items due at `now`, earliest first
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>>;

    /// Atomically apply an event. `None` if the item does not exist.
    async fn apply_event(
        &self,
        id: Uuid,
        event: QueueEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<Transition>>;

    /// Apply the queue event matching a tracking event and, on its first
    /// occurrence, append the tracking event in the same atomic step.
    /// `None` if the item does not exist.
    async fn record_tracking_event(&self, event: &NewTrackingEvent) -> Result<Option<Transition>>;

    async fn register_click_link(&self, id: Uuid, tracking_id: &str, url: &str) -> Result<()>;

    /// Items of a campaign scheduled at or after `since`
    async fn fetch_for_campaign(
        &self,
        campaign_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<QueueItem>>;
}

/// Append-only engagement log
#[async_trait::async_trait]
pub trait TrackingEventRepo: Send + Sync {
    async fn append(&self, event: &NewTrackingEvent) -> Result<TrackingEvent>;

    async fn fetch_for_queue_item(&self, queue_item_id: Uuid) -> Result<Vec<TrackingEvent>>;

    async fn fetch_for_campaign(
        &self,
        campaign_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TrackingEvent>>;
}

/// Map unique-constraint violations to [`Error::Conflict`]
fn unique_violation(what: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            Error::Conflict(format!("{} already exists", what))
        }
        other => other.into(),
    }
}

/// Handles to every store, shared by the services
#[derive(Clone)]
pub struct Repositories {
    pub prospects: Arc<dyn ProspectRepo>,
    pub campaigns: Arc<dyn CampaignRepo>,
    pub queue: Arc<dyn QueueRepo>,
    pub events: Arc<dyn TrackingEventRepo>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            prospects: Arc::new(PgProspectRepo::new(pool.clone())),
            campaigns: Arc::new(PgCampaignRepo::new(pool.clone())),
            queue: Arc::new(PgQueueRepo::new(pool.clone())),
            events: Arc::new(PgTrackingEventRepo::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        memory::MemoryStore::default().repositories()
    }
}
