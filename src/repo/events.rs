use chrono::{DateTime, Utc};

use sqlx::{PgExecutor, PgPool};

use uuid::Uuid;

use crate::domain::{ClientFamily, ClientMetadata, DeviceClass};
use crate::error::{Error, Result};
use crate::model::{NewTrackingEvent, TrackingEvent};

use super::TrackingEventRepo;

const EVENT_COLUMNS: &str = "id, queue_item_id, prospect_id, campaign_id, event_type, \
     user_agent, ip_address, device, client, url, occurred_at";

#[derive(Debug, sqlx::FromRow)]
struct TrackingEventRow {
    id: Uuid,
    queue_item_id: Uuid,
    prospect_id: Uuid,
    campaign_id: Uuid,
    event_type: String,
    user_agent: Option<String>,
    ip_address: Option<String>,
    device: String,
    client: String,
    url: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<TrackingEventRow> for TrackingEvent {
    type Error = Error;

    fn try_from(row: TrackingEventRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            queue_item_id: row.queue_item_id,
            prospect_id: row.prospect_id,
            campaign_id: row.campaign_id,
            event_type: row.event_type.parse()?,
            metadata: ClientMetadata {
                user_agent: row.user_agent,
                ip_address: row.ip_address,
                device: DeviceClass::parse(&row.device),
                client: ClientFamily::parse(&row.client),
            },
            url: row.url,
            occurred_at: row.occurred_at,
        })
    }
}

/// Insert one event row, inside a caller's transaction when given one
pub(super) async fn insert_event<'con>(
    executor: impl PgExecutor<'con>,
    event: &NewTrackingEvent,
) -> Result<TrackingEvent> {
    let row = sqlx::query_as::<_, TrackingEventRow>(&format!(
        "insert into tracking_events(id, queue_item_id, prospect_id, campaign_id, event_type, \
             user_agent, ip_address, device, client, url, occurred_at) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) returning {}",
        EVENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(event.queue_item_id)
    .bind(event.prospect_id)
    .bind(event.campaign_id)
    .bind(event.event_type.as_str())
    .bind(&event.metadata.user_agent)
    .bind(&event.metadata.ip_address)
    .bind(event.metadata.device.as_str())
    .bind(event.metadata.client.as_str())
    .bind(&event.url)
    .bind(event.occurred_at)
    .fetch_one(executor)
    .await?;

    row.try_into()
}

/// Postgres tracking event log
#[derive(Debug, Clone)]
pub struct PgTrackingEventRepo {
    pool: PgPool,
}

impl PgTrackingEventRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TrackingEventRepo for PgTrackingEventRepo {
    #[tracing::instrument(name = "Append tracking event", skip(self))]
    async fn append(&self, event: &NewTrackingEvent) -> Result<TrackingEvent> {
        insert_event(&self.pool, event).await
    }

    #[tracing::instrument(name = "Fetch tracking events for queue item", skip(self))]
    async fn fetch_for_queue_item(&self, queue_item_id: Uuid) -> Result<Vec<TrackingEvent>> {
        sqlx::query_as::<_, TrackingEventRow>(&format!(
            "select {} from tracking_events where queue_item_id = $1 order by occurred_at asc",
            EVENT_COLUMNS
        ))
        .bind(queue_item_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TrackingEvent::try_from)
        .collect()
    }

    #[tracing::instrument(name = "Fetch tracking events for campaign", skip(self))]
    async fn fetch_for_campaign(
        &self,
        campaign_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TrackingEvent>> {
        sqlx::query_as::<_, TrackingEventRow>(&format!(
            "select {} from tracking_events \
             where campaign_id = $1 and ($2::timestamptz is null or occurred_at >= $2)",
            EVENT_COLUMNS
        ))
        .bind(campaign_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TrackingEvent::try_from)
        .collect()
    }
}
