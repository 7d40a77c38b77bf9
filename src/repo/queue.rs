use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{NewQueueItem, NewTrackingEvent, QueueEvent, QueueItem, Transition};

use super::events::insert_event;
use super::{unique_violation, QueueRepo};

const QUEUE_COLUMNS: &str = "id, prospect_id, campaign_id, step_id, scheduled_at, status, \
     sent_at, opened_at, clicked_at, unsubscribed_at, pixel_id, click_map";

#[derive(Debug, sqlx::FromRow)]
struct QueueItemRow {
    id: Uuid,
    prospect_id: Uuid,
    campaign_id: Uuid,
    step_id: String,
    scheduled_at: DateTime<Utc>,
    status: String,
    sent_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    unsubscribed_at: Option<DateTime<Utc>>,
    pixel_id: String,
    click_map: Json<BTreeMap<String, String>>,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = Error;

    fn try_from(row: QueueItemRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            prospect_id: row.prospect_id,
            campaign_id: row.campaign_id,
            step_id: row.step_id,
            scheduled_at: row.scheduled_at,
            status: row.status.parse()?,
            sent_at: row.sent_at,
            opened_at: row.opened_at,
            clicked_at: row.clicked_at,
            unsubscribed_at: row.unsubscribed_at,
            pixel_id: row.pixel_id,
            click_map: row.click_map.0,
        })
    }
}

fn into_items(rows: Vec<QueueItemRow>) -> Result<Vec<QueueItem>> {
    rows.into_iter().map(QueueItem::try_from).collect()
}

/// Lock one row, advance it and write back any change, within `tx`
async fn apply_locked(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    event: QueueEvent,
    at: DateTime<Utc>,
) -> Result<Option<Transition>> {
    // Row lock serializes concurrent events for the same item
    let Some(row) = sqlx::query_as::<_, QueueItemRow>(&format!(
        "select {} from queue_items where id=$1 for update",
        QUEUE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    else {
        return Ok(None);
    };

    let transition = QueueItem::try_from(row)?.into_transition(event, at);
    if transition.status_changed || transition.first_occurrence {
        let item = &transition.item;
        sqlx::query(
            "update queue_items set status=$2, sent_at=$3, opened_at=$4, clicked_at=$5, \
                 unsubscribed_at=$6 \
             where id=$1",
        )
        .bind(id)
        .bind(item.status.as_str())
        .bind(item.sent_at)
        .bind(item.opened_at)
        .bind(item.clicked_at)
        .bind(item.unsubscribed_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(Some(transition))
}

/// Postgres delivery queue
#[derive(Debug, Clone)]
pub struct PgQueueRepo {
    pool: PgPool,
}

impl PgQueueRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QueueRepo for PgQueueRepo {
    #[tracing::instrument(name = "Insert queue item", skip(self))]
    async fn insert(&self, new_item: &NewQueueItem) -> Result<QueueItem> {
        let row = sqlx::query_as::<_, QueueItemRow>(&format!(
            "insert into queue_items(id, prospect_id, campaign_id, step_id, scheduled_at, pixel_id) \
             values ($1, $2, $3, $4, $5, $6) returning {}",
            QUEUE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new_item.prospect_id)
        .bind(new_item.campaign_id)
        .bind(&new_item.step_id)
        .bind(new_item.scheduled_at)
        .bind(&new_item.pixel_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_violation("Queue item for this step"))?;

        row.try_into()
    }

    #[tracing::instrument(name = "Fetch queue item by id", skip(self))]
    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<QueueItem>> {
        sqlx::query_as::<_, QueueItemRow>(&format!(
            "select {} from queue_items where id=$1",
            QUEUE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(QueueItem::try_from)
        .transpose()
    }

    #[tracing::instrument(name = "Fetch queue item by pixel id", skip(self))]
    async fn fetch_by_pixel_id(&self, pixel_id: &str) -> Result<Option<QueueItem>> {
        sqlx::query_as::<_, QueueItemRow>(&format!(
            "select {} from queue_items where pixel_id=$1",
            QUEUE_COLUMNS
        ))
        .bind(pixel_id)
        .fetch_optional(&self.pool)
        .await?
        .map(QueueItem::try_from)
        .transpose()
    }

    #[tracing::instrument(name = "Count scheduled queue items", skip(self))]
    async fn count_scheduled_between(
        &self,
        campaign_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "select count(*) from queue_items \
             where campaign_id = $1 and scheduled_at >= $2 and scheduled_at < $3",
        )
        .bind(campaign_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[tracing::instrument(name = "Fetch first queue item for prospect", skip(self))]
    async fn fetch_first_for_prospect(&self, prospect_id: Uuid) -> Result<Option<QueueItem>> {
        sqlx::query_as::<_, QueueItemRow>(&format!(
            "select {} from queue_items where prospect_id = $1 \
             order by scheduled_at asc limit 1",
            QUEUE_COLUMNS
        ))
        .bind(prospect_id)
        .fetch_optional(&self.pool)
        .await?
        .map(QueueItem::try_from)
        .transpose()
    }

    #[tracing::instrument(name = "Check queue item for step", skip(self))]
    async fn has_item_for_step(
        &self,
        prospect_id: Uuid,
        campaign_id: Uuid,
        step_id: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "select exists(select 1 from queue_items \
             where prospect_id = $1 and campaign_id = $2 and step_id = $3)",
        )
        .bind(prospect_id)
        .bind(campaign_id)
        .bind(step_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[tracing::instrument(name = "Fetch follow-up candidates", skip(self))]
    async fn fetch_follow_up_candidates(
        &self,
        campaign_id: Uuid,
        step_id: &str,
        next_step_id: &str,
        sent_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            "select q.id, q.prospect_id, q.campaign_id, q.step_id, q.scheduled_at, q.status, \
                    q.sent_at, q.opened_at, q.clicked_at, q.unsubscribed_at, q.pixel_id, q.click_map \
             from queue_items q \
             join prospects p on p.id = q.prospect_id \
             where q.campaign_id = $1 and q.step_id = $2 \
               and q.status in ('sent', 'opened', 'clicked') \
               and q.sent_at <= $4 \
               and p.status = 'contacted' \
               and not exists (select 1 from queue_items n \
                               where n.prospect_id = q.prospect_id \
                                 and n.campaign_id = q.campaign_id and n.step_id = $3) \
             order by q.sent_at asc \
             limit $5",
        )
        .bind(campaign_id)
        .bind(step_id)
        .bind(next_step_id)
        .bind(sent_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_items(rows)
    }

    #[tracing::instrument(name = "Fetch due queue items", skip(self))]
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(&format!(
            "select {} from queue_items where status = 'pending' and scheduled_at <= $1 \
             order by scheduled_at asc limit $2",
            QUEUE_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_items(rows)
    }

    #[tracing::instrument(name = "Apply queue event", skip(self))]
    async fn apply_event(
        &self,
        id: Uuid,
        event: QueueEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<Transition>> {
        let mut tx = self.pool.begin().await?;
        let transition = apply_locked(&mut tx, id, event, at).await?;
        tx.commit().await?;

        Ok(transition)
    }

    #[tracing::instrument(name = "Record tracking event", skip(self, event), fields(queue_item_id = %event.queue_item_id))]
    async fn record_tracking_event(&self, event: &NewTrackingEvent) -> Result<Option<Transition>> {
        let mut tx = self.pool.begin().await?;
        let transition = apply_locked(
            &mut tx,
            event.queue_item_id,
            event.event_type.into(),
            event.occurred_at,
        )
        .await?;

        // The stamp and its event commit together or not at all
        if matches!(&transition, Some(t) if t.first_occurrence) {
            insert_event(&mut *tx, event).await?;
        }
        tx.commit().await?;

        Ok(transition)
    }

    #[tracing::instrument(name = "Register click link", skip(self))]
    async fn register_click_link(&self, id: Uuid, tracking_id: &str, url: &str) -> Result<()> {
        let result = sqlx::query(
            "update queue_items set click_map = click_map || jsonb_build_object($2::text, $3::text) \
             where id = $1",
        )
        .bind(id)
        .bind(tracking_id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Queue item"));
        }
        Ok(())
    }

    #[tracing::instrument(name = "Fetch campaign queue items", skip(self))]
    async fn fetch_for_campaign(
        &self,
        campaign_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(&format!(
            "select {} from queue_items \
             where campaign_id = $1 and ($2::timestamptz is null or scheduled_at >= $2)",
            QUEUE_COLUMNS
        ))
        .bind(campaign_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        into_items(rows)
    }
}
