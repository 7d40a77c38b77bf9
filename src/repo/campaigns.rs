use chrono::{DateTime, Utc};

use sqlx::types::Json;
use sqlx::PgPool;

use uuid::Uuid;

use crate::error::Result;
use crate::model::{Campaign, CampaignStep, NewCampaign};

use super::CampaignRepo;

const CAMPAIGN_COLUMNS: &str = "id, name, segment_filter, steps, max_emails_per_day, \
     min_hours_between_emails, respect_business_hours, timezone, active, created_at, archived_at";

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    segment_filter: String,
    steps: Json<Vec<CampaignStep>>,
    max_emails_per_day: i32,
    min_hours_between_emails: i32,
    respect_business_hours: bool,
    timezone: String,
    active: bool,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            segment_filter: row.segment_filter,
            steps: row.steps.0,
            max_emails_per_day: row.max_emails_per_day,
            min_hours_between_emails: row.min_hours_between_emails,
            respect_business_hours: row.respect_business_hours,
            timezone: row.timezone,
            active: row.active,
            created_at: row.created_at,
            archived_at: row.archived_at,
        }
    }
}

/// Postgres campaign registry
#[derive(Debug, Clone)]
pub struct PgCampaignRepo {
    pool: PgPool,
}

impl PgCampaignRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CampaignRepo for PgCampaignRepo {
    #[tracing::instrument(name = "Insert campaign", skip(self, campaign), fields(name = %campaign.name))]
    async fn insert(&self, campaign: &NewCampaign) -> Result<Campaign> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "insert into campaigns(id, name, segment_filter, steps, max_emails_per_day, \
                 min_hours_between_emails, respect_business_hours, timezone, active) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9) returning {}",
            CAMPAIGN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&campaign.name)
        .bind(&campaign.segment_filter)
        .bind(Json(&campaign.steps))
        .bind(campaign.max_emails_per_day)
        .bind(campaign.min_hours_between_emails)
        .bind(campaign.respect_business_hours)
        .bind(&campaign.timezone)
        .bind(campaign.active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "Fetch campaign by id", skip(self))]
    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "select {} from campaigns where id=$1 and archived_at is null",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Campaign::from))
    }

    #[tracing::instrument(name = "Fetch all campaigns", skip(self))]
    async fn fetch_all(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "select {} from campaigns where archived_at is null order by created_at asc",
            CAMPAIGN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Campaign::from).collect())
    }

    #[tracing::instrument(name = "Fetch active campaigns", skip(self))]
    async fn fetch_active(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "select {} from campaigns where active and archived_at is null order by created_at asc",
            CAMPAIGN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Campaign::from).collect())
    }

    #[tracing::instrument(name = "Update campaign", skip(self, campaign))]
    async fn update(&self, id: Uuid, campaign: &NewCampaign) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "update campaigns set name=$2, segment_filter=$3, steps=$4, max_emails_per_day=$5, \
                 min_hours_between_emails=$6, respect_business_hours=$7, timezone=$8, active=$9 \
             where id=$1 and archived_at is null returning {}",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .bind(&campaign.name)
        .bind(&campaign.segment_filter)
        .bind(Json(&campaign.steps))
        .bind(campaign.max_emails_per_day)
        .bind(campaign.min_hours_between_emails)
        .bind(campaign.respect_business_hours)
        .bind(&campaign.timezone)
        .bind(campaign.active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Campaign::from))
    }

    #[tracing::instrument(name = "Archive campaign", skip(self))]
    async fn archive(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "update campaigns set active = false, archived_at = $2 \
             where id = $1 and archived_at is null",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
