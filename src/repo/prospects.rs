use chrono::{DateTime, Utc};

use sqlx::PgPool;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{NewProspect, Prospect, ProspectStatus};

use super::{unique_violation, ProspectRepo};

const PROSPECT_COLUMNS: &str = "id, business_name, contact_name, email, segment, status, \
     initial_outreach_at, last_contact_at, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ProspectRow {
    id: Uuid,
    business_name: String,
    contact_name: String,
    email: String,
    segment: String,
    status: String,
    initial_outreach_at: Option<DateTime<Utc>>,
    last_contact_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProspectRow> for Prospect {
    type Error = Error;

    fn try_from(row: ProspectRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            business_name: row.business_name,
            contact_name: row.contact_name,
            email: row.email,
            segment: row.segment,
            status: row.status.parse()?,
            initial_outreach_at: row.initial_outreach_at,
            last_contact_at: row.last_contact_at,
            created_at: row.created_at,
        })
    }
}

/// Postgres prospect store
#[derive(Debug, Clone)]
pub struct PgProspectRepo {
    pool: PgPool,
}

impl PgProspectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProspectRepo for PgProspectRepo {
    #[tracing::instrument(name = "Insert prospect", skip(self))]
    async fn insert(&self, new_prospect: &NewProspect) -> Result<Prospect> {
        let row = sqlx::query_as::<_, ProspectRow>(&format!(
            "insert into prospects(id, business_name, contact_name, email, segment, status) \
             values ($1, $2, $3, $4, $5, $6) returning {}",
            PROSPECT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new_prospect.business_name.as_ref())
        .bind(new_prospect.contact_name.as_ref())
        .bind(new_prospect.email.as_ref())
        .bind(new_prospect.segment.as_ref())
        .bind(new_prospect.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unique_violation("Prospect with this email"))?;

        row.try_into()
    }

    #[tracing::instrument(name = "Fetch prospect by id", skip(self))]
    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Prospect>> {
        sqlx::query_as::<_, ProspectRow>(&format!(
            "select {} from prospects where id=$1",
            PROSPECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Prospect::try_from)
        .transpose()
    }

    #[tracing::instrument(name = "Fetch prospects by ids", skip(self))]
    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Prospect>> {
        sqlx::query_as::<_, ProspectRow>(&format!(
            "select {} from prospects where id = any($1)",
            PROSPECT_COLUMNS
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Prospect::try_from)
        .collect()
    }

    #[tracing::instrument(name = "Fetch prospects eligible for outreach", skip(self))]
    async fn fetch_eligible(&self, limit: i64, only: Option<&[Uuid]>) -> Result<Vec<Prospect>> {
        sqlx::query_as::<_, ProspectRow>(&format!(
            "select {} from prospects p \
             where p.status = 'qualified' and p.initial_outreach_at is null \
               and ($2::uuid[] is null or p.id = any($2)) \
             order by p.created_at asc \
             limit $1",
            PROSPECT_COLUMNS
        ))
        .bind(limit)
        .bind(only.map(<[Uuid]>::to_vec))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Prospect::try_from)
        .collect()
    }

    #[tracing::instrument(name = "Mark prospect contacted", skip(self))]
    async fn mark_contacted(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "update prospects \
             set status = 'contacted', \
                 initial_outreach_at = coalesce(initial_outreach_at, $2), \
                 last_contact_at = $2 \
             where id = $1 and status = 'qualified'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Touch prospect last contact", skip(self))]
    async fn touch_last_contact(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "update prospects set last_contact_at = $2 where id = $1 and status = 'contacted'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Advance prospect status", skip(self))]
    async fn advance_status(
        &self,
        id: Uuid,
        target: ProspectStatus,
    ) -> Result<Option<(Prospect, bool)>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, ProspectRow>(&format!(
            "select {} from prospects where id=$1 for update",
            PROSPECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let mut prospect = Prospect::try_from(row)?;

        let changed = prospect.status.can_advance_to(target);
        if changed {
            sqlx::query("update prospects set status=$2 where id=$1")
                .bind(id)
                .bind(target.as_str())
                .execute(&mut *tx)
                .await?;
            prospect.status = target;
        }
        tx.commit().await?;

        Ok(Some((prospect, changed)))
    }
}
