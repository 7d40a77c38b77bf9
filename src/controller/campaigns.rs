use actix_web::dev::HttpServiceFactory;
use actix_web::{delete, get, post, put, web, HttpResponse, Responder};

use serde::Deserialize;

use uuid::Uuid;

use crate::analytics::{self, StatsPeriod};
use crate::clock::Clock;
use crate::error::{Error, RestError, RestResult};
use crate::model::NewCampaign;
use crate::repo::Repositories;
use crate::scheduler::{PassScope, Scheduler};

#[derive(Debug, Default, Deserialize)]
pub struct StartBody {
    prospect_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    period: Option<String>,
}

#[tracing::instrument(name = "Create a campaign", skip(repos, body))]
#[post("")]
async fn create(
    repos: web::Data<Repositories>,
    body: web::Json<NewCampaign>,
) -> RestResult<impl Responder> {
    let definition = body.into_inner().validate()?;
    let campaign = repos.campaigns.insert(&definition).await?;

    Ok(HttpResponse::Created().json(campaign))
}

#[tracing::instrument(name = "List campaigns", skip(repos))]
#[get("")]
async fn list(repos: web::Data<Repositories>) -> RestResult<impl Responder> {
    let campaigns = repos.campaigns.fetch_all().await?;

    Ok(HttpResponse::Ok().json(campaigns))
}

#[tracing::instrument(name = "Fetch a campaign", skip(repos))]
#[get("/{id}")]
async fn fetch(repos: web::Data<Repositories>, path: web::Path<Uuid>) -> RestResult<impl Responder> {
    let campaign = repos
        .campaigns
        .fetch_by_id(path.into_inner())
        .await?
        .ok_or(Error::NotFound("Campaign"))?;

    Ok(HttpResponse::Ok().json(campaign))
}

#[tracing::instrument(name = "Update a campaign", skip(repos, body))]
#[put("/{id}")]
async fn update(
    repos: web::Data<Repositories>,
    path: web::Path<Uuid>,
    body: web::Json<NewCampaign>,
) -> RestResult<impl Responder> {
    let definition = body.into_inner().validate()?;
    let campaign = repos
        .campaigns
        .update(path.into_inner(), &definition)
        .await?
        .ok_or(Error::NotFound("Campaign"))?;

    Ok(HttpResponse::Ok().json(campaign))
}

/// Archive rather than delete, queue history references the campaign
#[tracing::instrument(name = "Archive a campaign", skip(repos, clock))]
#[delete("/{id}")]
async fn archive(
    repos: web::Data<Repositories>,
    clock: web::Data<dyn Clock>,
    path: web::Path<Uuid>,
) -> RestResult<impl Responder> {
    if !repos.campaigns.archive(path.into_inner(), clock.now()).await? {
        return Err(Error::NotFound("Campaign").into());
    }

    Ok(HttpResponse::NoContent())
}

/// Run a scheduling pass restricted to one campaign
#[tracing::instrument(name = "Start a campaign", skip(scheduler, body))]
#[post("/{id}/start")]
async fn start(
    scheduler: web::Data<Scheduler>,
    path: web::Path<Uuid>,
    body: Option<web::Json<StartBody>>,
) -> RestResult<impl Responder> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let scope = PassScope::Campaign {
        campaign_id: path.into_inner(),
        prospect_ids: body.prospect_ids,
    };

    match scheduler.try_run_pass(scope).await? {
        Some(report) => Ok(HttpResponse::Ok().json(report)),
        None => Err(RestError::Conflict(
            "A scheduling pass is already running".into(),
        )),
    }
}

#[tracing::instrument(name = "Campaign stats", skip(repos, clock))]
#[get("/{id}/stats")]
async fn stats(
    repos: web::Data<Repositories>,
    clock: web::Data<dyn Clock>,
    path: web::Path<Uuid>,
    query: web::Query<StatsQuery>,
) -> RestResult<impl Responder> {
    let period = match query.into_inner().period {
        Some(period) => period.parse()?,
        None => StatsPeriod::default(),
    };
    let stats =
        analytics::campaign_stats(repos.get_ref(), path.into_inner(), period, clock.now()).await?;

    Ok(HttpResponse::Ok().json(stats))
}

/// Campaign API endpoints
pub fn scope() -> impl HttpServiceFactory {
    web::scope("/campaigns")
        .service(create)
        .service(list)
        .service(fetch)
        .service(update)
        .service(archive)
        .service(start)
        .service(stats)
}
