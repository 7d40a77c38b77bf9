use actix_web::dev::HttpServiceFactory;
use actix_web::{get, post, put, web, HttpResponse, Responder};

use serde::Deserialize;

use uuid::Uuid;

use crate::error::{Error, RestError, RestResult};
use crate::model::{NewProspect, ProspectStatus};
use crate::repo::Repositories;

/// JSON body for new prospects
#[derive(Debug, Deserialize)]
pub struct NewProspectBody {
    business_name: String,
    contact_name: String,
    email: String,
    segment: String,
    status: Option<String>,
}

impl TryFrom<NewProspectBody> for NewProspect {
    type Error = Error;

    fn try_from(body: NewProspectBody) -> Result<Self, Error> {
        let status = match body.status.as_deref() {
            None => ProspectStatus::New,
            Some(status) => match status.parse::<ProspectStatus>()? {
                status @ (ProspectStatus::New | ProspectStatus::Qualified) => status,
                other => {
                    return Err(Error::ParsingError(format!(
                        "New prospects cannot start as {}",
                        other
                    )))
                }
            },
        };

        Ok(Self {
            business_name: body.business_name.parse()?,
            contact_name: body.contact_name.parse()?,
            email: body.email.parse()?,
            segment: body.segment.parse()?,
            status,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    status: String,
}

#[tracing::instrument(name = "Create a prospect", skip(repos, body))]
#[post("")]
async fn create(
    repos: web::Data<Repositories>,
    body: web::Json<NewProspectBody>,
) -> RestResult<impl Responder> {
    let new_prospect: NewProspect = body.into_inner().try_into()?;
    let prospect = repos.prospects.insert(&new_prospect).await?;

    Ok(HttpResponse::Created().json(prospect))
}

#[tracing::instrument(name = "Fetch a prospect", skip(repos))]
#[get("/{id}")]
async fn fetch(repos: web::Data<Repositories>, path: web::Path<Uuid>) -> RestResult<impl Responder> {
    let prospect = repos
        .prospects
        .fetch_by_id(path.into_inner())
        .await?
        .ok_or(Error::NotFound("Prospect"))?;

    Ok(HttpResponse::Ok().json(prospect))
}

/// Move a prospect forward, e.g. to record a registration
#[tracing::instrument(name = "Update prospect status", skip(repos))]
#[put("/{id}/status")]
async fn update_status(
    repos: web::Data<Repositories>,
    path: web::Path<Uuid>,
    body: web::Json<StatusBody>,
) -> RestResult<impl Responder> {
    let target: ProspectStatus = body.into_inner().status.parse()?;
    let (prospect, changed) = repos
        .prospects
        .advance_status(path.into_inner(), target)
        .await?
        .ok_or(Error::NotFound("Prospect"))?;

    if !changed && prospect.status != target {
        return Err(RestError::Conflict(format!(
            "Cannot move prospect from {} to {}",
            prospect.status, target
        )));
    }

    Ok(HttpResponse::Ok().json(prospect))
}

/// Prospect API endpoints
pub fn scope() -> impl HttpServiceFactory {
    web::scope("/prospects")
        .service(create)
        .service(fetch)
        .service(update_status)
}
