use std::future::{ready, Ready};

use actix_web::dev::HttpServiceFactory;
use actix_web::http::header::{self, CacheControl, CacheDirective};
use actix_web::{dev, get, route, web, FromRequest, HttpRequest, HttpResponse, Responder};

use serde::Deserialize;

use crate::domain::ClientMetadata;
use crate::error::RestError;
use crate::tracking::{TrackingIngestor, UnsubscribeOutcome};

/// 1x1 transparent PNG
const PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

const UNSUBSCRIBED_PAGE: &str = "<!DOCTYPE html><html><head><title>Unsubscribed</title></head>\
<body><h1>You have been unsubscribed</h1><p>You will not receive any more emails from us.</p></body></html>";

const INVALID_LINK_PAGE: &str = "<!DOCTYPE html><html><head><title>Link invalid</title></head>\
<body><h1>This link is invalid</h1><p>The unsubscribe link could not be recognized.</p></body></html>";

const UNAVAILABLE_PAGE: &str = "<!DOCTYPE html><html><head><title>Try again later</title></head>\
<body><h1>Something went wrong</h1><p>We could not process your request. Please try again later.</p></body></html>";

/// Request metadata, never rejects a request
impl FromRequest for ClientMetadata {
    type Error = RestError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let ip_address = req.connection_info().realip_remote_addr().map(String::from);

        ready(Ok(ClientMetadata::new(user_agent, ip_address)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    url: Option<String>,
}

/// Open pixel, always served
#[tracing::instrument(name = "Open pixel", skip(ingestor, metadata))]
#[get("/pixel/{pixel_id}")]
async fn pixel(
    ingestor: web::Data<TrackingIngestor>,
    path: web::Path<String>,
    metadata: ClientMetadata,
) -> impl Responder {
    ingestor.record_open(&path.into_inner(), metadata).await;

    HttpResponse::Ok()
        .content_type("image/png")
        .insert_header(CacheControl(vec![
            CacheDirective::NoStore,
            CacheDirective::NoCache,
            CacheDirective::MustRevalidate,
        ]))
        .body(PIXEL)
}

/// Click redirect, always redirects
#[tracing::instrument(name = "Click redirect", skip(ingestor, metadata))]
#[get("/click/{tracking_id}")]
async fn click(
    ingestor: web::Data<TrackingIngestor>,
    path: web::Path<String>,
    query: web::Query<ClickQuery>,
    metadata: ClientMetadata,
) -> impl Responder {
    let target = ingestor
        .record_click(&path.into_inner(), query.url.as_deref(), metadata)
        .await;

    HttpResponse::Found()
        .insert_header((header::LOCATION, target))
        .insert_header(CacheControl(vec![CacheDirective::NoStore]))
        .finish()
}

#[tracing::instrument(name = "Unsubscribe", skip(ingestor, metadata))]
#[route("/unsubscribe/{pixel_id}", method = "GET", method = "POST")]
async fn unsubscribe(
    ingestor: web::Data<TrackingIngestor>,
    path: web::Path<String>,
    metadata: ClientMetadata,
) -> impl Responder {
    let (mut response, page) = match ingestor.unsubscribe(&path.into_inner(), metadata).await {
        UnsubscribeOutcome::Confirmed => (HttpResponse::Ok(), UNSUBSCRIBED_PAGE),
        UnsubscribeOutcome::UnknownLink => (HttpResponse::NotFound(), INVALID_LINK_PAGE),
        UnsubscribeOutcome::Unavailable => (HttpResponse::ServiceUnavailable(), UNAVAILABLE_PAGE),
    };

    response
        .content_type("text/html; charset=utf-8")
        .insert_header(CacheControl(vec![CacheDirective::NoStore]))
        .body(page)
}

/// Tracking endpoints
pub fn scope() -> impl HttpServiceFactory {
    web::scope("/track")
        .service(pixel)
        .service(click)
        .service(unsubscribe)
}
