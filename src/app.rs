use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{get, HttpResponse, Responder};
use actix_web::{web, App, HttpServer};

use tracing_actix_web::TracingLogger;

use crate::clock::Clock;
use crate::controller::{campaigns, prospects, tracking};
use crate::error::RestError;
use crate::repo::Repositories;
use crate::scheduler::Scheduler;
use crate::tracking::TrackingIngestor;

/// Simple health-check endpoint
#[tracing::instrument(name = "Health check")]
#[get("/health_check")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().finish()
}

/// Run the application on a specified TCP listener
pub fn run(
    listener: TcpListener,
    repos: Repositories,
    scheduler: Arc<Scheduler>,
    ingestor: TrackingIngestor,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Server> {
    // Wrap application data
    let repos = web::Data::new(repos);
    let scheduler = web::Data::from(scheduler);
    let ingestor = web::Data::new(ingestor);
    let clock: web::Data<dyn Clock> = web::Data::from(clock);

    // Start the server
    let server = HttpServer::new(move || {
        // Malformed JSON bodies answer with the same error shape as handlers
        let json_config = web::JsonConfig::default()
            .error_handler(|err, _req| RestError::ParseError(err.to_string()).into());

        App::new()
            .wrap(TracingLogger::default())
            .app_data(json_config)
            .app_data(repos.clone())
            .app_data(scheduler.clone())
            .app_data(ingestor.clone())
            .app_data(clock.clone())
            .service(health_check)
            .service(campaigns::scope())
            .service(prospects::scope())
            .service(tracking::scope())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
