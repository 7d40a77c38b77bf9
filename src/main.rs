use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;

use sqlx::postgres::PgPoolOptions;

use outreach::app;
use outreach::client::EmailClient;
use outreach::clock::{Clock, RandomJitter, SystemClock};
use outreach::crypto::SigningKey;
use outreach::delivery::{DeliveryWorker, TrackingUrls};
use outreach::repo::Repositories;
use outreach::scheduler::Scheduler;
use outreach::settings::Settings;
use outreach::telemetry;
use outreach::tracking::TrackingIngestor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = telemetry::create_subscriber(telemetry::env_filter("info"), std::io::stdout);
    telemetry::set_subscriber(subscriber)?;

    let settings = Settings::load()?;

    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect_with(settings.database.with_db())
        .await
        .context("Failed to connect to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let repos = Repositories::postgres(pool);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let signing_key = SigningKey::new(settings.app.secret_key())?;
    let email_client = EmailClient::new(
        settings.email.sender()?,
        settings.email.api_timeout(),
        settings.email.api_base_url()?,
        settings.email.api_auth_token(),
    )?;

    let scheduler = Arc::new(Scheduler::new(
        repos.clone(),
        clock.clone(),
        Arc::new(RandomJitter),
        settings.scheduler.config()?,
    ));
    let worker = Arc::new(DeliveryWorker::new(
        repos.clone(),
        Arc::new(email_client),
        signing_key,
        TrackingUrls::new(settings.app.base_url()?),
        clock.clone(),
        settings.delivery.batch_size(),
    ));
    let ingestor = TrackingIngestor::new(
        repos.clone(),
        clock.clone(),
        settings.tracking.fallback_url()?,
    );

    tokio::spawn(Arc::clone(&scheduler).run_until_stopped(settings.scheduler.interval()));
    tokio::spawn(worker.run_until_stopped(settings.delivery.interval()));

    let listener = TcpListener::bind(settings.app.addr())?;
    tracing::info!(addr = ?listener.local_addr()?, "Listening");

    app::run(listener, repos, scheduler, ingestor, clock)?
        .await
        .context("Failed to run app")
}
