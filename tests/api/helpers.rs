use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use reqwest::{Client, Method, Response};

use secrecy::Secret;

use serde::Serialize;
use serde_json::{json, Value};

use url::Url;

use uuid::Uuid;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use outreach::app;
use outreach::client::EmailClient;
use outreach::clock::{Clock, FixedJitter, SystemClock};
use outreach::crypto::SigningKey;
use outreach::delivery::{DeliveryReport, DeliveryWorker, TrackingUrls};
use outreach::repo::memory::MemoryStore;
use outreach::scheduler::{BusinessHours, Scheduler, SchedulerConfig};
use outreach::tracking::TrackingIngestor;

pub const OFFER_URL: &str = "https://example.com/offer";
pub const FALLBACK_URL: &str = "https://fallback.example.com/";

#[derive(Debug, Clone, Serialize)]
pub struct NewProspect {
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub segment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl NewProspect {
    /// A qualified prospect with a unique email address
    pub fn qualified(segment: &str) -> Self {
        Self {
            business_name: "Bloom Florists".into(),
            contact_name: "Ada Lovelace".into(),
            email: format!("owner.{}@bloom.example.com", Uuid::new_v4().simple()),
            segment: segment.into(),
            status: Some("qualified".into()),
        }
    }
}

/// A two-step campaign definition as sent over the API
pub fn campaign_body(segment: &str, max_emails_per_day: i32) -> Value {
    json!({
        "name": format!("{} outreach", segment),
        "segment_filter": segment,
        "max_emails_per_day": max_emails_per_day,
        "steps": [
            {
                "id": "intro",
                "template": "intro-v1",
                "subject": "Hello {{business_name}}",
                "html_body": format!(
                    "<html><body><p>Hi {{{{contact_name}}}}, see <a href=\"{}\">our offer</a>.</p>\
                     <p><a href=\"{{{{unsubscribe_url}}}}\">Unsubscribe</a></p></body></html>",
                    OFFER_URL
                ),
                "text_body": "Hi {{contact_name}}, unsubscribe at {{unsubscribe_url}}"
            },
            {
                "id": "follow-up",
                "template": "follow-up-v1",
                "subject": "Following up",
                "html_body": "<p>Just checking in.</p>",
                "text_body": "Just checking in.",
                "offset_hours": 72
            }
        ]
    })
}

/// Links found in a sent email, by tracking endpoint
#[derive(Debug)]
pub struct EmailLinks {
    pub pixel: String,
    pub click: String,
    pub unsubscribe: String,
}

pub struct TestApp {
    addr: String,

    pub client: Client,
    pub email_server: MockServer,
    pub store: MemoryStore,
    worker: DeliveryWorker,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to listen on random port");
        let port = listener.local_addr().unwrap().port();

        let addr = format!("http://127.0.0.1:{}", port);

        let store = MemoryStore::default();
        let repos = store.repositories();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let signing_key = SigningKey::new(&Secret::new("test-secret-key".into()))
            .expect("Failed to create crypto signing key");

        let email_server = MockServer::start().await;

        let email_client = {
            let sender = "test@test.com"
                .parse()
                .expect("Failed to parse sender email address");
            let api_base_url =
                Url::parse(&email_server.uri()).expect("Failed to parse mock server uri");
            let api_auth_token = Secret::new("TestAuthorization".into());
            let api_timeout = Duration::from_secs(2);

            EmailClient::new(sender, api_timeout, api_base_url, api_auth_token)
                .expect("Failed to create email client")
        };

        // No jitter so scheduled items are due right away
        let scheduler = Arc::new(Scheduler::new(
            repos.clone(),
            clock.clone(),
            Arc::new(FixedJitter(ChronoDuration::zero())),
            SchedulerConfig {
                batch_size: 50,
                max_jitter: ChronoDuration::zero(),
                business_hours: BusinessHours::default(),
            },
        ));
        let worker = DeliveryWorker::new(
            repos.clone(),
            Arc::new(email_client),
            signing_key,
            TrackingUrls::new(Url::parse(&addr).expect("Failed to parse app address")),
            clock.clone(),
            50,
        );
        let ingestor = TrackingIngestor::new(
            repos.clone(),
            clock.clone(),
            Url::parse(FALLBACK_URL).unwrap(),
        );

        let server = app::run(listener, repos, scheduler, ingestor, clock)
            .expect("Failed to spawn app instance");
        let _ = tokio::spawn(server);

        // Tracking redirects are asserted, not followed
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            addr,
            client,
            email_server,
            store,
            worker,
        }
    }

    pub fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", &self.addr, url);
        self.client.request(method, url)
    }

    pub async fn health_check(&self) -> reqwest::Result<Response> {
        self.request(Method::GET, "health_check").send().await
    }

    pub async fn prospect_create(&self, prospect: &NewProspect) -> reqwest::Result<Response> {
        self.request(Method::POST, "prospects")
            .json(prospect)
            .send()
            .await
    }

    pub async fn prospect_fetch(&self, id: &str) -> reqwest::Result<Response> {
        self.request(Method::GET, &format!("prospects/{}", id))
            .send()
            .await
    }

    pub async fn prospect_set_status(&self, id: &str, status: &str) -> reqwest::Result<Response> {
        self.request(Method::PUT, &format!("prospects/{}/status", id))
            .json(&json!({ "status": status }))
            .send()
            .await
    }

    pub async fn campaign_create(&self, body: &Value) -> reqwest::Result<Response> {
        self.request(Method::POST, "campaigns")
            .json(body)
            .send()
            .await
    }

    pub async fn campaign_start(&self, id: &str, body: Option<&Value>) -> reqwest::Result<Response> {
        let req = self.request(Method::POST, &format!("campaigns/{}/start", id));
        match body {
            Some(body) => req.json(body).send().await,
            None => req.send().await,
        }
    }

    pub async fn campaign_stats(&self, id: &str, period: Option<&str>) -> reqwest::Result<Response> {
        let url = match period {
            Some(period) => format!("campaigns/{}/stats?period={}", id, period),
            None => format!("campaigns/{}/stats", id),
        };
        self.request(Method::GET, &url).send().await
    }

    /// Create a prospect and return its id
    pub async fn seed_prospect(&self, prospect: &NewProspect) -> String {
        let res = self
            .prospect_create(prospect)
            .await
            .expect("Failed to execute request");
        assert_eq!(reqwest::StatusCode::CREATED, res.status());
        id_of(res).await
    }

    /// Create a campaign and return its id
    pub async fn seed_campaign(&self, body: &Value) -> String {
        let res = self
            .campaign_create(body)
            .await
            .expect("Failed to execute request");
        assert_eq!(reqwest::StatusCode::CREATED, res.status());
        id_of(res).await
    }

    /// Accept every send request at the mock email provider
    pub async fn accept_emails(&self) {
        Mock::given(path("/email"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.email_server)
            .await;
    }

    /// Run one delivery pass
    pub async fn deliver(&self) -> DeliveryReport {
        self.worker
            .try_run_pass()
            .await
            .expect("Delivery pass failed")
            .expect("Delivery pass already running")
    }

    /// Tracking links in the `n`th email sent to the provider
    pub async fn email_links(&self, n: usize) -> EmailLinks {
        let requests = self.email_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[n].body).unwrap();
        let html = body["HtmlBody"].as_str().unwrap();

        let links: Vec<String> = linkify::LinkFinder::new()
            .links(html)
            .filter(|l| *l.kind() == linkify::LinkKind::Url)
            .map(|l| l.as_str().to_string())
            .collect();
        let find = |endpoint: &str| {
            links
                .iter()
                .find(|l| l.contains(endpoint))
                .unwrap_or_else(|| panic!("No {} link in {}", endpoint, html))
                .clone()
        };

        EmailLinks {
            pixel: find("/track/pixel/"),
            click: find("/track/click/"),
            unsubscribe: find("/track/unsubscribe/"),
        }
    }
}

pub async fn id_of(res: Response) -> String {
    let body: Value = res.json().await.expect("Failed to parse response body");
    body["id"].as_str().expect("Missing id").to_string()
}
