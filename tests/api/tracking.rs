use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{Method, StatusCode};

use serde_json::Value;

use crate::helpers::{campaign_body, NewProspect, TestApp, FALLBACK_URL, OFFER_URL};

const IPHONE: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148";

/// Seed one prospect and campaign, schedule and deliver the first step
async fn deliver_intro(app: &TestApp) -> (String, String) {
    app.accept_emails().await;
    let prospect = app.seed_prospect(&NewProspect::qualified("florist")).await;
    let campaign = app.seed_campaign(&campaign_body("florist", 10)).await;

    let res = app.campaign_start(&campaign, None).await.unwrap();
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!(1, app.deliver().await.sent);

    (prospect, campaign)
}

async fn stats(app: &TestApp, campaign: &str) -> Value {
    app.campaign_stats(campaign, Some("all"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn get(app: &TestApp, link: &str) -> reqwest::Response {
    app.client
        .request(Method::GET, link)
        .header(USER_AGENT, IPHONE)
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
async fn delivered_email_carries_tracking_links() {
    let app = TestApp::spawn().await;
    deliver_intro(&app).await;

    let requests = app.email_server.received_requests().await.unwrap();
    assert_eq!(1, requests.len());
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!("intro-v1", body["Tag"]);
    assert_eq!("Hello Bloom Florists", body["Subject"]);
    assert!(body["TextBody"]
        .as_str()
        .unwrap()
        .contains("/track/unsubscribe/"));

    let links = app.email_links(0).await;
    assert!(links.click.contains("url=https%3A%2F%2Fexample.com%2Foffer"));
}

#[tokio::test]
async fn opens_and_clicks_are_counted_once() {
    let app = TestApp::spawn().await;
    let (_, campaign) = deliver_intro(&app).await;
    let links = app.email_links(0).await;

    for _ in 0..2 {
        let res = get(&app, &links.pixel).await;
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("image/png", res.headers()[CONTENT_TYPE]);
        assert!(res.headers()[CACHE_CONTROL]
            .to_str()
            .unwrap()
            .contains("no-store"));
    }

    let res = get(&app, &links.click).await;
    assert_eq!(StatusCode::FOUND, res.status());
    assert_eq!(OFFER_URL, res.headers()[LOCATION]);

    let stats = stats(&app, &campaign).await;
    assert_eq!(1, stats["sent"]);
    assert_eq!(1, stats["opened"]);
    assert_eq!(1, stats["clicked"]);
    assert_eq!(1.0, stats["rates"]["open_rate"]);
    assert_eq!(1, stats["breakdown"]["by_event_type"]["opened"]);
    assert_eq!(1, stats["breakdown"]["by_event_type"]["clicked"]);
    assert_eq!(2, stats["breakdown"]["by_device"]["mobile"]);
}

#[tokio::test]
async fn unsubscribe_stops_the_prospect() {
    let app = TestApp::spawn().await;
    let (prospect, campaign) = deliver_intro(&app).await;
    let links = app.email_links(0).await;

    let res = get(&app, &links.unsubscribe).await;
    assert_eq!(StatusCode::OK, res.status());
    assert!(res.text().await.unwrap().contains("unsubscribed"));

    // A repeated visit is still confirmed
    let res = app
        .client
        .request(Method::POST, &links.unsubscribe)
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, res.status());

    let body: Value = app.prospect_fetch(&prospect).await.unwrap().json().await.unwrap();
    assert_eq!("unsubscribed", body["status"]);
    let stats = stats(&app, &campaign).await;
    assert_eq!(1, stats["unsubscribed"]);
    assert_eq!(1, stats["breakdown"]["by_event_type"]["unsubscribed"]);
}

#[tokio::test]
async fn registered_prospects_count_as_conversions() {
    let app = TestApp::spawn().await;
    let (prospect, campaign) = deliver_intro(&app).await;

    let res = app.prospect_set_status(&prospect, "registered").await.unwrap();
    assert_eq!(StatusCode::OK, res.status());

    let stats = stats(&app, &campaign).await;
    assert_eq!(1, stats["registered"]);
    assert_eq!(1.0, stats["rates"]["conversion_rate"]);
}

#[tokio::test]
async fn unknown_ids_still_answer() {
    let app = TestApp::spawn().await;

    let res = app
        .request(Method::GET, "track/pixel/unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!("image/png", res.headers()[CONTENT_TYPE]);

    let res = app
        .request(Method::GET, "track/click/unknown.abc")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::FOUND, res.status());
    assert_eq!(FALLBACK_URL, res.headers()[LOCATION]);

    let res = app
        .request(Method::GET, "track/click/unknown.abc?url=javascript:alert(1)")
        .send()
        .await
        .unwrap();
    assert_eq!(FALLBACK_URL, res.headers()[LOCATION]);

    let res = app
        .request(Method::GET, "track/unsubscribe/unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, res.status());
}
