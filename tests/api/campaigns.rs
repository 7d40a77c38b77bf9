use reqwest::{Method, StatusCode};

use serde_json::{json, Value};

use crate::helpers::{campaign_body, NewProspect, TestApp};

#[tokio::test]
async fn create_returns_201_and_lists_campaign() {
    let app = TestApp::spawn().await;

    let id = app.seed_campaign(&campaign_body("florist", 10)).await;

    let res = app.request(Method::GET, "campaigns").send().await.unwrap();
    assert_eq!(StatusCode::OK, res.status());
    let body: Value = res.json().await.unwrap();
    let campaigns = body.as_array().unwrap();
    assert_eq!(1, campaigns.len());
    assert_eq!(id, campaigns[0]["id"]);
    assert_eq!("UTC", campaigns[0]["timezone"]);
    assert_eq!(2, campaigns[0]["steps"].as_array().unwrap().len());
}

#[tokio::test]
async fn create_returns_400_for_invalid_definitions() {
    let app = TestApp::spawn().await;
    let mut no_steps = campaign_body("florist", 10);
    no_steps["steps"] = json!([]);
    let mut zero_cap = campaign_body("florist", 10);
    zero_cap["max_emails_per_day"] = json!(0);
    let mut bad_timezone = campaign_body("florist", 10);
    bad_timezone["timezone"] = json!("Mars/Olympus");
    let test_cases = vec![
        (no_steps, "no steps"),
        (zero_cap, "zero daily cap"),
        (bad_timezone, "unknown timezone"),
        (json!({ "name": "missing fields" }), "missing fields"),
    ];

    for (body, description) in test_cases {
        let res = app
            .campaign_create(&body)
            .await
            .expect("Failed to execute request");

        assert_eq!(
            StatusCode::BAD_REQUEST,
            res.status(),
            "The API did not fail with 400 when the payload had {}",
            description
        );
    }
}

#[tokio::test]
async fn update_replaces_the_definition() {
    let app = TestApp::spawn().await;
    let id = app.seed_campaign(&campaign_body("florist", 10)).await;
    let mut body = campaign_body("florist", 10);
    body["max_emails_per_day"] = json!(3);

    let res = app
        .request(Method::PUT, &format!("campaigns/{}", id))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(StatusCode::OK, res.status());
    let fetched: Value = app
        .request(Method::GET, &format!("campaigns/{}", id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(3, fetched["max_emails_per_day"]);
}

#[tokio::test]
async fn archived_campaigns_are_hidden() {
    let app = TestApp::spawn().await;
    let id = app.seed_campaign(&campaign_body("florist", 10)).await;

    let res = app
        .request(Method::DELETE, &format!("campaigns/{}", id))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NO_CONTENT, res.status());

    let res = app
        .request(Method::GET, &format!("campaigns/{}", id))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, res.status());

    let res = app.campaign_start(&id, None).await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, res.status());
}

#[tokio::test]
async fn inactive_campaigns_cannot_start() {
    let app = TestApp::spawn().await;
    let mut body = campaign_body("florist", 10);
    body["active"] = json!(false);
    let id = app.seed_campaign(&body).await;

    let res = app.campaign_start(&id, None).await.unwrap();

    assert_eq!(StatusCode::CONFLICT, res.status());
}

#[tokio::test]
async fn unknown_campaigns_return_404() {
    let app = TestApp::spawn().await;
    let id = uuid::Uuid::new_v4().to_string();

    let res = app
        .request(Method::DELETE, &format!("campaigns/{}", id))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, res.status());

    let res = app.campaign_start(&id, None).await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, res.status());

    let res = app.campaign_stats(&id, None).await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, res.status());
}

#[tokio::test]
async fn start_schedules_matching_qualified_prospects_once() {
    let app = TestApp::spawn().await;
    let florist = app.seed_prospect(&NewProspect::qualified("florist")).await;
    app.seed_prospect(&NewProspect::qualified("bakery")).await;
    app.seed_prospect(&NewProspect {
        status: None,
        ..NewProspect::qualified("florist")
    })
    .await;
    let id = app.seed_campaign(&campaign_body("florist", 10)).await;

    let res = app.campaign_start(&id, None).await.unwrap();
    assert_eq!(StatusCode::OK, res.status());
    let report: Value = res.json().await.unwrap();
    assert_eq!(1, report["scheduled"]);

    let prospect: Value = app.prospect_fetch(&florist).await.unwrap().json().await.unwrap();
    assert_eq!("contacted", prospect["status"]);
    assert_ne!(Value::Null, prospect["initial_outreach_at"]);

    // Contacted prospects are not scheduled again
    let report: Value = app.campaign_start(&id, None).await.unwrap().json().await.unwrap();
    assert_eq!(0, report["scheduled"]);
    assert_eq!(1, app.store.queue_items().await.len());
}

#[tokio::test]
async fn start_can_target_a_subset_of_prospects() {
    let app = TestApp::spawn().await;
    let first = app.seed_prospect(&NewProspect::qualified("florist")).await;
    app.seed_prospect(&NewProspect::qualified("florist")).await;
    let id = app.seed_campaign(&campaign_body("florist", 10)).await;

    let res = app
        .campaign_start(&id, Some(&json!({ "prospect_ids": [first] })))
        .await
        .unwrap();

    assert_eq!(StatusCode::OK, res.status());
    let items = app.store.queue_items().await;
    assert_eq!(1, items.len());
    assert_eq!(first, items[0].prospect_id.to_string());
}

#[tokio::test]
async fn start_respects_the_daily_cap() {
    let app = TestApp::spawn().await;
    for _ in 0..3 {
        app.seed_prospect(&NewProspect::qualified("florist")).await;
    }
    let id = app.seed_campaign(&campaign_body("florist", 2)).await;

    let report: Value = app.campaign_start(&id, None).await.unwrap().json().await.unwrap();

    assert_eq!(2, report["scheduled"]);
    assert_eq!(1, report["deferred"]);
}

#[tokio::test]
async fn stats_reject_unknown_periods() {
    let app = TestApp::spawn().await;
    let id = app.seed_campaign(&campaign_body("florist", 10)).await;

    let res = app.campaign_stats(&id, Some("90d")).await.unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, res.status());

    let res = app.campaign_stats(&id, Some("all")).await.unwrap();
    assert_eq!(StatusCode::OK, res.status());
    let stats: Value = res.json().await.unwrap();
    assert_eq!("all", stats["period"]);
    assert_eq!(0, stats["total_queued"]);
    assert_eq!(0.0, stats["rates"]["open_rate"]);
}
