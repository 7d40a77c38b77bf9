use reqwest::StatusCode;

use serde_json::Value;

use crate::helpers::{NewProspect, TestApp};

#[tokio::test]
async fn create_returns_201_for_valid_data() {
    let app = TestApp::spawn().await;
    let prospect = NewProspect::qualified("florist");

    let res = app
        .prospect_create(&prospect)
        .await
        .expect("Failed to execute request");

    assert_eq!(StatusCode::CREATED, res.status());
    let body: Value = res.json().await.unwrap();
    assert_eq!(prospect.email, body["email"]);
    assert_eq!("qualified", body["status"]);
    assert_eq!(Value::Null, body["initial_outreach_at"]);
}

#[tokio::test]
async fn create_defaults_to_new_status() {
    let app = TestApp::spawn().await;
    let prospect = NewProspect {
        status: None,
        ..NewProspect::qualified("florist")
    };

    let id = app.seed_prospect(&prospect).await;
    let body: Value = app.prospect_fetch(&id).await.unwrap().json().await.unwrap();

    assert_eq!("new", body["status"]);
}

#[tokio::test]
async fn create_returns_400_for_invalid_data() {
    let app = TestApp::spawn().await;
    let valid = NewProspect::qualified("florist");
    let test_cases = vec![
        (
            NewProspect {
                email: "not-an-email".into(),
                ..valid.clone()
            },
            "invalid email",
        ),
        (
            NewProspect {
                business_name: "  ".into(),
                ..valid.clone()
            },
            "empty business name",
        ),
        (
            NewProspect {
                segment: "".into(),
                ..valid.clone()
            },
            "empty segment",
        ),
        (
            NewProspect {
                status: Some("registered".into()),
                ..valid.clone()
            },
            "status past qualified",
        ),
    ];

    for (body, description) in test_cases {
        let res = app
            .prospect_create(&body)
            .await
            .expect("Failed to execute request");

        assert_eq!(
            StatusCode::BAD_REQUEST,
            res.status(),
            "The API did not fail with 400 when the payload had an {}",
            description
        );
    }
}

#[tokio::test]
async fn create_returns_409_for_duplicate_email() {
    let app = TestApp::spawn().await;
    let prospect = NewProspect::qualified("florist");
    app.seed_prospect(&prospect).await;

    let res = app
        .prospect_create(&prospect)
        .await
        .expect("Failed to execute request");

    assert_eq!(StatusCode::CONFLICT, res.status());
}

#[tokio::test]
async fn fetch_returns_404_for_unknown_prospect() {
    let app = TestApp::spawn().await;

    let res = app
        .prospect_fetch(&uuid::Uuid::new_v4().to_string())
        .await
        .expect("Failed to execute request");

    assert_eq!(StatusCode::NOT_FOUND, res.status());
}

#[tokio::test]
async fn status_moves_forward_only() {
    let app = TestApp::spawn().await;
    let id = app.seed_prospect(&NewProspect::qualified("florist")).await;

    let res = app.prospect_set_status(&id, "registered").await.unwrap();
    assert_eq!(StatusCode::OK, res.status());
    let body: Value = res.json().await.unwrap();
    assert_eq!("registered", body["status"]);

    let res = app.prospect_set_status(&id, "qualified").await.unwrap();
    assert_eq!(StatusCode::CONFLICT, res.status());

    let res = app.prospect_set_status(&id, "bogus").await.unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, res.status());
}
