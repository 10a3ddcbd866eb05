//! Integration tests for reconstruction submission.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, post_json};
use recon_core::queue::DispatchQueue;

const VALID: &str = r#"{"id": 124, "input_url": "https://example.com/photos.zip", "callback_url": "https://caller.example.com/hook"}"#;

#[tokio::test]
async fn valid_submission_is_queued_once() {
    let (app, queue) = build_test_app(None);

    let response = post_json(app, "/reconstruct", VALID, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, serde_json::json!({"id": 124, "status": "queued"}));

    assert_eq!(queue.len(), 1);
    let delivery = queue.receive().await.unwrap().unwrap();
    assert_eq!(delivery.message.id, 124);
    assert_eq!(delivery.message.input_url, "https://example.com/photos.zip");
    assert_eq!(
        delivery.message.callback_url.as_deref(),
        Some("https://caller.example.com/hook")
    );
}

#[tokio::test]
async fn versioned_route_and_original_field_names() {
    let (app, queue) = build_test_app(None);
    let body = r#"{"model_id": 9, "images_zip_url": "s3://uploads/9/photos.zip"}"#;

    let response = post_json(app, "/api/v1/reconstruct", body, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let delivery = queue.receive().await.unwrap().unwrap();
    assert_eq!(delivery.message.id, 9);
    assert!(delivery.message.callback_url.is_none());
}

#[tokio::test]
async fn non_positive_id_is_rejected_and_not_queued() {
    let (app, queue) = build_test_app(None);
    let body = r#"{"id": 0, "input_url": "https://example.com/photos.zip"}"#;

    let response = post_json(app, "/reconstruct", body, &[]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json["error"].as_str().unwrap().contains("id"));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn malformed_input_url_is_rejected() {
    let (app, queue) = build_test_app(None);
    let body = r#"{"id": 5, "input_url": "not a url"}"#;

    let response = post_json(app, "/reconstruct", body, &[]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (app, queue) = build_test_app(None);

    let response = post_json(app, "/reconstruct", "{\"id\": ", &[]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn queue_outage_is_a_server_error_not_a_false_ack() {
    let (app, queue) = build_test_app(None);
    queue.set_available(false);

    let response = post_json(app, "/reconstruct", VALID, &[]).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["code"], "QUEUE_UNAVAILABLE");
    assert_ne!(json["status"], "queued");

    queue.set_available(true);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn api_key_is_enforced_when_configured() {
    let (app, queue) = build_test_app(Some("s3cret"));

    let missing = post_json(app.clone(), "/reconstruct", VALID, &[]).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = post_json(app.clone(), "/reconstruct", VALID, &[("x-api-key", "guess")]).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert!(queue.is_empty());

    let ok = post_json(app, "/reconstruct", VALID, &[("x-api-key", "s3cret")]).await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn api_key_of_equal_length_but_wrong_bytes_is_rejected() {
    let (app, queue) = build_test_app(Some("s3cret"));

    for key in ["s3creT", "S3cret", "s3cre", "s3crett"] {
        let response = post_json(app.clone(), "/reconstruct", VALID, &[("x-api-key", key)]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "key {key:?}");
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid API key");
    }
    assert!(queue.is_empty());
}
