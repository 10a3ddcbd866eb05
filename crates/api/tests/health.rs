//! Integration tests for the health endpoint and general HTTP behaviour.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get};

#[tokio::test]
async fn health_echoes_configuration() {
    let (app, _queue) = build_test_app(Some("s3cret"));

    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["provider"], "meshroom");
    assert_eq!(json["binary"], "/opt/meshroom/meshroom_batch");
    assert_eq!(json["pipeline"], "/etc/meshroom/pipeline.mg");
    assert_eq!(json["bucket"], "reconstructions");
    assert_eq!(json["queue_healthy"], true);
}

#[tokio::test]
async fn health_reports_degraded_queue() {
    let (app, queue) = build_test_app(None);
    queue.set_available(false);

    let json = body_json(get(app, "/health").await).await;

    assert_eq!(json["status"], "degraded");
    assert_eq!(json["queue_healthy"], false);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (app, _queue) = build_test_app(None);
    let response = get(app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn response_contains_request_id() {
    let (app, _queue) = build_test_app(None);
    let response = get(app, "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn submission_route_rejects_get() {
    let (app, _queue) = build_test_app(None);
    let response = get(app, "/reconstruct").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
