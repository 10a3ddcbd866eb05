#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use recon_api::config::ServerConfig;
use recon_api::router::build_app_router;
use recon_api::state::{AppState, ServiceInfo};
use recon_core::queue::MemoryQueue;
use tower::ServiceExt;

pub fn test_config(api_key: Option<&str>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        api_key: api_key.map(str::to_string),
    }
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo {
        provider: "meshroom".to_string(),
        binary: "/opt/meshroom/meshroom_batch".to_string(),
        pipeline: "/etc/meshroom/pipeline.mg".to_string(),
        bucket: "reconstructions".to_string(),
    }
}

/// Build the production router over an in-memory queue.
pub fn build_test_app(api_key: Option<&str>) -> (Router, Arc<MemoryQueue>) {
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(60), 3));
    let state = AppState {
        queue: queue.clone(),
        config: Arc::new(test_config(api_key)),
        service: Arc::new(service_info()),
    };
    (build_app_router(state), queue)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str, headers: &[(&str, &str)]) -> Response<Body> {
    let mut request = Request::post(uri).header("content-type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    app.oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
