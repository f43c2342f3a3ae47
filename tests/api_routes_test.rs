mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
};
use serde_json::Value;

use common::TestApp;

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn liveness_reports_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn readiness_pings_database() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health/ready", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "Lingua Commerce API");
    assert!(body["paths"]["/api/v1/payments/gateway"].is_object());
}

#[tokio::test]
async fn incoming_request_id_is_echoed() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.headers()["x-request-id"], "trace-42");
}

#[tokio::test]
async fn request_id_is_generated_when_missing() {
    let app = TestApp::new().await;
    let response = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert!(!id.is_empty());
}

#[tokio::test]
async fn error_body_carries_request_id() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::builder()
                .uri(format!("/api/v1/orders/{}", uuid::Uuid::new_v4()))
                .header("x-request-id", "missing-order-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["request_id"], "missing-order-1");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn success_body_carries_request_metadata() {
    let app = TestApp::new().await;
    let user = app.seed_user("noor").await;
    let response = app
        .send(
            Request::builder()
                .uri(format!("/api/v1/orders/user/{user}"))
                .header("x-request-id", "list-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["meta"]["request_id"], "list-1");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/orders")
                .header("content-type", "application/json")
                .body(Body::from("{ not json"))
                .unwrap(),
        )
        .await;

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn malformed_path_id_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(Method::GET, "/api/v1/payments/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
