mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use lingua_commerce::{
    entities::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::payments::InitiateGatewayPaymentRequest,
};
use rust_decimal_macros::dec;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use common::TestApp;

/// Seeds a 30.00 order and returns `(user_id, order_id)`.
async fn pending_order(app: &TestApp) -> (Uuid, Uuid) {
    let user_id = app.seed_user("mateo").await;
    let lesson = app.seed_lesson("Conversation club", Some(dec!(15.00))).await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "user_id": user_id, "items": [{ "lesson_id": lesson, "quantity": 2 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id = Uuid::parse_str(body["data"]["id"].as_str().unwrap()).unwrap();
    (user_id, order_id)
}

fn checkout(user_id: Uuid, order_id: Uuid) -> InitiateGatewayPaymentRequest {
    InitiateGatewayPaymentRequest {
        user_id,
        order_id,
        amount: dec!(30.00),
        cancel_url: "https://lingua.test/checkout/cancel".into(),
        success_url: "https://lingua.test/checkout/done".into(),
        description: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_checkouts_leave_one_payment() {
    let dir = TempDir::new().unwrap();
    let app = TestApp::on_disk(&dir).await;
    let (user_id, order_id) = pending_order(&app).await;
    // Both callers pass the pre-check before either writes.
    app.gateway.delay_checkouts(Duration::from_millis(100));

    let payments = &app.state.services.payments;
    let (a, b) = tokio::join!(
        payments.initiate_gateway_payment(checkout(user_id, order_id)),
        payments.initiate_gateway_payment(checkout(user_id, order_id)),
    );

    assert_eq!(app.gateway.checkout_calls(), 2);
    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (a, b) => panic!("expected exactly one checkout to win, got {a:?} and {b:?}"),
    };
    assert_matches!(lost, ServiceError::Conflict(_) | ServiceError::DatabaseError(_));

    let rows = app.payment_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, won.payment_id);
    assert_eq!(rows[0].status, PaymentStatus::Pending);
    assert_eq!(
        app.order_row(order_id).await.unwrap().status,
        OrderStatus::Processing
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_success_callbacks_capture_once() {
    let dir = TempDir::new().unwrap();
    let app = TestApp::on_disk(&dir).await;
    let (user_id, order_id) = pending_order(&app).await;

    let payments = &app.state.services.payments;
    payments
        .initiate_gateway_payment(checkout(user_id, order_id))
        .await
        .unwrap();
    app.gateway.delay_captures(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        payments.complete_gateway_payment("PAY-1", "PAYER-1"),
        payments.complete_gateway_payment("PAY-1", "PAYER-1"),
    );
    let statuses = [a.unwrap().status, b.unwrap().status];

    assert_eq!(app.gateway.capture_calls(), 1);
    assert!(statuses.contains(&PaymentStatus::Completed), "{statuses:?}");
    assert_eq!(app.payment_rows().await[0].status, PaymentStatus::Completed);
    assert_eq!(
        app.order_row(order_id).await.unwrap().status,
        OrderStatus::Completed
    );
}
