use super::common::{created_response, no_content_response, success_response};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{
    CheckoutResponse, CreatePaymentRequest, InitiateGatewayPaymentRequest, PaymentResponse,
    PaymentSearchParams,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Query string of the gateway's success redirect
#[derive(Debug, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct GatewaySuccessParams {
    /// Gateway payment id
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    #[serde(rename = "PayerID")]
    pub payer_id: String,
}

/// Query string of the gateway's cancel redirect
#[derive(Debug, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct GatewayCancelParams {
    /// Checkout token from the approval URL
    pub token: String,
}

/// Record a manual payment for a pending order
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = crate::ApiResponse<PaymentResponse>,
            headers(("X-Request-Id" = String, description = "Unique request identifier"))
        ),
        (status = 400, description = "Amount does not match the order total", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid or in payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Response, ServiceError> {
    let payment = state.services.payments.create_payment(request).await?;
    Ok(created_response(payment))
}

/// Start a gateway checkout and return the approval URL
#[utoipa::path(
    post,
    path = "/api/v1/payments/gateway",
    request_body = InitiateGatewayPaymentRequest,
    responses(
        (status = 201, description = "Checkout started", body = crate::ApiResponse<CheckoutResponse>),
        (status = 400, description = "Order not payable, amount mismatch or too many decimal places", body = crate::errors::ErrorResponse),
        (status = 409, description = "Open payment exists", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected the checkout", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn initiate_gateway_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiateGatewayPaymentRequest>,
) -> Result<Response, ServiceError> {
    let checkout = state
        .services
        .payments
        .initiate_gateway_payment(request)
        .await?;
    Ok(created_response(checkout))
}

/// Success redirect target. Repeated deliveries return the recorded outcome.
#[utoipa::path(
    get,
    path = "/api/v1/payments/gateway/success",
    params(GatewaySuccessParams),
    responses(
        (status = 200, description = "Payment state after capture", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Unknown gateway payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Capture failed; retry later", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn gateway_success(
    State(state): State<AppState>,
    Query(params): Query<GatewaySuccessParams>,
) -> Result<Response, ServiceError> {
    let payment = state
        .services
        .payments
        .complete_gateway_payment(&params.payment_id, &params.payer_id)
        .await?;
    Ok(success_response(payment))
}

/// Cancel redirect target
#[utoipa::path(
    get,
    path = "/api/v1/payments/gateway/cancel",
    params(GatewayCancelParams),
    responses(
        (status = 200, description = "Payment state after cancellation", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Unknown checkout token", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn gateway_cancel(
    State(state): State<AppState>,
    Query(params): Query<GatewayCancelParams>,
) -> Result<Response, ServiceError> {
    let payment = state
        .services
        .payments
        .cancel_gateway_payment(&params.token)
        .await?;
    Ok(success_response(payment))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment details", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let payment = state.services.payments.get_payment(id).await?;
    Ok(success_response(payment))
}

/// Delete a payment; its order returns to PENDING
#[utoipa::path(
    delete,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 204, description = "Payment deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn delete_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.payments.delete_payment(id).await?;
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/order/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment of the order", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Order has no payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_order_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let payment = state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await?;
    Ok(success_response(payment))
}

/// Search payments, newest first
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(PaymentSearchParams),
    responses(
        (status = 200, description = "Page of payments", body = crate::ApiResponse<crate::PaginatedResponse<PaymentResponse>>),
        (status = 400, description = "Bad filter", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn search_payments(
    State(state): State<AppState>,
    Query(params): Query<PaymentSearchParams>,
) -> Result<Response, ServiceError> {
    let page = state.services.payments.search_payments(params).await?;
    Ok(success_response(page))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(search_payments).post(create_payment))
        .route("/gateway", post(initiate_gateway_payment))
        .route("/gateway/success", get(gateway_success))
        .route("/gateway/cancel", get(gateway_cancel))
        .route("/order/:order_id", get(get_order_payment))
        .route("/:id", get(get_payment).delete(delete_payment))
}
