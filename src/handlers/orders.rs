use super::common::{created_response, no_content_response, success_response};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::{
    CreateOrderRequest, OrderResponse, OrderSearchParams, UpdateOrderStatusRequest,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, put},
    Router,
};
use uuid::Uuid;

/// Create an order priced from the lesson catalog
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request identifier"))
        ),
        (status = 400, description = "Invalid lines or unknown user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Lesson not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.create_order(request).await?;
    Ok(created_response(order))
}

/// Get an order with its line items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(success_response(order))
}

/// Orders placed by a user, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/orders/user/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Orders of the user", body = crate::ApiResponse<Vec<OrderResponse>>)
    ),
    tag = "Orders"
)]
pub async fn list_orders_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list_orders_by_user(user_id).await?;
    Ok(success_response(orders))
}

/// Search orders with AND-combined filters
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderSearchParams),
    responses(
        (status = 200, description = "Page of orders", body = crate::ApiResponse<crate::PaginatedResponse<OrderResponse>>),
        (status = 400, description = "Bad filter", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn search_orders(
    State(state): State<AppState>,
    Query(params): Query<OrderSearchParams>,
) -> Result<Response, ServiceError> {
    let page = state.services.orders.search_orders(params).await?;
    Ok(success_response(page))
}

/// Change an order's status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<OrderResponse>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order has an open payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .orders
        .update_order_status(id, request)
        .await?;
    Ok(success_response(order))
}

/// Delete an order together with its items and payment
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(no_content_response())
}

/// Line items of an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/items",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Line items", body = crate::ApiResponse<Vec<crate::services::orders::OrderItemResponse>>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_order_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let items = state.services.order_items.list_items_for_order(id).await?;
    Ok(success_response(items))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(search_orders).post(create_order))
        .route("/:id", get(get_order).delete(delete_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/items", get(list_order_items))
        .route("/user/:user_id", get(list_orders_by_user))
}
