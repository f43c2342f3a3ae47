use super::common::{no_content_response, success_response};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::{order_items::ReplaceOrderItemRequest, orders::OrderItemResponse};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::get,
    Router,
};
use uuid::Uuid;

/// Get a single line item
#[utoipa::path(
    get,
    path = "/api/v1/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Line item", body = crate::ApiResponse<OrderItemResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Order Items"
)]
pub async fn get_order_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let item = state.services.order_items.get_line_item(id).await?;
    Ok(success_response(item))
}

/// Replace a line item, possibly moving it to another order.
///
/// Totals of every affected order are recomputed in the same transaction.
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item ID")),
    request_body = ReplaceOrderItemRequest,
    responses(
        (status = 200, description = "Line item replaced", body = crate::ApiResponse<OrderItemResponse>),
        (status = 400, description = "Invalid quantity or price", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item, order or lesson not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Order Items"
)]
pub async fn replace_order_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReplaceOrderItemRequest>,
) -> Result<Response, ServiceError> {
    let item = state
        .services
        .order_items
        .replace_line_item(id, request)
        .await?;
    Ok(success_response(item))
}

#[utoipa::path(
    delete,
    path = "/api/v1/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 204, description = "Line item deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Order Items"
)]
pub async fn delete_order_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.order_items.delete_line_item(id).await?;
    Ok(no_content_response())
}

pub fn order_item_routes() -> Router<AppState> {
    Router::new().route(
        "/:id",
        get(get_order_item)
            .put(replace_order_item)
            .delete(delete_order_item),
    )
}
