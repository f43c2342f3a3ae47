use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lingua Commerce API",
        version = "0.1.0",
        description = r#"
# Lesson orders and payments

Orders of language lessons, their line items and the single payment attached
to each order.

## Payment flow

1. `POST /api/v1/orders` prices the lessons and creates a PENDING order.
2. `POST /api/v1/payments/gateway` starts a checkout and returns the approval URL.
3. The gateway redirects the payer to `/api/v1/payments/gateway/success` or
   `/api/v1/payments/gateway/cancel`. Both are safe to deliver more than once.

Manual payments (`POST /api/v1/payments`) skip the gateway.

## Errors

```json
{
  "error": "Conflict",
  "message": "Conflict: Order 550e8400-e29b-41d4-a716-446655440000 already has a payment",
  "request_id": "req-abc123xyz",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

Search endpoints take a zero-based `page` and a `size` (default 10, max 100).
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order management endpoints"),
        (name = "Order Items", description = "Line item endpoints"),
        (name = "Payments", description = "Manual and gateway payments"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders_by_user,
        crate::handlers::orders::search_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::list_order_items,

        // Order items
        crate::handlers::order_items::get_order_item,
        crate::handlers::order_items::replace_order_item,
        crate::handlers::order_items::delete_order_item,

        // Payments
        crate::handlers::payments::create_payment,
        crate::handlers::payments::initiate_gateway_payment,
        crate::handlers::payments::gateway_success,
        crate::handlers::payments::gateway_cancel,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::delete_payment,
        crate::handlers::payments::get_order_payment,
        crate::handlers::payments::search_payments,

        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::errors::ErrorResponse,
            crate::ResponseMeta,
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Lingua Commerce API"));
        for path in [
            "/api/v1/orders/{id}/status",
            "/api/v1/order-items/{id}",
            "/api/v1/payments/gateway/success",
            "/api/v1/payments/order/{order_id}",
        ] {
            assert!(json.contains(path), "missing {path}");
        }
    }
}
