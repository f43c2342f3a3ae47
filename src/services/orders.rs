use crate::{
    db::DbPool,
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        payment, user, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{LessonCatalog, UserDirectory},
        total_pages, PageSettings,
    },
    PaginatedResponse,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, LoaderTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderLineRequest {
    pub lesson_id: Uuid,
    #[schema(minimum = 1)]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, message = "An order needs at least one line item"))]
    pub items: Vec<OrderLineRequest>,
    #[validate(length(max = 1000))]
    pub shipping_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1))]
    #[schema(example = "CANCELLED")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub lesson_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<OrderItemModel> for OrderItemResponse {
    fn from(model: OrderItemModel) -> Self {
        Self {
            line_total: model.line_total(),
            id: model.id,
            order_id: model.order_id,
            lesson_id: model.lesson_id,
            quantity: model.quantity,
            unit_price: model.unit_price,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub shipping_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    fn from_parts(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            total_amount: order.total_amount,
            shipping_note: order.shipping_note,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items.into_iter().map(OrderItemResponse::from).collect(),
        }
    }
}

/// Filters for order search. Every filter is optional and they combine with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OrderSearchParams {
    pub user_id: Option<Uuid>,
    /// PENDING, PROCESSING, COMPLETED or CANCELLED
    pub status: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// Case-insensitive substring of the ordering user's username
    pub username: Option<String>,
    /// Zero-based page number
    pub page: Option<i64>,
    pub size: Option<i64>,
    /// id, created_at, total_amount or status
    pub sort_by: Option<String>,
    /// asc or desc
    pub sort_dir: Option<String>,
}

/// Locks the order row for the rest of the transaction.
pub(crate) async fn lock_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<OrderModel, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to lock order");
            ServiceError::DatabaseError(e)
        })?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Recomputes `total_amount` from the order's current line items.
///
/// Must run inside the transaction that changed the items.
pub(crate) async fn recompute_order_total<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<OrderModel, ServiceError> {
    let order = lock_order(conn, order_id).await?;

    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to load line items for total");
            ServiceError::DatabaseError(e)
        })?;
    let total = compute_total(items.iter().map(|i| (i.unit_price, i.quantity)));

    if order.total_amount == total {
        return Ok(order);
    }

    let mut active: OrderActiveModel = order.into();
    active.total_amount = Set(total);
    let updated = active.update(conn).await.map_err(|e| {
        error!(error = %e, order_id = %order_id, "Failed to store recomputed total");
        ServiceError::DatabaseError(e)
    })?;

    info!(order_id = %order_id, total = %total, "Order total recomputed");
    Ok(updated)
}

/// Writes a status without consulting the transition table. Used when a
/// payment outcome dictates the order state.
pub(crate) async fn force_order_status<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
    status: OrderStatus,
) -> Result<OrderModel, ServiceError> {
    if order.status == status {
        return Ok(order);
    }
    let order_id = order.id;
    let mut active: OrderActiveModel = order.into();
    active.status = Set(status);
    active.update(conn).await.map_err(|e| {
        error!(error = %e, order_id = %order_id, "Failed to update order status");
        ServiceError::DatabaseError(e)
    })
}

/// Σ(unit_price × quantity).
pub fn compute_total(lines: impl IntoIterator<Item = (Decimal, i32)>) -> Decimal {
    lines
        .into_iter()
        .map(|(price, quantity)| price * Decimal::from(quantity))
        .sum()
}

/// Service for the order aggregate: creation, status, deletion and search
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    users: Arc<dyn UserDirectory>,
    lessons: Arc<dyn LessonCatalog>,
    paging: PageSettings,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        users: Arc<dyn UserDirectory>,
        lessons: Arc<dyn LessonCatalog>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            users,
            lessons,
            paging: PageSettings::default(),
        }
    }

    pub fn with_paging(mut self, paging: PageSettings) -> Self {
        self.paging = paging;
        self
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    /// Prices every line from the catalog and persists the order with its
    /// items and total atomically.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        if let Some(line) = request.items.iter().find(|line| line.quantity < 1) {
            warn!(lesson_id = %line.lesson_id, quantity = line.quantity, "Rejected non-positive quantity");
            return Err(ServiceError::ValidationError(format!(
                "Quantity for lesson {} must be at least 1",
                line.lesson_id
            )));
        }

        if self.users.find_user(request.user_id).await?.is_none() {
            warn!(user_id = %request.user_id, "Order for unknown user");
            return Err(ServiceError::ValidationError(format!(
                "User {} does not exist",
                request.user_id
            )));
        }

        let mut priced_lines = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let lesson = self
                .lessons
                .find_lesson(line.lesson_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Lesson {} not found", line.lesson_id))
                })?;
            let price = match lesson.price {
                Some(price) if price >= Decimal::ZERO => price,
                Some(_) | None => {
                    warn!(lesson_id = %lesson.id, "Lesson has no usable price");
                    return Err(ServiceError::ValidationError(format!(
                        "Lesson {} has no price",
                        lesson.id
                    )));
                }
            };
            priced_lines.push((line.lesson_id, line.quantity, price));
        }

        let total = compute_total(priced_lines.iter().map(|(_, q, p)| (*p, *q)));
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(request.user_id),
            created_at: Set(now),
            total_amount: Set(total),
            status: Set(OrderStatus::Pending),
            shipping_note: Set(request.shipping_note.clone()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(priced_lines.len());
        for (lesson_id, quantity, unit_price) in priced_lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                lesson_id: Set(lesson_id),
                quantity: Set(quantity),
                unit_price: Set(unit_price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, lesson_id = %lesson_id, "Failed to insert line item");
                ServiceError::DatabaseError(e)
            })?;
            items.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        counter!("lingua_orders.created", 1);
        info!(order_id = %order_id, total = %total, "Order created successfully");

        self.emit(Event::OrderCreated {
            order_id,
            user_id: request.user_id,
            total_amount: total,
        })
        .await;

        Ok(OrderResponse::from_parts(order_model, items))
    }

    /// Retrieves an order with its line items
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order from database");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(OrderResponse::from_parts(order, items))
    }

    /// All orders of a user, oldest first
    #[instrument(skip(self))]
    pub async fn list_orders_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, user_id = %user_id, "Failed to list orders of user");
                ServiceError::DatabaseError(e)
            })?;

        self.with_items(orders).await
    }

    async fn with_items(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderResponse>, ServiceError> {
        let items = orders
            .load_many(OrderItemEntity, &*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(orders
            .into_iter()
            .zip(items)
            .map(|(order, items)| OrderResponse::from_parts(order, items))
            .collect())
    }

    /// Filtered, paginated order search
    #[instrument(skip(self, params))]
    pub async fn search_orders(
        &self,
        params: OrderSearchParams,
    ) -> Result<PaginatedResponse<OrderResponse>, ServiceError> {
        let (page, size) = self.paging.normalize(params.page, params.size);
        let mut query = OrderEntity::find();

        if let Some(user_id) = params.user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        if let Some(raw) = params.status.as_deref().filter(|s| !s.trim().is_empty()) {
            let status = OrderStatus::from_str(raw.trim()).map_err(|_| {
                ServiceError::ValidationError(format!("Unknown order status '{}'", raw))
            })?;
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(from) = params.created_from {
            query = query.filter(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = params.created_to {
            query = query.filter(order::Column::CreatedAt.lte(to));
        }
        if let Some(min) = params.min_amount {
            query = query.filter(order::Column::TotalAmount.gte(min));
        }
        if let Some(max) = params.max_amount {
            query = query.filter(order::Column::TotalAmount.lte(max));
        }
        if let Some(username) = params.username.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = format!("%{}%", username.trim().to_lowercase());
            query = query
                .join(JoinType::InnerJoin, order::Relation::User.def())
                .filter(
                    Expr::expr(Func::lower(Expr::col((user::Entity, user::Column::Username))))
                        .like(pattern),
                );
        }

        let direction = match params.sort_dir.as_deref() {
            Some(dir) if dir.eq_ignore_ascii_case("desc") => Order::Desc,
            _ => Order::Asc,
        };
        let sort_key = params
            .sort_by
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase());
        let sort_column = match sort_key.as_deref() {
            Some("created_at") => Some(order::Column::CreatedAt),
            Some("total_amount") => Some(order::Column::TotalAmount),
            Some("status") => Some(order::Column::Status),
            _ => None,
        };
        if let Some(column) = sort_column {
            query = query.order_by(column, direction.clone());
        }
        // id breaks ties and is the default ordering
        query = query.order_by(order::Column::Id, direction);

        let paginator = query.paginate(&*self.db_pool, size);
        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator.fetch_page(page).await.map_err(|e| {
            error!(error = %e, page, size, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        let items = self.with_items(orders).await?;
        info!(total, page, size, returned = items.len(), "Orders searched");

        Ok(PaginatedResponse {
            items,
            total,
            page,
            limit: size,
            total_pages: total_pages(total, size),
        })
    }

    /// Applies an explicit status change guarded by the transition table.
    /// An order whose payment is still open only moves with that payment.
    #[instrument(skip(self, request), fields(new_status = %request.status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let new_status = OrderStatus::from_str(request.status.trim()).map_err(|_| {
            ServiceError::ValidationError(format!("Unknown order status '{}'", request.status))
        })?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to start transaction for status update");
            ServiceError::DatabaseError(e)
        })?;

        let order = lock_order(&txn, order_id).await?;
        let old_status = order.status;

        if !old_status.can_transition_to(new_status) {
            warn!(order_id = %order_id, from = %old_status, to = %new_status, "Illegal order status transition");
            return Err(ServiceError::ValidationError(format!(
                "Order {} cannot move from {} to {}",
                order_id, old_status, new_status
            )));
        }

        if old_status != new_status {
            let open_payment = payment::Entity::find()
                .filter(payment::Column::OrderId.eq(order_id))
                .one(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?
                .filter(|p| p.status.is_open());
            if let Some(p) = open_payment {
                warn!(order_id = %order_id, payment_id = %p.id, payment_status = %p.status, "Status change blocked by open payment");
                return Err(ServiceError::Conflict(format!(
                    "Order {} has a {} payment; its status follows the payment",
                    order_id, p.status
                )));
            }
        }

        let updated = force_order_status(&txn, order, new_status).await?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update transaction");
            ServiceError::DatabaseError(e)
        })?;

        if old_status != new_status {
            info!(order_id = %order_id, old_status = %old_status, new_status = %new_status, "Order status updated successfully");
            self.emit(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        }

        Ok(OrderResponse::from_parts(updated, items))
    }

    /// Hard delete of the order, its line items and its payment
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to start transaction for order deletion");
            ServiceError::DatabaseError(e)
        })?;

        lock_order(&txn, order_id).await?;

        payment::Entity::delete_many()
            .filter(payment::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to delete order payment");
                ServiceError::DatabaseError(e)
            })?;
        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to delete order line items");
                ServiceError::DatabaseError(e)
            })?;
        OrderEntity::delete_by_id(order_id)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to delete order");
                ServiceError::DatabaseError(e)
            })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order deletion");
            ServiceError::DatabaseError(e)
        })?;

        counter!("lingua_orders.deleted", 1);
        info!(order_id = %order_id, "Order deleted");
        self.emit(Event::OrderDeleted(order_id)).await;
        Ok(())
    }
}
