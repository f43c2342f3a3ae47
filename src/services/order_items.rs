use crate::{
    db::DbPool,
    entities::{
        order,
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::LessonCatalog,
        orders::{lock_order, recompute_order_total, OrderItemResponse},
    },
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReplaceOrderItemRequest {
    /// Order the line belongs to afterwards; may differ from the current one
    pub order_id: Uuid,
    pub lesson_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Price at purchase recorded on the line
    pub unit_price: Decimal,
}

#[derive(Clone)]
pub struct OrderItemService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    lessons: Arc<dyn LessonCatalog>,
}

impl OrderItemService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        lessons: Arc<dyn LessonCatalog>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            lessons,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    #[instrument(skip(self))]
    pub async fn get_line_item(&self, item_id: Uuid) -> Result<OrderItemResponse, ServiceError> {
        OrderItemEntity::find_by_id(item_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, item_id = %item_id, "Failed to fetch line item");
                ServiceError::DatabaseError(e)
            })?
            .map(OrderItemResponse::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))
    }

    #[instrument(skip(self))]
    pub async fn list_items_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemResponse>, ServiceError> {
        let db = &*self.db_pool;

        if order::Entity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to list line items");
                ServiceError::DatabaseError(e)
            })?;

        Ok(items.into_iter().map(OrderItemResponse::from).collect())
    }

    /// Overwrites a line item and recomputes the totals of every order it
    /// touched, the previous order first.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, lesson_id = %request.lesson_id))]
    pub async fn replace_line_item(
        &self,
        item_id: Uuid,
        request: ReplaceOrderItemRequest,
    ) -> Result<OrderItemResponse, ServiceError> {
        request.validate()?;
        if request.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "unit_price must not be negative".to_string(),
            ));
        }

        if self.lessons.find_lesson(request.lesson_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Lesson {} not found",
                request.lesson_id
            )));
        }

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for line item replacement");
            ServiceError::DatabaseError(e)
        })?;

        let existing = OrderItemEntity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?;
        let previous_order_id = existing.order_id;
        let moved = previous_order_id != request.order_id;

        // Fixed lock order so two moves in opposite directions cannot deadlock.
        let mut to_lock = vec![previous_order_id, request.order_id];
        to_lock.sort();
        to_lock.dedup();
        for order_id in to_lock {
            lock_order(&txn, order_id).await?;
        }

        let mut active: order_item::ActiveModel = existing.into();
        active.order_id = Set(request.order_id);
        active.lesson_id = Set(request.lesson_id);
        active.quantity = Set(request.quantity);
        active.unit_price = Set(request.unit_price);
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, item_id = %item_id, "Failed to replace line item");
            ServiceError::DatabaseError(e)
        })?;

        let mut recomputed = Vec::with_capacity(2);
        if moved {
            recomputed.push(recompute_order_total(&txn, previous_order_id).await?);
        }
        recomputed.push(recompute_order_total(&txn, request.order_id).await?);

        txn.commit().await.map_err(|e| {
            error!(error = %e, item_id = %item_id, "Failed to commit line item replacement");
            ServiceError::DatabaseError(e)
        })?;

        info!(item_id = %item_id, moved, "Line item replaced");
        self.emit(Event::OrderItemReplaced {
            item_id,
            order_id: request.order_id,
            previous_order_id,
        })
        .await;
        for order in recomputed {
            self.emit(Event::OrderTotalRecalculated {
                order_id: order.id,
                total_amount: order.total_amount,
            })
            .await;
        }

        Ok(OrderItemResponse::from(updated))
    }

    /// Removes a line item and recomputes its order's total
    #[instrument(skip(self))]
    pub async fn delete_line_item(&self, item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for line item deletion");
            ServiceError::DatabaseError(e)
        })?;

        let existing = OrderItemEntity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                warn!(item_id = %item_id, "Line item not found for deletion");
                ServiceError::NotFound(format!("Order item {} not found", item_id))
            })?;
        let order_id = existing.order_id;

        lock_order(&txn, order_id).await?;

        OrderItemEntity::delete_by_id(item_id)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, item_id = %item_id, "Failed to delete line item");
                ServiceError::DatabaseError(e)
            })?;

        let order = recompute_order_total(&txn, order_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, item_id = %item_id, "Failed to commit line item deletion");
            ServiceError::DatabaseError(e)
        })?;

        info!(item_id = %item_id, order_id = %order_id, "Line item deleted");
        self.emit(Event::OrderItemDeleted { item_id, order_id }).await;
        self.emit(Event::OrderTotalRecalculated {
            order_id,
            total_amount: order.total_amount,
        })
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::mocks::MockLessons;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::DatabaseConnection;

    fn service(lessons: MockLessons) -> OrderItemService {
        OrderItemService::new(
            Arc::new(DatabaseConnection::Disconnected),
            None,
            Arc::new(lessons),
        )
    }

    fn request(quantity: i32, unit_price: Decimal) -> ReplaceOrderItemRequest {
        ReplaceOrderItemRequest {
            order_id: Uuid::new_v4(),
            lesson_id: Uuid::new_v4(),
            quantity,
            unit_price,
        }
    }

    #[tokio::test]
    async fn rejects_zero_quantity_and_negative_price() {
        let mut lessons = MockLessons::new();
        lessons.expect_find_lesson().never();
        let service = service(lessons);

        let err = service
            .replace_line_item(Uuid::new_v4(), request(0, dec!(10.00)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let err = service
            .replace_line_item(Uuid::new_v4(), request(1, dec!(-1)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn unknown_lesson_is_not_found() {
        let mut lessons = MockLessons::new();
        lessons.expect_find_lesson().returning(|_| Ok(None));

        let err = service(lessons)
            .replace_line_item(Uuid::new_v4(), request(2, dec!(10.00)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }
}
