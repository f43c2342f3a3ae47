pub mod common;
pub mod health;
pub mod order_items;
pub mod orders;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        catalog::DbCatalog,
        gateway::PaymentGateway,
        order_items::OrderItemService,
        orders::OrderService,
        payments::{PaymentService, PaymentSettings},
        PageSettings,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_items: Arc<OrderItemService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires the services over one pool. The user and lesson lookups are
    /// served from the same database.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let paging = PageSettings {
            default_size: config.api_default_page_size,
            max_size: config.api_max_page_size,
        };
        let catalog = Arc::new(DbCatalog::new(db_pool.clone()));

        let orders = Arc::new(
            OrderService::new(
                db_pool.clone(),
                event_sender.clone(),
                catalog.clone(),
                catalog.clone(),
            )
            .with_paging(paging),
        );
        let order_items = Arc::new(OrderItemService::new(
            db_pool.clone(),
            event_sender.clone(),
            catalog,
        ));
        let payments = Arc::new(
            PaymentService::new(
                db_pool,
                event_sender,
                gateway,
                PaymentSettings::from(&config.gateway),
            )
            .with_paging(paging),
        );

        Self {
            orders,
            order_items,
            payments,
        }
    }
}
