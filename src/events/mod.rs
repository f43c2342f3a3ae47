use crate::entities::{OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event after a commit. Delivery failures are logged and dropped
    /// because the state change they describe is already durable.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Domain event was not delivered");
        }
    }
}

/// Domain events emitted after each committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderDeleted(Uuid),
    OrderTotalRecalculated {
        order_id: Uuid,
        total_amount: Decimal,
    },
    OrderItemReplaced {
        item_id: Uuid,
        order_id: Uuid,
        previous_order_id: Uuid,
    },
    OrderItemDeleted {
        item_id: Uuid,
        order_id: Uuid,
    },

    // Payment events
    PaymentCreated {
        payment_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentCheckoutStarted {
        payment_id: Uuid,
        order_id: Uuid,
        transaction_id: String,
    },
    PaymentCompleted {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentCancelled {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentDeleted {
        payment_id: Uuid,
        order_id: Uuid,
        last_status: PaymentStatus,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderDeleted(_) => "order_deleted",
            Event::OrderTotalRecalculated { .. } => "order_total_recalculated",
            Event::OrderItemReplaced { .. } => "order_item_replaced",
            Event::OrderItemDeleted { .. } => "order_item_deleted",
            Event::PaymentCreated { .. } => "payment_created",
            Event::PaymentCheckoutStarted { .. } => "payment_checkout_started",
            Event::PaymentCompleted { .. } => "payment_completed",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::PaymentCancelled { .. } => "payment_cancelled",
            Event::PaymentDeleted { .. } => "payment_deleted",
        }
    }

    /// The order every event ultimately concerns.
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::OrderTotalRecalculated { order_id, .. }
            | Event::OrderItemReplaced { order_id, .. }
            | Event::OrderItemDeleted { order_id, .. }
            | Event::PaymentCreated { order_id, .. }
            | Event::PaymentCheckoutStarted { order_id, .. }
            | Event::PaymentCompleted { order_id, .. }
            | Event::PaymentFailed { order_id, .. }
            | Event::PaymentCancelled { order_id, .. }
            | Event::PaymentDeleted { order_id, .. } => *order_id,
            Event::OrderDeleted(order_id) => *order_id,
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> usize {
    info!("Starting event processing loop");
    let mut processed = 0usize;

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentFailed { payment_id, .. } => {
                warn!(
                    event = event.name(),
                    order_id = %event.order_id(),
                    payment_id = %payment_id,
                    "Payment was denied by the gateway"
                );
            }
            _ => {
                info!(
                    event = event.name(),
                    order_id = %event.order_id(),
                    payload = ?event,
                    "Domain event"
                );
            }
        }
        processed += 1;
    }

    info!(processed, "Event processing loop stopped");
    processed
}
