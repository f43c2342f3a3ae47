use crate::{
    config::GatewayConfig,
    db::DbPool,
    entities::{
        order::Model as OrderModel,
        payment::{self, ActiveModel as PaymentActiveModel, Entity as PaymentEntity, Model as PaymentModel},
        OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        gateway::{CaptureOutcome, CheckoutRequest, PaymentGateway},
        orders::{force_order_status, lock_order},
        total_pages, PageSettings,
    },
    PaginatedResponse,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

const MANUAL_METHOD: &str = "manual";
const CURRENCY_SCALE: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitiateGatewayPaymentRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    #[validate(url)]
    pub cancel_url: String,
    #[validate(url)]
    pub success_url: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    /// Where the payer approves the payment
    pub approval_url: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub description: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PaymentModel> for PaymentResponse {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_id: model.order_id,
            amount: model.amount,
            payment_method: model.payment_method,
            transaction_id: model.transaction_id,
            status: model.status,
            description: model.description,
            success_url: model.success_url,
            cancel_url: model.cancel_url,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PaymentSearchParams {
    pub user_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    /// PENDING, PROCESSING, COMPLETED, FAILED, REFUNDED or CANCELLED
    pub status: Option<String>,
    pub method: Option<String>,
    /// Zero-based page number
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Checkout parameters applied to every gateway payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettings {
    pub currency: String,
    pub intent: String,
    pub gateway_method: String,
    /// Decimal places the currency allows in a charged amount
    pub amount_scale: u32,
    /// How long a PROCESSING claim may sit before another callback takes it over
    pub claim_timeout: Duration,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for PaymentSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            intent: config.intent.clone(),
            gateway_method: config.default_method.clone(),
            amount_scale: CURRENCY_SCALE,
            // Outlives a capture: token call plus execute call, each bounded by the timeout.
            claim_timeout: config.timeout() * 2 + Duration::from_secs(30),
        }
    }
}

/// Compare-and-set on the payment status. Returns false when another
/// caller moved the payment first.
async fn transition_payment<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool, ServiceError> {
    debug_assert!(from.can_transition_to(to));
    let result = PaymentEntity::update_many()
        .col_expr(payment::Column::Status, Expr::value(to.to_value()))
        .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(payment::Column::Id.eq(payment_id))
        .filter(payment::Column::Status.eq(from))
        .exec(conn)
        .await
        .map_err(|e| {
            error!(error = %e, payment_id = %payment_id, from = %from, to = %to, "Failed to update payment status");
            ServiceError::DatabaseError(e)
        })?;
    Ok(result.rows_affected == 1)
}

/// Takes over a PROCESSING claim whose holder went away without finishing.
/// Only one caller wins: the claim timestamp is refreshed in the same update.
async fn reclaim_stale_payment<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
    stale_before: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let result = PaymentEntity::update_many()
        .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(payment::Column::Id.eq(payment_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Processing))
        .filter(
            Condition::any()
                .add(payment::Column::UpdatedAt.is_null())
                .add(payment::Column::UpdatedAt.lt(stale_before)),
        )
        .exec(conn)
        .await
        .map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to reclaim payment");
            ServiceError::DatabaseError(e)
        })?;
    Ok(result.rows_affected == 1)
}

async fn load_payment<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
) -> Result<PaymentModel, ServiceError> {
    PaymentEntity::find_by_id(payment_id)
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
}

async fn payment_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<PaymentModel>, ServiceError> {
    PaymentEntity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .one(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to look up payment of order");
            ServiceError::DatabaseError(e)
        })
}

fn ensure_amount_matches(order: &OrderModel, amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Payment amount must be greater than zero".to_string(),
        ));
    }
    if amount != order.total_amount {
        warn!(order_id = %order.id, expected = %order.total_amount, given = %amount, "Payment amount mismatch");
        return Err(ServiceError::ValidationError(format!(
            "Payment amount {} does not match order total {}",
            amount, order.total_amount
        )));
    }
    Ok(())
}

/// Payment lifecycle: one payment per order, kept in step with the order status
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    gateway: Arc<dyn PaymentGateway>,
    settings: PaymentSettings,
    paging: PageSettings,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        gateway: Arc<dyn PaymentGateway>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            gateway,
            settings,
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

    async fn emit_order_change(&self, order_id: Uuid, old_status: OrderStatus, new_status: OrderStatus) {
        if old_status != new_status {
            self.emit(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        }
    }

    /// Records a payment settled outside the gateway
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentResponse, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment creation");
            ServiceError::DatabaseError(e)
        })?;

        let order = lock_order(&txn, request.order_id).await?;
        ensure_amount_matches(&order, request.amount)?;

        if order.status != OrderStatus::Pending {
            warn!(order_id = %order.id, status = %order.status, "Order is not payable");
            return Err(ServiceError::Conflict(format!(
                "Order {} is {} and cannot take a payment",
                order.id, order.status
            )));
        }
        if payment_for_order(&txn, order.id).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Order {} already has a payment",
                order.id
            )));
        }

        let payment_id = Uuid::new_v4();
        let payment = PaymentActiveModel {
            id: Set(payment_id),
            user_id: Set(request.user_id),
            order_id: Set(order.id),
            amount: Set(request.amount),
            created_at: Set(Utc::now()),
            payment_method: Set(request
                .payment_method
                .clone()
                .unwrap_or_else(|| MANUAL_METHOD.to_string())),
            transaction_id: Set(format!("LOCAL-{}", Uuid::new_v4().simple())),
            status: Set(PaymentStatus::Pending),
            description: Set(request.description.clone()),
            success_url: Set(None),
            cancel_url: Set(None),
            checkout_token: Set(None),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to insert payment");
            ServiceError::from_db_conflict(e, format!("Order {} already has a payment", order.id))
        })?;

        let old_status = order.status;
        force_order_status(&txn, order, OrderStatus::Processing).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to commit payment creation");
            ServiceError::from_db_conflict(e, "Order already has a payment")
        })?;

        counter!("lingua_payments.created", 1, "channel" => "manual");
        info!(payment_id = %payment_id, "Manual payment recorded");
        self.emit(Event::PaymentCreated {
            payment_id,
            order_id: payment.order_id,
            amount: payment.amount,
        })
        .await;
        self.emit_order_change(payment.order_id, old_status, OrderStatus::Processing)
            .await;

        Ok(PaymentResponse::from(payment))
    }

    /// Starts a redirect checkout. The gateway is contacted before any row is
    /// written, so a gateway failure leaves no local state behind.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    pub async fn initiate_gateway_payment(
        &self,
        request: InitiateGatewayPaymentRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;
        if request.amount.normalize().scale() > self.settings.amount_scale {
            return Err(ServiceError::ValidationError(format!(
                "Amount {} has more than {} decimal places for {}",
                request.amount, self.settings.amount_scale, self.settings.currency
            )));
        }

        let db = &*self.db_pool;
        let order = crate::entities::order::Entity::find_by_id(request.order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", request.order_id)))?;
        Self::ensure_checkout_allowed(&order, request.amount, payment_for_order(db, order.id).await?)?;

        let checkout = self
            .gateway
            .create_checkout(CheckoutRequest {
                amount: request.amount,
                currency: self.settings.currency.clone(),
                method: self.settings.gateway_method.clone(),
                intent: self.settings.intent.clone(),
                description: request.description.clone(),
                cancel_url: request.cancel_url.clone(),
                success_url: request.success_url.clone(),
            })
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order.id, "Gateway checkout creation failed");
                counter!("lingua_payments.gateway_errors", 1, "operation" => "create_checkout");
                e
            })?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for checkout");
            ServiceError::DatabaseError(e)
        })?;

        // Re-check under the row lock; the state may have moved during the gateway call.
        let order = lock_order(&txn, request.order_id).await?;
        let existing = payment_for_order(&txn, order.id).await?;
        Self::ensure_checkout_allowed(&order, request.amount, existing.clone())?;

        if let Some(cancelled) = existing {
            PaymentEntity::delete_by_id(cancelled.id)
                .exec(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            info!(payment_id = %cancelled.id, "Replaced cancelled payment");
        }

        let payment_id = Uuid::new_v4();
        let payment = PaymentActiveModel {
            id: Set(payment_id),
            user_id: Set(request.user_id),
            order_id: Set(order.id),
            amount: Set(request.amount),
            created_at: Set(Utc::now()),
            payment_method: Set(self.settings.gateway_method.clone()),
            transaction_id: Set(checkout.gateway_payment_id.clone()),
            status: Set(PaymentStatus::Pending),
            description: Set(request.description.clone()),
            success_url: Set(Some(request.success_url.clone())),
            cancel_url: Set(Some(request.cancel_url.clone())),
            checkout_token: Set(checkout.token()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to insert gateway payment");
            ServiceError::from_db_conflict(e, format!("Order {} already has a payment", order.id))
        })?;

        let old_status = order.status;
        force_order_status(&txn, order, OrderStatus::Processing).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to commit checkout");
            ServiceError::from_db_conflict(e, "Order already has a payment")
        })?;

        counter!("lingua_payments.created", 1, "channel" => "gateway");
        info!(payment_id = %payment_id, transaction_id = %payment.transaction_id, "Gateway checkout started");
        self.emit(Event::PaymentCheckoutStarted {
            payment_id,
            order_id: payment.order_id,
            transaction_id: payment.transaction_id.clone(),
        })
        .await;
        self.emit_order_change(payment.order_id, old_status, OrderStatus::Processing)
            .await;

        Ok(CheckoutResponse {
            payment_id,
            order_id: payment.order_id,
            approval_url: checkout.approval_url,
            status: payment.status,
        })
    }

    fn ensure_checkout_allowed(
        order: &OrderModel,
        amount: Decimal,
        existing: Option<PaymentModel>,
    ) -> Result<(), ServiceError> {
        if let Some(p) = existing.as_ref().filter(|p| p.status.is_open()) {
            warn!(order_id = %order.id, payment_id = %p.id, status = %p.status, "Checkout blocked by open payment");
            return Err(ServiceError::Conflict(format!(
                "Order {} already has a {} payment",
                order.id, p.status
            )));
        }
        if order.status != OrderStatus::Pending {
            warn!(order_id = %order.id, status = %order.status, "Checkout on non-pending order");
            return Err(ServiceError::ValidationError(format!(
                "Order {} is {}; only PENDING orders can be paid",
                order.id, order.status
            )));
        }
        // Only a cancelled attempt may be replaced.
        if let Some(p) = existing.filter(|p| p.status != PaymentStatus::Cancelled) {
            warn!(order_id = %order.id, payment_id = %p.id, status = %p.status, "Checkout blocked by settled payment");
            return Err(ServiceError::Conflict(format!(
                "Order {} already has a {} payment",
                order.id, p.status
            )));
        }
        ensure_amount_matches(order, amount)
    }

    /// Handles the gateway's success redirect. Safe to call repeatedly: only
    /// the caller that claims the PENDING payment performs the capture.
    ///
    /// A PROCESSING claim older than the claim timeout belongs to a caller
    /// that never finished (dropped request, crash). The next callback takes
    /// it over and captures again; the provider treats a replayed execute as
    /// already done.
    #[instrument(skip(self))]
    pub async fn complete_gateway_payment(
        &self,
        gateway_payment_id: &str,
        payer_id: &str,
    ) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db_pool;
        let payment = PaymentEntity::find()
            .filter(payment::Column::TransactionId.eq(gateway_payment_id))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                warn!(transaction_id = %gateway_payment_id, "Completion for unknown payment");
                ServiceError::NotFound(format!("No payment for transaction {}", gateway_payment_id))
            })?;

        let claimed = match payment.status {
            PaymentStatus::Pending => {
                let order = crate::entities::order::Entity::find_by_id(payment.order_id)
                    .one(db)
                    .await
                    .map_err(ServiceError::DatabaseError)?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", payment.order_id))
                    })?;
                if order.status.is_terminal() {
                    return self.abandon_checkout(payment, order.status).await;
                }
                transition_payment(db, payment.id, PaymentStatus::Pending, PaymentStatus::Processing)
                    .await?
            }
            PaymentStatus::Processing => match self.stale_claim_cutoff() {
                Some(cutoff) if payment.updated_at.map_or(true, |at| at < cutoff) => {
                    warn!(payment_id = %payment.id, claimed_at = ?payment.updated_at, "Taking over stale capture claim");
                    reclaim_stale_payment(db, payment.id, cutoff).await?
                }
                _ => {
                    info!(payment_id = %payment.id, "Capture already in progress; skipping");
                    return Ok(PaymentResponse::from(payment));
                }
            },
            _ => {
                info!(payment_id = %payment.id, status = %payment.status, "Payment already handled; skipping capture");
                return Ok(PaymentResponse::from(payment));
            }
        };

        if !claimed {
            info!(payment_id = %payment.id, "Payment claimed by a concurrent callback");
            return Ok(PaymentResponse::from(load_payment(db, payment.id).await?));
        }

        match self.capture_and_finalize(&payment, gateway_payment_id, payer_id).await {
            Ok(finalized) => Ok(finalized),
            Err(e) => {
                warn!(error = %e, payment_id = %payment.id, "Releasing capture claim");
                if let Err(release) =
                    transition_payment(db, payment.id, PaymentStatus::Processing, PaymentStatus::Pending).await
                {
                    error!(error = %release, payment_id = %payment.id, "Failed to release capture claim");
                }
                Err(e)
            }
        }
    }

    /// Claims older than this cutoff are considered abandoned.
    fn stale_claim_cutoff(&self) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.settings.claim_timeout).ok()?;
        Utc::now().checked_sub_signed(timeout)
    }

    /// Runs the capture for a claimed payment and settles payment and order
    /// together. The caller owns the claim and releases it on error.
    async fn capture_and_finalize(
        &self,
        payment: &PaymentModel,
        gateway_payment_id: &str,
        payer_id: &str,
    ) -> Result<PaymentResponse, ServiceError> {
        let outcome = self
            .gateway
            .capture_checkout(gateway_payment_id, payer_id)
            .await
            .map_err(|e| {
                error!(error = %e, payment_id = %payment.id, "Capture failed");
                counter!("lingua_payments.gateway_errors", 1, "operation" => "capture_checkout");
                e
            })?;

        let (payment_status, order_status) = match outcome {
            CaptureOutcome::Approved => (PaymentStatus::Completed, OrderStatus::Completed),
            CaptureOutcome::Denied => (PaymentStatus::Failed, OrderStatus::Cancelled),
            CaptureOutcome::Pending => (PaymentStatus::Pending, OrderStatus::Processing),
        };

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment finalization");
            ServiceError::DatabaseError(e)
        })?;

        let order = lock_order(&txn, payment.order_id).await?;
        if !transition_payment(&txn, payment.id, PaymentStatus::Processing, payment_status).await? {
            warn!(payment_id = %payment.id, "Payment left PROCESSING during capture");
            let current = load_payment(&txn, payment.id).await?;
            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            return Ok(PaymentResponse::from(current));
        }

        if order.status != OrderStatus::Processing {
            warn!(order_id = %order.id, status = %order.status, "Order status diverged from its open payment");
        }
        let old_order_status = order.status;
        force_order_status(&txn, order, order_status).await?;
        let finalized = load_payment(&txn, payment.id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment.id, "Failed to commit payment finalization");
            ServiceError::DatabaseError(e)
        })?;

        let label = match outcome {
            CaptureOutcome::Approved => "approved",
            CaptureOutcome::Denied => "denied",
            CaptureOutcome::Pending => "pending",
        };
        counter!("lingua_payments.outcome", 1, "outcome" => label);
        info!(payment_id = %payment.id, outcome = label, "Gateway payment finalized");

        match outcome {
            CaptureOutcome::Approved => {
                self.emit(Event::PaymentCompleted {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                })
                .await
            }
            CaptureOutcome::Denied => {
                self.emit(Event::PaymentFailed {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                })
                .await
            }
            CaptureOutcome::Pending => {}
        }
        self.emit_order_change(payment.order_id, old_order_status, order_status)
            .await;

        Ok(PaymentResponse::from(finalized))
    }

    /// A checkout whose order already reached a final state is never
    /// captured; the payment is cancelled and the order left alone.
    async fn abandon_checkout(
        &self,
        payment: PaymentModel,
        order_status: OrderStatus,
    ) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db_pool;
        warn!(payment_id = %payment.id, order_id = %payment.order_id, order_status = %order_status, "Refusing to capture for a finished order");
        if !transition_payment(db, payment.id, PaymentStatus::Pending, PaymentStatus::Cancelled).await? {
            return Ok(PaymentResponse::from(load_payment(db, payment.id).await?));
        }

        counter!("lingua_payments.outcome", 1, "outcome" => "abandoned");
        self.emit(Event::PaymentCancelled {
            payment_id: payment.id,
            order_id: payment.order_id,
        })
        .await;
        Ok(PaymentResponse::from(load_payment(db, payment.id).await?))
    }

    /// Handles the gateway's cancel redirect. The order returns to PENDING
    /// so the payer can start over.
    #[instrument(skip(self))]
    pub async fn cancel_gateway_payment(&self, token: &str) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db_pool;
        let by_token = PaymentEntity::find()
            .filter(payment::Column::CheckoutToken.eq(token))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let payment = match by_token {
            Some(p) => p,
            None => PaymentEntity::find()
                .filter(payment::Column::TransactionId.eq(token))
                .one(db)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    warn!(token = %token, "Cancel for unknown checkout");
                    ServiceError::NotFound(format!("No payment for checkout token {}", token))
                })?,
        };

        if payment.status != PaymentStatus::Pending {
            info!(payment_id = %payment.id, status = %payment.status, "Cancel ignored for non-pending payment");
            return Ok(PaymentResponse::from(payment));
        }

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for checkout cancellation");
            ServiceError::DatabaseError(e)
        })?;

        let order = lock_order(&txn, payment.order_id).await?;
        if !transition_payment(&txn, payment.id, PaymentStatus::Pending, PaymentStatus::Cancelled).await? {
            let current = load_payment(&txn, payment.id).await?;
            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            return Ok(PaymentResponse::from(current));
        }

        let old_order_status = order.status;
        let new_order_status = if old_order_status == OrderStatus::Processing {
            force_order_status(&txn, order, OrderStatus::Pending).await?.status
        } else {
            old_order_status
        };
        let cancelled = load_payment(&txn, payment.id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment.id, "Failed to commit checkout cancellation");
            ServiceError::DatabaseError(e)
        })?;

        counter!("lingua_payments.outcome", 1, "outcome" => "cancelled");
        info!(payment_id = %payment.id, "Gateway checkout cancelled by payer");
        self.emit(Event::PaymentCancelled {
            payment_id: payment.id,
            order_id: payment.order_id,
        })
        .await;
        self.emit_order_change(payment.order_id, old_order_status, new_order_status)
            .await;

        Ok(PaymentResponse::from(cancelled))
    }

    #[instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentResponse, ServiceError> {
        load_payment(&*self.db_pool, payment_id)
            .await
            .map(PaymentResponse::from)
    }

    #[instrument(skip(self))]
    pub async fn get_payment_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        payment_for_order(&*self.db_pool, order_id)
            .await?
            .map(PaymentResponse::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} has no payment", order_id)))
    }

    /// Filtered payment search, newest first
    #[instrument(skip(self, params))]
    pub async fn search_payments(
        &self,
        params: PaymentSearchParams,
    ) -> Result<PaginatedResponse<PaymentResponse>, ServiceError> {
        let (page, size) = self.paging.normalize(params.page, params.size);
        let mut query = PaymentEntity::find();

        if let Some(user_id) = params.user_id {
            query = query.filter(payment::Column::UserId.eq(user_id));
        }
        if let Some(order_id) = params.order_id {
            query = query.filter(payment::Column::OrderId.eq(order_id));
        }
        if let Some(raw) = params.status.as_deref().filter(|s| !s.trim().is_empty()) {
            let status = PaymentStatus::from_str(raw.trim()).map_err(|_| {
                ServiceError::ValidationError(format!("Unknown payment status '{}'", raw))
            })?;
            query = query.filter(payment::Column::Status.eq(status));
        }
        if let Some(method) = params.method.as_deref().filter(|s| !s.trim().is_empty()) {
            query = query.filter(payment::Column::PaymentMethod.eq(method.trim()));
        }

        let paginator = query
            .order_by_desc(payment::Column::CreatedAt)
            .order_by_desc(payment::Column::Id)
            .paginate(&*self.db_pool, size);
        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count payments");
            ServiceError::DatabaseError(e)
        })?;
        let payments = paginator.fetch_page(page).await.map_err(|e| {
            error!(error = %e, page, size, "Failed to fetch payments page");
            ServiceError::DatabaseError(e)
        })?;

        Ok(PaginatedResponse {
            items: payments.into_iter().map(PaymentResponse::from).collect(),
            total,
            page,
            limit: size,
            total_pages: total_pages(total, size),
        })
    }

    /// Hard delete; the order goes back to PENDING in the same transaction
    #[instrument(skip(self))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment deletion");
            ServiceError::DatabaseError(e)
        })?;

        let payment = load_payment(&txn, payment_id).await?;
        let order = lock_order(&txn, payment.order_id).await?;

        PaymentEntity::delete_by_id(payment_id)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, payment_id = %payment_id, "Failed to delete payment");
                ServiceError::DatabaseError(e)
            })?;

        let old_order_status = order.status;
        force_order_status(&txn, order, OrderStatus::Pending).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to commit payment deletion");
            ServiceError::DatabaseError(e)
        })?;

        counter!("lingua_payments.deleted", 1);
        info!(payment_id = %payment_id, order_id = %payment.order_id, "Payment deleted");
        self.emit(Event::PaymentDeleted {
            payment_id,
            order_id: payment.order_id,
            last_status: payment.status,
        })
        .await;
        self.emit_order_change(payment.order_id, old_order_status, OrderStatus::Pending)
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{lesson, order, order_item, user};
    use crate::migrator::Migrator;
    use crate::services::gateway::Checkout;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mockall::mock;
    use rust_decimal_macros::dec;
    use sea_orm::{ConnectOptions, Database};
    use sea_orm_migration::MigratorTrait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        pub Gateway {}
        #[async_trait]
        impl PaymentGateway for Gateway {
            async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, ServiceError>;
            async fn capture_checkout(
                &self,
                gateway_payment_id: &str,
                payer_id: &str,
            ) -> Result<CaptureOutcome, ServiceError>;
        }
    }

    /// The first capture hangs until the caller gives up; later ones approve.
    #[derive(Default)]
    struct StallingGateway {
        captures: AtomicUsize,
    }

    #[async_trait]
    impl PaymentGateway for StallingGateway {
        async fn create_checkout(&self, _request: CheckoutRequest) -> Result<Checkout, ServiceError> {
            Ok(Checkout {
                gateway_payment_id: "PAY-1".into(),
                approval_url: "https://gw.example/approve?token=EC-1".into(),
            })
        }

        async fn capture_checkout(&self, _id: &str, _payer: &str) -> Result<CaptureOutcome, ServiceError> {
            if self.captures.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(CaptureOutcome::Approved)
        }
    }

    struct Fixture {
        db: Arc<DbPool>,
        user_id: Uuid,
        order_id: Uuid,
    }

    async fn fixture(total: Decimal) -> Fixture {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let user_id = Uuid::new_v4();
        let lesson_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(user_id),
            username: Set("lea".into()),
            email: Set("lea@example.com".into()),
        }
        .insert(&db)
        .await
        .unwrap();
        lesson::ActiveModel {
            id: Set(lesson_id),
            title: Set("French B2".into()),
            price: Set(Some(total)),
        }
        .insert(&db)
        .await
        .unwrap();
        order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            created_at: Set(Utc::now()),
            total_amount: Set(total),
            status: Set(OrderStatus::Pending),
            shipping_note: Set(None),
            updated_at: Set(None),
        }
        .insert(&db)
        .await
        .unwrap();
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            lesson_id: Set(lesson_id),
            quantity: Set(1),
            unit_price: Set(total),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .unwrap();

        Fixture {
            db: Arc::new(db),
            user_id,
            order_id,
        }
    }

    fn checkout_request(f: &Fixture, amount: Decimal) -> InitiateGatewayPaymentRequest {
        InitiateGatewayPaymentRequest {
            user_id: f.user_id,
            order_id: f.order_id,
            amount,
            cancel_url: "https://app.example/cancel".into(),
            success_url: "https://app.example/success".into(),
            description: None,
        }
    }

    fn approving_gateway(captures: usize) -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway.expect_create_checkout().returning(|_| {
            Ok(Checkout {
                gateway_payment_id: "PAY-1".into(),
                approval_url: "https://gw.example/approve?token=EC-1".into(),
            })
        });
        gateway
            .expect_capture_checkout()
            .withf(|id, payer| id.to_string() == "PAY-1" && payer.to_string() == "PAYER-9")
            .times(captures)
            .returning(|_, _| Ok(CaptureOutcome::Approved));
        gateway
    }

    async fn order_status(f: &Fixture) -> OrderStatus {
        order::Entity::find_by_id(f.order_id)
            .one(&*f.db)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn repeated_success_callback_captures_once() {
        let f = fixture(dec!(25.00)).await;
        let service = PaymentService::new(
            f.db.clone(),
            None,
            Arc::new(approving_gateway(1)),
            PaymentSettings::default(),
        );

        let checkout = service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.00)))
            .await
            .unwrap();
        assert_eq!(checkout.status, PaymentStatus::Pending);
        assert_eq!(order_status(&f).await, OrderStatus::Processing);

        let first = service.complete_gateway_payment("PAY-1", "PAYER-9").await.unwrap();
        let second = service.complete_gateway_payment("PAY-1", "PAYER-9").await.unwrap();

        assert_eq!(first.status, PaymentStatus::Completed);
        assert_eq!(second.status, PaymentStatus::Completed);
        assert_eq!(order_status(&f).await, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn gateway_failure_on_checkout_leaves_no_row() {
        let f = fixture(dec!(25.00)).await;
        let mut gateway = MockGateway::new();
        gateway
            .expect_create_checkout()
            .times(1)
            .returning(|_| Err(ServiceError::GatewayError("503".into())));
        let service = PaymentService::new(f.db.clone(), None, Arc::new(gateway), PaymentSettings::default());

        let err = service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.00)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::GatewayError(_));
        assert_eq!(PaymentEntity::find().count(&*f.db).await.unwrap(), 0);
        assert_eq!(order_status(&f).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn capture_error_releases_claim_for_retry() {
        let f = fixture(dec!(25.00)).await;
        let mut gateway = MockGateway::new();
        gateway.expect_create_checkout().returning(|_| {
            Ok(Checkout {
                gateway_payment_id: "PAY-1".into(),
                approval_url: "https://gw.example/approve?token=EC-1".into(),
            })
        });
        let mut seq = mockall::Sequence::new();
        gateway
            .expect_capture_checkout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ServiceError::GatewayError("timeout".into())));
        gateway
            .expect_capture_checkout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CaptureOutcome::Denied));
        let service = PaymentService::new(f.db.clone(), None, Arc::new(gateway), PaymentSettings::default());

        service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.00)))
            .await
            .unwrap();

        let err = service.complete_gateway_payment("PAY-1", "P").await.unwrap_err();
        assert_matches!(err, ServiceError::GatewayError(_));
        let payment = service.get_payment_for_order(f.order_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);

        let retried = service.complete_gateway_payment("PAY-1", "P").await.unwrap();
        assert_eq!(retried.status, PaymentStatus::Failed);
        assert_eq!(order_status(&f).await, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn amount_must_equal_order_total() {
        let f = fixture(dec!(25.00)).await;
        let mut gateway = MockGateway::new();
        gateway.expect_create_checkout().never();
        let service = PaymentService::new(f.db.clone(), None, Arc::new(gateway), PaymentSettings::default());

        let err = service
            .initiate_gateway_payment(checkout_request(&f, dec!(24.99)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let err = service
            .create_payment(CreatePaymentRequest {
                user_id: f.user_id,
                order_id: f.order_id,
                amount: dec!(0),
                payment_method: None,
                description: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn abandoned_capture_claim_is_taken_over() {
        let f = fixture(dec!(25.00)).await;
        let gateway = Arc::new(StallingGateway::default());
        let settings = PaymentSettings {
            claim_timeout: Duration::from_millis(50),
            ..PaymentSettings::default()
        };
        let service = PaymentService::new(f.db.clone(), None, gateway.clone(), settings);
        service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.00)))
            .await
            .unwrap();

        // The request is dropped mid-capture, leaving the claim behind.
        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            service.complete_gateway_payment("PAY-1", "PAYER-9"),
        )
        .await;
        assert!(dropped.is_err());
        let stuck = service.get_payment_for_order(f.order_id).await.unwrap();
        assert_eq!(stuck.status, PaymentStatus::Processing);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let redelivered = service.complete_gateway_payment("PAY-1", "PAYER-9").await.unwrap();
        assert_eq!(redelivered.status, PaymentStatus::Completed);
        assert_eq!(gateway.captures.load(Ordering::SeqCst), 2);
        assert_eq!(order_status(&f).await, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn fresh_capture_claim_is_left_alone() {
        let f = fixture(dec!(25.00)).await;
        let mut gateway = MockGateway::new();
        gateway.expect_create_checkout().returning(|_| {
            Ok(Checkout {
                gateway_payment_id: "PAY-1".into(),
                approval_url: "https://gw.example/approve?token=EC-1".into(),
            })
        });
        gateway.expect_capture_checkout().never();
        let service = PaymentService::new(f.db.clone(), None, Arc::new(gateway), PaymentSettings::default());
        let checkout = service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.00)))
            .await
            .unwrap();
        assert!(
            transition_payment(&*f.db, checkout.payment_id, PaymentStatus::Pending, PaymentStatus::Processing)
                .await
                .unwrap()
        );

        let seen = service.complete_gateway_payment("PAY-1", "PAYER-9").await.unwrap();
        assert_eq!(seen.status, PaymentStatus::Processing);
        assert_eq!(order_status(&f).await, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn checkout_on_finished_order_is_cancelled_not_captured() {
        let f = fixture(dec!(25.00)).await;
        let mut gateway = MockGateway::new();
        gateway.expect_create_checkout().returning(|_| {
            Ok(Checkout {
                gateway_payment_id: "PAY-1".into(),
                approval_url: "https://gw.example/approve?token=EC-1".into(),
            })
        });
        gateway.expect_capture_checkout().never();
        let service = PaymentService::new(f.db.clone(), None, Arc::new(gateway), PaymentSettings::default());
        service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.00)))
            .await
            .unwrap();

        let order = order::Entity::find_by_id(f.order_id)
            .one(&*f.db)
            .await
            .unwrap()
            .unwrap();
        force_order_status(&*f.db, order, OrderStatus::Cancelled)
            .await
            .unwrap();

        let result = service.complete_gateway_payment("PAY-1", "PAYER-9").await.unwrap();
        assert_eq!(result.status, PaymentStatus::Cancelled);
        assert_eq!(order_status(&f).await, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn amount_scale_is_checked_before_the_gateway() {
        let f = fixture(dec!(25.005)).await;
        let mut gateway = MockGateway::new();
        gateway.expect_create_checkout().never();
        let service = PaymentService::new(f.db.clone(), None, Arc::new(gateway), PaymentSettings::default());

        let err = service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.005)))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("decimal places"));
        // Trailing zeros do not count.
        let f = fixture(dec!(25.00)).await;
        let service = PaymentService::new(f.db.clone(), None, Arc::new(approving_gateway(0)), PaymentSettings::default());
        assert!(service
            .initiate_gateway_payment(checkout_request(&f, dec!(25.0000)))
            .await
            .is_ok());
    }

    #[test]
    fn claim_timeout_outlasts_a_full_capture() {
        let config = GatewayConfig::default();
        let settings = PaymentSettings::from(&config);
        assert!(settings.claim_timeout > config.timeout() * 2);
        assert_eq!(settings.amount_scale, 2);
    }
}
