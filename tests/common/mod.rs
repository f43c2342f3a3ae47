#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use lingua_commerce::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{lesson, order, payment, user},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    services::gateway::{CaptureOutcome, Checkout, CheckoutRequest, PaymentGateway},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Scripted stand-in for the redirect gateway.
///
/// Checkouts are numbered `PAY-1`, `PAY-2`, ... with approval tokens
/// `EC-1`, `EC-2`, ... Captures pop scripted outcomes and approve once the
/// script runs out.
#[derive(Default)]
pub struct FakeGateway {
    checkout_calls: AtomicUsize,
    capture_calls: AtomicUsize,
    reject_checkouts: AtomicBool,
    captures: Mutex<VecDeque<Result<CaptureOutcome, String>>>,
    last_request: Mutex<Option<CheckoutRequest>>,
    checkout_delay: Mutex<Duration>,
    capture_delay: Mutex<Duration>,
}

impl FakeGateway {
    pub fn checkout_calls(&self) -> usize {
        self.checkout_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn reject_checkouts(&self, reject: bool) {
        self.reject_checkouts.store(reject, Ordering::SeqCst);
    }

    pub fn script_capture(&self, outcome: Result<CaptureOutcome, String>) {
        self.captures.lock().unwrap().push_back(outcome);
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Holds every checkout call open so concurrent callers overlap.
    pub fn delay_checkouts(&self, delay: Duration) {
        *self.checkout_delay.lock().unwrap() = delay;
    }

    pub fn delay_captures(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, ServiceError> {
        let n = self.checkout_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request);
        let delay = *self.checkout_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.reject_checkouts.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("checkout rejected".into()));
        }
        Ok(Checkout {
            gateway_payment_id: format!("PAY-{n}"),
            approval_url: format!("https://gateway.test/checkoutnow?token=EC-{n}"),
        })
    }

    async fn capture_checkout(
        &self,
        _gateway_payment_id: &str,
        _payer_id: &str,
    ) -> Result<CaptureOutcome, ServiceError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.capture_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.captures.lock().unwrap().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(ServiceError::GatewayError(message)),
            None => Ok(CaptureOutcome::Approved),
        }
    }
}

/// Application wired over a migrated in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DbPool>,
    pub gateway: Arc<FakeGateway>,
    events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig {
            database_url: "sqlite::memory:".to_string(),
            environment: "test".to_string(),
            // A single connection keeps every query on the same in-memory database.
            db_max_connections: 1,
            db_min_connections: 1,
            ..AppConfig::default()
        })
        .await
    }

    /// File-backed SQLite in `dir`, so several pooled connections share one
    /// database and transactions really run side by side.
    pub async fn on_disk(dir: &TempDir) -> Self {
        let path = dir.path().join("lingua.db");
        Self::with_config(AppConfig {
            database_url: format!("sqlite://{}?mode=rwc", path.display()),
            environment: "test".to_string(),
            db_max_connections: 4,
            db_min_connections: 1,
            ..AppConfig::default()
        })
        .await
    }

    async fn with_config(cfg: AppConfig) -> Self {
        let pool = db::connect(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(tx));
        let gateway = Arc::new(FakeGateway::default());

        let services = AppServices::new(
            db.clone(),
            Some(event_sender.clone()),
            gateway.clone(),
            &cfg,
        );
        let state = AppState {
            db: db.clone(),
            config: cfg,
            event_sender: Some(event_sender),
            services,
        };
        let router = lingua_commerce::build_router(state.clone());

        Self {
            router,
            state,
            db,
            gateway,
            events: tokio::sync::Mutex::new(rx),
        }
    }

    pub async fn seed_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            username: Set(username.to_string()),
            email: Set(format!("{username}@example.com")),
        }
        .insert(&*self.db)
        .await
        .expect("seed user");
        id
    }

    pub async fn seed_lesson(&self, title: &str, price: Option<Decimal>) -> Uuid {
        let id = Uuid::new_v4();
        lesson::ActiveModel {
            id: Set(id),
            title: Set(title.to_string()),
            price: Set(price),
        }
        .insert(&*self.db)
        .await
        .expect("seed lesson");
        id
    }

    pub async fn order_row(&self, id: Uuid) -> Option<order::Model> {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load order")
    }

    pub async fn payment_rows(&self) -> Vec<payment::Model> {
        payment::Entity::find()
            .all(&*self.db)
            .await
            .expect("load payments")
    }

    /// Events emitted so far, in order.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().await;
        let mut drained = Vec::new();
        while let Ok(event) = rx.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Sends a fully built request and returns the untouched response.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.send(builder.body(body).expect("build request")).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// Reads a decimal that may be serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    use std::str::FromStr;
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
