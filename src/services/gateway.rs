use crate::{config::GatewayConfig, errors::ServiceError};
use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Error names the provider uses when the payer's instrument is refused.
const DENIAL_NAMES: [&str; 3] = ["INSTRUMENT_DECLINED", "PAYMENT_DENIED", "TRANSACTION_REFUSED"];

/// Returned when an execute is replayed for a payment the provider already settled.
const ALREADY_DONE: &str = "PAYMENT_ALREADY_DONE";

/// Refresh the cached OAuth token this long before the provider expires it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub intent: String,
    pub description: Option<String>,
    pub cancel_url: String,
    pub success_url: String,
}

/// A checkout the payer still has to approve at `approval_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub gateway_payment_id: String,
    pub approval_url: String,
}

impl Checkout {
    /// The `token` query parameter of the approval URL, echoed back by the
    /// provider on the cancel redirect.
    pub fn token(&self) -> Option<String> {
        checkout_token(&self.approval_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Approved,
    Denied,
    Pending,
}

/// Redirect-based checkout provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a checkout with the provider. Has no local side effects.
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, ServiceError>;

    /// Executes an approved checkout. A refused instrument is `Denied`, not
    /// an error.
    async fn capture_checkout(
        &self,
        gateway_payment_id: &str,
        payer_id: &str,
    ) -> Result<CaptureOutcome, ServiceError>;
}

pub fn checkout_token(approval_url: &str) -> Option<String> {
    let parsed = url::Url::parse(approval_url).ok()?;
    let token = parsed
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned());
    token
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    intent: &'a str,
    payer: PayerBody<'a>,
    transactions: Vec<TransactionBody<'a>>,
    redirect_urls: RedirectUrls<'a>,
}

#[derive(Debug, Serialize)]
struct PayerBody<'a> {
    payment_method: &'a str,
}

#[derive(Debug, Serialize)]
struct TransactionBody<'a> {
    amount: AmountBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct AmountBody<'a> {
    total: String,
    currency: &'a str,
}

#[derive(Debug, Serialize)]
struct RedirectUrls<'a> {
    return_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Serialize)]
struct ExecuteBody<'a> {
    payer_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentResource {
    id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    links: Vec<LinkDescription>,
}

#[derive(Debug, Deserialize)]
struct LinkDescription {
    href: String,
    rel: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderError {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// REST client for a PayPal-style v1 payments API.
pub struct PayPalGateway {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalGateway {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lingua-commerce/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, ServiceError> {
        Self::new(
            config.base_url.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.timeout(),
        )
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!(status = %status, "Gateway rejected client credentials");
            return Err(ServiceError::GatewayError(format!(
                "authentication failed with status {}",
                status
            )));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(0))
            .saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(body.access_token)
    }

    async fn provider_error(response: reqwest::Response) -> ProviderError {
        response.json::<ProviderError>().await.unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, ServiceError> {
        counter!("lingua_gateway.requests", 1, "operation" => "create_checkout");
        let token = self.access_token().await?;

        let body = CreatePaymentBody {
            intent: &request.intent,
            payer: PayerBody {
                payment_method: &request.method,
            },
            transactions: vec![TransactionBody {
                amount: AmountBody {
                    total: format!("{:.2}", request.amount),
                    currency: &request.currency,
                },
                description: request.description.as_deref(),
            }],
            redirect_urls: RedirectUrls {
                return_url: &request.success_url,
                cancel_url: &request.cancel_url,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/payments/payment", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let provider = Self::provider_error(response).await;
            warn!(status = %status, name = %provider.name, "Gateway rejected checkout");
            counter!("lingua_gateway.failures", 1, "operation" => "create_checkout");
            return Err(ServiceError::GatewayError(format!(
                "checkout rejected with status {}: {} {}",
                status, provider.name, provider.message
            )));
        }

        let payment: PaymentResource = response.json().await?;
        let approval_url = payment
            .links
            .into_iter()
            .find(|link| link.rel == "approval_url")
            .map(|link| link.href)
            .ok_or_else(|| {
                error!(gateway_payment_id = %payment.id, "Checkout response has no approval link");
                ServiceError::GatewayError("checkout response has no approval_url link".into())
            })?;

        info!(gateway_payment_id = %payment.id, "Checkout created");
        Ok(Checkout {
            gateway_payment_id: payment.id,
            approval_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture_checkout(
        &self,
        gateway_payment_id: &str,
        payer_id: &str,
    ) -> Result<CaptureOutcome, ServiceError> {
        counter!("lingua_gateway.requests", 1, "operation" => "capture_checkout");
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v1/payments/payment/{}/execute",
                self.base_url, gateway_payment_id
            ))
            .bearer_auth(token)
            .json(&ExecuteBody { payer_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let provider = Self::provider_error(response).await;
            if status.is_client_error() && DENIAL_NAMES.contains(&provider.name.as_str()) {
                info!(name = %provider.name, "Gateway denied the payment");
                return Ok(CaptureOutcome::Denied);
            }
            if status.is_client_error() && provider.name == ALREADY_DONE {
                info!(gateway_payment_id = %gateway_payment_id, "Checkout was already executed");
                return Ok(CaptureOutcome::Approved);
            }
            counter!("lingua_gateway.failures", 1, "operation" => "capture_checkout");
            error!(status = %status, name = %provider.name, "Gateway capture failed");
            return Err(ServiceError::GatewayError(format!(
                "capture failed with status {}: {} {}",
                status, provider.name, provider.message
            )));
        }

        let payment: PaymentResource = response.json().await?;
        let outcome = match payment.state.as_deref() {
            Some("approved") => CaptureOutcome::Approved,
            Some("failed") => CaptureOutcome::Denied,
            _ => CaptureOutcome::Pending,
        };
        info!(gateway_payment_id = %payment.id, ?outcome, "Checkout executed");
        Ok(outcome)
    }
}
