//! Provider gateway interface
//!
//! One uniform adapter per gateway. All outbound calls run through
//! `call_with_retry`: one retry after a 2 second backoff for network errors
//! and HTTP 5xx only; 4xx is terminal. Each attempt carries a 10 second
//! deadline. The attempt count is reported back so callers can persist it
//! onto the owning transaction for operator audit.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use uuid::Uuid;

use aeko_shared::PaymentMethod;

use crate::error::{PaymentError, PaymentResult};

/// Per-attempt deadline for provider calls
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff between the first attempt and the single retry
const RETRY_BACKOFF_MS: u64 = 2_000;

/// Retries after the first attempt
const RETRY_BUDGET: usize = 1;

/// Metadata attached to every provider intent and echoed back by webhooks
#[derive(Debug, Clone, Serialize)]
pub struct IntentMetadata {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    pub transaction_id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// A payment the engine wants the provider to collect
#[derive(Debug, Clone)]
pub struct PaymentIntentSpec {
    /// Our minted reference (`COMM-…` / `SUB-…`)
    pub reference: String,
    /// Amount in minor units
    pub amount_cents: i64,
    pub currency: String,
    pub email: String,
    pub metadata: IntentMetadata,
    /// Paystack split subaccount, when the community carries one
    pub subaccount: Option<String>,
}

/// Provider-side handle returned by `initialize`
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    /// Provider's own reference (Stripe PaymentIntent id; Paystack echoes ours)
    pub provider_reference: String,
    pub authorization_url: Option<String>,
    pub client_secret: Option<String>,
    pub access_code: Option<String>,
}

/// Result of a provider-side status check
#[derive(Debug, Clone)]
pub struct ProviderVerification {
    pub success: bool,
    pub message: Option<String>,
    pub raw: serde_json::Value,
}

/// Verified webhook event, reduced to what reconciliation needs
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    /// Reference carried by the event payload (our reference for Paystack,
    /// the PaymentIntent id for Stripe)
    pub reference: Option<String>,
    /// `transaction_id` echoed back from the intent metadata
    pub transaction_id: Option<Uuid>,
}

impl WebhookEvent {
    pub fn is_payment_success(&self, method: PaymentMethod) -> bool {
        match method {
            PaymentMethod::Paystack => self.event_type == "charge.success",
            PaymentMethod::Stripe => {
                self.event_type == "payment_intent.succeeded"
                    || self.event_type == "checkout.session.completed"
            }
            PaymentMethod::AekoWallet => false,
        }
    }
}

/// Gateway call outcome plus the attempt count actually used
#[derive(Debug)]
pub struct GatewayOutcome<T> {
    pub value: T,
    /// Retries consumed (0 or 1 under the current policy)
    pub retries: u32,
}

/// Classified failure of a single provider attempt
#[derive(Debug, thiserror::Error)]
pub enum GatewayCallError {
    /// Network error, timeout, or HTTP 5xx: eligible for one retry
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// HTTP 4xx or an unusable response body: never retried
    #[error("provider rejected: {0}")]
    Rejected(String),
}

/// Uniform adapter over Paystack and Stripe
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initialize(
        &self,
        spec: &PaymentIntentSpec,
    ) -> PaymentResult<GatewayOutcome<ProviderHandle>>;

    /// `reference` is gateway-specific: our minted reference for Paystack,
    /// the recorded PaymentIntent id for Stripe.
    async fn verify(&self, reference: &str) -> PaymentResult<GatewayOutcome<ProviderVerification>>;
}

/// Run one provider operation under the retry policy.
///
/// The operation future must already enforce `PROVIDER_TIMEOUT` per attempt
/// (the HTTP clients are constructed with it).
pub(crate) async fn call_with_retry<T, F, Fut>(
    operation: &'static str,
    f: F,
) -> PaymentResult<GatewayOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GatewayCallError>>,
{
    let attempts = AtomicU32::new(0);
    let mut f = f;

    let strategy = FixedInterval::from_millis(RETRY_BACKOFF_MS).take(RETRY_BUDGET);
    let result = RetryIf::spawn(
        strategy,
        || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n > 1 {
                tracing::warn!(operation, attempt = n, "Retrying provider call");
            }
            f()
        },
        |err: &GatewayCallError| matches!(err, GatewayCallError::Transient(_)),
    )
    .await;

    let retries = attempts.load(Ordering::SeqCst).saturating_sub(1);
    match result {
        Ok(value) => Ok(GatewayOutcome { value, retries }),
        Err(GatewayCallError::Transient(msg)) => {
            tracing::error!(operation, retries, error = %msg, "Provider call exhausted retries");
            Err(PaymentError::ProviderTransient(msg))
        }
        Err(GatewayCallError::Rejected(msg)) => {
            tracing::error!(operation, error = %msg, "Provider rejected call");
            Err(PaymentError::ProviderRejected(msg))
        }
    }
}

/// Classify a reqwest transport error for the retry policy
pub(crate) fn classify_transport(e: reqwest::Error) -> GatewayCallError {
    GatewayCallError::Transient(e.to_string())
}

/// Classify a non-success HTTP status for the retry policy
pub(crate) fn classify_status(status: reqwest::StatusCode, body: String) -> GatewayCallError {
    if status.is_server_error() {
        GatewayCallError::Transient(format!("HTTP {status}: {body}"))
    } else {
        GatewayCallError::Rejected(format!("HTTP {status}: {body}"))
    }
}
