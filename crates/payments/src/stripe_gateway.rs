//! Stripe gateway
//!
//! PaymentIntents are created and retrieved through the `async-stripe`
//! client. Webhook signatures are verified manually against the
//! `t=…,v1=…` header scheme (HMAC-SHA256 over `"{t}.{payload}"` with the
//! webhook secret, 5 minute timestamp tolerance), which keeps verification
//! independent of the SDK's pinned API version.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use aeko_shared::PaymentMethod;

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{
    call_with_retry, GatewayCallError, GatewayOutcome, PaymentGateway, PaymentIntentSpec,
    ProviderHandle, ProviderVerification, WebhookEvent, PROVIDER_TIMEOUT,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature timestamp
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct StripeEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Default, Deserialize)]
struct StripeEventObject {
    id: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub struct StripeGateway {
    client: stripe::Client,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify and reduce a webhook delivery
    pub fn verify_webhook(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> PaymentResult<WebhookEvent> {
        let payload = std::str::from_utf8(raw_body)
            .map_err(|_| PaymentError::WebhookSignatureInvalid)?;

        verify_signature(&self.webhook_secret, payload, signature_header, unix_now())?;

        let event: StripeEventPayload = serde_json::from_str(payload)
            .map_err(|e| PaymentError::Validation(format!("unparseable webhook body: {e}")))?;

        let transaction_id = event
            .data
            .object
            .metadata
            .get("transaction_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Uuid>().ok());

        Ok(WebhookEvent {
            event_type: event.event_type,
            reference: event.data.object.id,
            transaction_id,
        })
    }

    async fn create_intent(
        &self,
        spec: &PaymentIntentSpec,
    ) -> Result<ProviderHandle, GatewayCallError> {
        let currency = spec
            .currency
            .to_lowercase()
            .parse::<stripe::Currency>()
            .map_err(|_| {
                GatewayCallError::Rejected(format!("unsupported currency {}", spec.currency))
            })?;

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), spec.metadata.user_id.to_string());
        metadata.insert(
            "transaction_id".to_string(),
            spec.metadata.transaction_id.to_string(),
        );
        metadata.insert("type".to_string(), spec.metadata.kind.to_string());
        if let Some(community_id) = spec.metadata.community_id {
            metadata.insert("community_id".to_string(), community_id.to_string());
        }
        if let Some(plan_id) = spec.metadata.plan_id {
            metadata.insert("plan_id".to_string(), plan_id.to_string());
        }

        let mut params = stripe::CreatePaymentIntent::new(spec.amount_cents, currency);
        params.automatic_payment_methods = Some(stripe::CreatePaymentIntentAutomaticPaymentMethods {
            allow_redirects: None,
            enabled: true,
        });
        params.metadata = Some(metadata);
        params.receipt_email = Some(&spec.email);

        let intent = tokio::time::timeout(
            PROVIDER_TIMEOUT,
            stripe::PaymentIntent::create(&self.client, params),
        )
        .await
        .map_err(|_| GatewayCallError::Transient("stripe request timed out".to_string()))?
        .map_err(classify_stripe)?;

        Ok(ProviderHandle {
            provider_reference: intent.id.to_string(),
            authorization_url: None,
            client_secret: intent.client_secret,
            access_code: None,
        })
    }

    async fn retrieve_intent(
        &self,
        reference: &str,
    ) -> Result<ProviderVerification, GatewayCallError> {
        let id = reference.parse::<stripe::PaymentIntentId>().map_err(|e| {
            GatewayCallError::Rejected(format!("invalid payment intent id {reference}: {e}"))
        })?;

        let intent = tokio::time::timeout(
            PROVIDER_TIMEOUT,
            stripe::PaymentIntent::retrieve(&self.client, &id, &[]),
        )
        .await
        .map_err(|_| GatewayCallError::Transient("stripe request timed out".to_string()))?
        .map_err(classify_stripe)?;

        let success = intent.status == stripe::PaymentIntentStatus::Succeeded;
        let message =
            (!success).then(|| format!("payment intent status: {:?}", intent.status));
        let raw = serde_json::to_value(&intent).unwrap_or_default();

        Ok(ProviderVerification {
            success,
            message,
            raw,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    async fn initialize(
        &self,
        spec: &PaymentIntentSpec,
    ) -> PaymentResult<GatewayOutcome<ProviderHandle>> {
        call_with_retry("stripe.initialize", || self.create_intent(spec)).await
    }

    async fn verify(&self, reference: &str) -> PaymentResult<GatewayOutcome<ProviderVerification>> {
        call_with_retry("stripe.verify", || self.retrieve_intent(reference)).await
    }
}

fn classify_stripe(e: stripe::StripeError) -> GatewayCallError {
    match &e {
        stripe::StripeError::Stripe(req) if req.http_status >= 500 => {
            GatewayCallError::Transient(e.to_string())
        }
        stripe::StripeError::Timeout | stripe::StripeError::ClientError(_) => {
            GatewayCallError::Transient(e.to_string())
        }
        _ => GatewayCallError::Rejected(e.to_string()),
    }
}

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Verify the `t=…,v1=…` signature header against the raw payload
fn verify_signature(
    webhook_secret: &str,
    payload: &str,
    signature_header: &str,
    now: i64,
) -> PaymentResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => v1_signature = Some(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentError::WebhookSignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(PaymentError::WebhookSignatureInvalid)?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp,
            now,
            "Stripe webhook timestamp outside tolerance"
        );
        return Err(PaymentError::WebhookSignatureInvalid);
    }

    // The secret's "whsec_" prefix is not part of the key material
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{timestamp}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| PaymentError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::warn!("Stripe webhook signature mismatch");
        return Err(PaymentError::WebhookSignatureInvalid);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn sign(payload: &str, timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let now = 1_712_000_000;
        assert!(verify_signature(SECRET, payload, &sign(payload, now), now).is_ok());
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let now = 1_712_000_000;
        let header = sign(payload, now);
        let err = verify_signature(SECRET, r#"{"type":"charge.refunded"}"#, &header, now)
            .unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignatureInvalid));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let now = 1_712_000_000;
        let header = sign(payload, now - 301);
        assert!(verify_signature(SECRET, payload, &header, now).is_err());
        // 300 seconds is the boundary and still accepted
        let header = sign(payload, now - 300);
        assert!(verify_signature(SECRET, payload, &header, now).is_ok());
    }

    #[test]
    fn rejects_missing_v1() {
        let payload = r#"{}"#;
        let err = verify_signature(SECRET, payload, "t=1712000000", 1_712_000_000).unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignatureInvalid));
    }

    #[test]
    fn extracts_transaction_id_from_event() {
        let gw = StripeGateway::new("sk_test_x", SECRET);
        let txn_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_3abc",
                "metadata": { "transaction_id": txn_id.to_string() }
            }}
        })
        .to_string();

        let header = sign(&payload, unix_now());
        let event = gw.verify_webhook(payload.as_bytes(), &header).unwrap();

        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.reference.as_deref(), Some("pi_3abc"));
        assert_eq!(event.transaction_id, Some(txn_id));
        assert!(event.is_payment_success(PaymentMethod::Stripe));
        assert!(!event.is_payment_success(PaymentMethod::Paystack));
    }
}
