//! Paystack gateway
//!
//! REST bindings: `POST /transaction/initialize`, `GET
//! /transaction/verify/{reference}`. Webhooks are authenticated with
//! HMAC-SHA512 over the raw body using the secret key, hex-encoded into the
//! `x-paystack-signature` header.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use uuid::Uuid;

use aeko_shared::PaymentMethod;

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{
    call_with_retry, classify_status, classify_transport, GatewayCallError, GatewayOutcome,
    IntentMetadata, PaymentGateway, PaymentIntentSpec, ProviderHandle, ProviderVerification,
    WebhookEvent, PROVIDER_TIMEOUT,
};

type HmacSha512 = Hmac<Sha512>;

const PAYSTACK_BASE_URL: &str = "https://api.paystack.co";

/// Envelope shared by all Paystack API responses
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookData {
    reference: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub struct PaystackGateway {
    http: reqwest::Client,
    secret_key: String,
    callback_url: String,
    base_url: String,
}

impl PaystackGateway {
    pub fn new(secret_key: impl Into<String>, callback_url: impl Into<String>) -> PaymentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            callback_url: callback_url.into(),
            base_url: PAYSTACK_BASE_URL.to_string(),
        })
    }

    /// Point the gateway at a stand-in server (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Verify and reduce a webhook delivery.
    ///
    /// Rejects before parsing: a payload that does not authenticate is never
    /// interpreted.
    pub fn verify_webhook(&self, raw_body: &[u8], signature: &str) -> PaymentResult<WebhookEvent> {
        let expected = Self::sign(&self.secret_key, raw_body);
        if !expected.eq_ignore_ascii_case(signature.trim()) {
            tracing::warn!("Paystack webhook signature mismatch");
            return Err(PaymentError::WebhookSignatureInvalid);
        }

        let payload: WebhookPayload = serde_json::from_slice(raw_body)
            .map_err(|e| PaymentError::Validation(format!("unparseable webhook body: {e}")))?;

        let transaction_id = payload
            .data
            .metadata
            .get("transaction_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Uuid>().ok());

        Ok(WebhookEvent {
            event_type: payload.event,
            reference: payload.data.reference,
            transaction_id,
        })
    }

    pub(crate) fn sign(secret_key: &str, raw_body: &[u8]) -> String {
        // HMAC accepts keys of any length; new_from_slice cannot fail
        let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn post_initialize(
        &self,
        spec: &PaymentIntentSpec,
    ) -> Result<ProviderHandle, GatewayCallError> {
        let body = serde_json::json!({
            "email": spec.email,
            "amount": spec.amount_cents,
            "currency": spec.currency,
            "reference": spec.reference,
            "callback_url": self.callback_url,
            "metadata": spec.metadata,
            "subaccount": spec.subaccount,
        });

        let response = self
            .http
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let envelope: Envelope<InitializeData> = response
            .json()
            .await
            .map_err(|e| GatewayCallError::Rejected(format!("unparseable response: {e}")))?;

        let data = match envelope {
            Envelope {
                status: true,
                data: Some(data),
                ..
            } => data,
            Envelope { message, .. } => {
                return Err(GatewayCallError::Rejected(
                    message.unwrap_or_else(|| "initialization declined".to_string()),
                ))
            }
        };

        Ok(ProviderHandle {
            provider_reference: data.reference,
            authorization_url: Some(data.authorization_url),
            client_secret: None,
            access_code: Some(data.access_code),
        })
    }

    async fn get_verify(&self, reference: &str) -> Result<ProviderVerification, GatewayCallError> {
        let response = self
            .http
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayCallError::Rejected(format!("unparseable response: {e}")))?;

        let envelope: Envelope<VerifyData> = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayCallError::Rejected(format!("unparseable response: {e}")))?;

        let charge_status = envelope.data.map(|d| d.status).unwrap_or_default();
        let success = envelope.status && charge_status == "success";

        Ok(ProviderVerification {
            success,
            message: if success {
                None
            } else {
                Some(
                    envelope
                        .message
                        .unwrap_or_else(|| format!("charge status: {charge_status}")),
                )
            },
            raw,
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paystack
    }

    async fn initialize(
        &self,
        spec: &PaymentIntentSpec,
    ) -> PaymentResult<GatewayOutcome<ProviderHandle>> {
        call_with_retry("paystack.initialize", || self.post_initialize(spec)).await
    }

    async fn verify(&self, reference: &str) -> PaymentResult<GatewayOutcome<ProviderVerification>> {
        call_with_retry("paystack.verify", || self.get_verify(reference)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PaymentIntentSpec {
        PaymentIntentSpec {
            reference: "COMM-1712000000000-abc123".to_string(),
            amount_cents: 1000,
            currency: "USD".to_string(),
            email: "u@x".to_string(),
            metadata: IntentMetadata {
                user_id: Uuid::new_v4(),
                community_id: Some(Uuid::new_v4()),
                plan_id: None,
                transaction_id: Uuid::new_v4(),
                kind: "community_membership",
            },
            subaccount: Some("SUB_acct".to_string()),
        }
    }

    fn gateway(base_url: String) -> PaystackGateway {
        PaystackGateway::new("sk_test_secret", "https://app.aeko.test/payment/verify")
            .unwrap()
            .with_base_url(base_url)
    }

    #[tokio::test]
    async fn initialize_returns_authorization_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":true,"message":"Authorization URL created","data":{
                    "authorization_url":"https://checkout.paystack.com/xyz",
                    "access_code":"xyz","reference":"COMM-1712000000000-abc123"}}"#,
            )
            .create_async()
            .await;

        let outcome = gateway(server.url()).initialize(&spec()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(outcome.retries, 0);
        assert_eq!(
            outcome.value.authorization_url.as_deref(),
            Some("https://checkout.paystack.com/xyz")
        );
        assert_eq!(outcome.value.provider_reference, "COMM-1712000000000-abc123");
    }

    #[tokio::test]
    async fn initialize_retries_once_on_5xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .with_status(503)
            .with_body("upstream down")
            .expect(2)
            .create_async()
            .await;

        let err = gateway(server.url()).initialize(&spec()).await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, PaymentError::ProviderTransient(_)));
    }

    #[tokio::test]
    async fn initialize_does_not_retry_4xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .with_status(400)
            .with_body(r#"{"status":false,"message":"Invalid key"}"#)
            .expect(1)
            .create_async()
            .await;

        let err = gateway(server.url()).initialize(&spec()).await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, PaymentError::ProviderRejected(_)));
    }

    #[tokio::test]
    async fn verify_reports_charge_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/COMM-1712000000000-abc123")
            .with_status(200)
            .with_body(r#"{"status":true,"message":"Verification successful","data":{"status":"success"}}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url())
            .verify("COMM-1712000000000-abc123")
            .await
            .unwrap();
        assert!(outcome.value.success);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/COMM-1712000000000-abc123")
            .with_status(200)
            .with_body(r#"{"status":true,"message":"Verification successful","data":{"status":"abandoned"}}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url())
            .verify("COMM-1712000000000-abc123")
            .await
            .unwrap();
        assert!(!outcome.value.success);
        assert!(outcome.value.message.unwrap().contains("abandoned"));
    }

    #[test]
    fn webhook_accepts_valid_signature() {
        let gw = PaystackGateway::new("sk_test_secret", "https://app.aeko.test").unwrap();
        let txn_id = Uuid::new_v4();
        let body = serde_json::json!({
            "event": "charge.success",
            "data": {
                "reference": "COMM-1712000000000-abc123",
                "metadata": { "transaction_id": txn_id.to_string() }
            }
        })
        .to_string();

        let signature = PaystackGateway::sign("sk_test_secret", body.as_bytes());
        let event = gw.verify_webhook(body.as_bytes(), &signature).unwrap();

        assert_eq!(event.event_type, "charge.success");
        assert_eq!(event.reference.as_deref(), Some("COMM-1712000000000-abc123"));
        assert_eq!(event.transaction_id, Some(txn_id));
    }

    #[test]
    fn webhook_rejects_tampered_body() {
        let gw = PaystackGateway::new("sk_test_secret", "https://app.aeko.test").unwrap();
        let body = br#"{"event":"charge.success","data":{"reference":"COMM-1-a"}}"#;
        let signature = PaystackGateway::sign("sk_test_secret", body);

        let mut tampered = body.to_vec();
        tampered.extend_from_slice(b" ");
        let err = gw.verify_webhook(&tampered, &signature).unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignatureInvalid));
    }

    #[test]
    fn webhook_rejects_wrong_secret() {
        let gw = PaystackGateway::new("sk_live_other", "https://app.aeko.test").unwrap();
        let body = br#"{"event":"charge.success","data":{}}"#;
        let signature = PaystackGateway::sign("sk_test_secret", body);
        assert!(gw.verify_webhook(body, &signature).is_err());
    }
}
