//! Email notifications
//!
//! One method per template behind the `Notifier` trait so tests can swap in
//! a recording fake. Email is fire-and-forget for every caller in this
//! engine: a notifier failure is logged, never propagated.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{PaymentError, PaymentResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Probe used at startup and by health checks
    fn is_available(&self) -> bool;

    async fn send_expiration_reminder(
        &self,
        email: &str,
        community_name: &str,
        days_left: i64,
    ) -> PaymentResult<()>;

    async fn send_membership_activated(
        &self,
        email: &str,
        community_name: &str,
    ) -> PaymentResult<()>;

    async fn send_withdrawal_processed(
        &self,
        email: &str,
        community_name: &str,
        amount_cents: i64,
        currency: &str,
        success: bool,
    ) -> PaymentResult<()>;
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Resend-backed notifier. Without `RESEND_API_KEY` it runs disabled:
/// `is_available()` is false and every send is a logged no-op.
#[derive(Clone)]
pub struct EmailNotifier {
    http: reqwest::Client,
    api_key: Option<String>,
    from: String,
}

impl EmailNotifier {
    pub fn from_env() -> Self {
        let api_key = std::env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty());
        let from = std::env::var("EMAIL_FROM")
            .unwrap_or_else(|_| "Aeko <no-reply@aeko.app>".to_string());

        if api_key.is_none() {
            tracing::warn!("Email notifications not configured (missing RESEND_API_KEY)");
        }

        Self {
            http: reqwest::Client::new(),
            api_key,
            from,
        }
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> PaymentResult<()> {
        let Some(api_key) = &self.api_key else {
            tracing::debug!(to, subject, "Email notifier disabled, skipping send");
            return Ok(());
        };

        let payload = EmailPayload {
            from: &self.from,
            to: [to],
            subject,
            html,
        };

        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PaymentError::Internal(format!("email send failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Internal(format!(
                "email send failed: HTTP {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send_expiration_reminder(
        &self,
        email: &str,
        community_name: &str,
        days_left: i64,
    ) -> PaymentResult<()> {
        let subject = format!("Your {community_name} membership expires in {days_left} day(s)");
        let html = format!(
            "<p>Your membership in <strong>{community_name}</strong> expires in \
             {days_left} day(s). Renew to keep your access.</p>"
        );
        self.send(email, &subject, &html).await
    }

    async fn send_membership_activated(
        &self,
        email: &str,
        community_name: &str,
    ) -> PaymentResult<()> {
        let subject = format!("Welcome to {community_name}");
        let html = format!(
            "<p>Your payment was confirmed and your membership in \
             <strong>{community_name}</strong> is now active.</p>"
        );
        self.send(email, &subject, &html).await
    }

    async fn send_withdrawal_processed(
        &self,
        email: &str,
        community_name: &str,
        amount_cents: i64,
        currency: &str,
        success: bool,
    ) -> PaymentResult<()> {
        let amount = format!("{}.{:02} {currency}", amount_cents / 100, amount_cents % 100);
        let (subject, html) = if success {
            (
                format!("Withdrawal of {amount} completed"),
                format!(
                    "<p>Your withdrawal of {amount} from <strong>{community_name}</strong> \
                     was processed.</p>"
                ),
            )
        } else {
            (
                format!("Withdrawal of {amount} failed"),
                format!(
                    "<p>Your withdrawal of {amount} from <strong>{community_name}</strong> \
                     failed. The funds were returned to the community balance.</p>"
                ),
            )
        };
        self.send(email, &subject, &html).await
    }
}
