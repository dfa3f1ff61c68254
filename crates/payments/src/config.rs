//! Engine configuration
//!
//! All provider credentials come from the environment; the API and worker
//! binaries call `PaymentConfig::from_env()` once at startup and pass the
//! result down explicitly.

use crate::error::{PaymentError, PaymentResult};

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Authorization bearer for the Paystack API and HMAC key for webhooks
    pub paystack_secret_key: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// Base for callback URLs embedded in provider redirects
    pub frontend_url: String,
}

impl PaymentConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            paystack_secret_key: require("PAYSTACK_SECRET_KEY")?,
            stripe_secret_key: require("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
            frontend_url: require("FRONTEND_URL")?,
        })
    }

    /// Return-URL the member lands on after a provider-hosted payment page
    pub fn callback_url(&self) -> String {
        format!("{}/payment/verify", self.frontend_url.trim_end_matches('/'))
    }
}

fn require(name: &str) -> PaymentResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(PaymentError::Config(format!("{name} must be set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_requires_all_keys() {
        std::env::remove_var("PAYSTACK_SECRET_KEY");
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_x");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_x");
        std::env::set_var("FRONTEND_URL", "https://app.aeko.test");

        let err = PaymentConfig::from_env().unwrap_err();
        assert!(matches!(err, PaymentError::Config(msg) if msg.contains("PAYSTACK_SECRET_KEY")));
    }

    #[test]
    #[serial]
    fn callback_url_strips_trailing_slash() {
        let config = PaymentConfig {
            paystack_secret_key: "sk".into(),
            stripe_secret_key: "sk".into(),
            stripe_webhook_secret: "whsec".into(),
            frontend_url: "https://app.aeko.test/".into(),
        };
        assert_eq!(config.callback_url(), "https://app.aeko.test/payment/verify");
    }
}
