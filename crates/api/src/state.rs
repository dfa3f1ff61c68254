//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use aeko_payments::{Notifier, PaymentConfig, PaymentService};

use crate::config::ApiConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: ApiConfig,
    pub payments: Arc<PaymentService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: ApiConfig) -> anyhow::Result<Self> {
        let payment_config = PaymentConfig::from_env()?;
        let payments = Arc::new(PaymentService::new(payment_config, pool.clone())?);

        if payments.notifier.is_available() {
            tracing::info!("Email notifications enabled");
        } else {
            tracing::warn!("Email notifications not configured (missing RESEND_API_KEY)");
        }

        Ok(Self {
            pool,
            config,
            payments,
        })
    }
}
