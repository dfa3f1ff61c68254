// Payments crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Notifier templates take several display fields
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Aeko Community Payment & Subscription Engine
//!
//! The server-side core behind paid communities: membership payments,
//! platform ("golden tick") subscriptions, community earnings and
//! withdrawals, and the daily expiration sweeps.
//!
//! ## Features
//!
//! - **Payment Pipeline**: initialize / verify / webhook reconciliation,
//!   idempotent by payment reference across Paystack and Stripe
//! - **Earnings Ledger**: per-community balances with an append-only
//!   withdrawal history and a pending/completed/failed state machine
//! - **Expiration Scanner**: daily close of expired subscriptions and
//!   "expiring soon" reminders with persisted de-duplication
//! - **Invariants**: runnable consistency checks over ledger state
//! - **Audit Events**: append-only trail of every money movement

pub mod config;
pub mod email;
pub mod error;
pub mod events;
pub mod gateway;
pub mod invariants;
pub mod ledger;
pub mod paystack;
pub mod pipeline;
pub mod scanner;
pub mod store;
pub mod stripe_gateway;

#[cfg(test)]
mod edge_case_tests;

// Config
pub use config::PaymentConfig;

// Email
pub use email::{EmailNotifier, Notifier};

// Error
pub use error::{PaymentError, PaymentResult};

// Events
pub use events::{PaymentEvent, PaymentEventLogger, PaymentEventType};

// Gateway
pub use gateway::{
    GatewayOutcome, IntentMetadata, PaymentGateway, PaymentIntentSpec, ProviderHandle,
    ProviderVerification, WebhookEvent,
};
pub use paystack::PaystackGateway;
pub use stripe_gateway::StripeGateway;

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{
    CommunityBalances, EarningsLedger, WithdrawalCompletion, WithdrawalReceipt, WithdrawalRequest,
    WithdrawalResolution, WithdrawalView,
};

// Pipeline
pub use pipeline::{
    InitializeRequest, InitializeResponse, PaymentPipeline, PaymentTarget, VerificationOutcome,
};

// Scanner
pub use scanner::{Clock, ExpirationScanner, ExpirySweep, ReminderSweep, SystemClock};

// Store
pub use store::Store;

use std::sync::Arc;

use sqlx::PgPool;

/// Main payment service combining the pipeline, ledger, and scanner
pub struct PaymentService {
    pub pipeline: PaymentPipeline,
    pub ledger: EarningsLedger,
    pub scanner: ExpirationScanner,
    pub invariants: InvariantChecker,
    pub notifier: Arc<EmailNotifier>,
}

impl PaymentService {
    /// Create a new payment service from environment variables
    pub fn from_env(pool: PgPool) -> PaymentResult<Self> {
        let config = PaymentConfig::from_env()?;
        Self::new(config, pool)
    }

    /// Create a new payment service with explicit config
    pub fn new(config: PaymentConfig, pool: PgPool) -> PaymentResult<Self> {
        let store = Store::new(pool.clone());
        let events = PaymentEventLogger::new(pool.clone());
        let notifier = Arc::new(EmailNotifier::from_env());

        let paystack = Arc::new(PaystackGateway::new(
            config.paystack_secret_key.clone(),
            config.callback_url(),
        )?);
        let stripe = Arc::new(StripeGateway::new(
            config.stripe_secret_key.clone(),
            config.stripe_webhook_secret.clone(),
        ));

        Ok(Self {
            pipeline: PaymentPipeline::new(
                store.clone(),
                paystack,
                stripe,
                notifier.clone(),
                events.clone(),
            ),
            ledger: EarningsLedger::new(store.clone(), events, notifier.clone()),
            scanner: ExpirationScanner::new(store, notifier.clone(), Arc::new(SystemClock)),
            invariants: InvariantChecker::new(pool),
            notifier,
        })
    }
}
