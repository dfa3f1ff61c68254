// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Aeko shared types
//!
//! Domain enums and database helpers shared by the payments engine,
//! the API server, and the background worker.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{
    BillingInterval, MemberRole, MemberStatus, PaymentMethod, PlanDuration, SubscriptionStatus,
    TransactionStatus, WithdrawalStatus,
};
