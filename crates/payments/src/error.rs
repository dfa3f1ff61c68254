//! Error kinds surfaced by the payment engine
//!
//! These are semantic kinds, not transport codes; the API crate maps them
//! to HTTP statuses at the boundary.

use thiserror::Error;

/// Errors surfaced by the payment engine
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Shape or value violates an invariant at the boundary
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Optimistic concurrency lost after retries, or a unique-index
    /// violation outside the payment-reference path
    #[error("conflicting concurrent update: {0}")]
    Conflict(String),

    /// Another worker already inserted a transaction with this reference
    #[error("duplicate payment reference: {0}")]
    DuplicateReference(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The user already holds an active, non-expired membership
    #[error("already an active member of community {0}")]
    AlreadyMember(String),

    /// The user already holds an active, non-expired plan subscription
    #[error("already subscribed to plan {0}")]
    AlreadySubscribed(String),

    #[error("payment method {0} is not enabled for this community")]
    MethodUnavailable(String),

    #[error("payment method {0} is not fully configured for this community")]
    MethodMisconfigured(String),

    #[error("insufficient balance: requested {requested_cents} with {available_cents} available")]
    InsufficientBalance {
        requested_cents: i64,
        available_cents: i64,
    },

    /// Withdrawal completion against a non-pending withdrawal
    #[error("withdrawal {0} is not pending")]
    NotPending(String),

    /// Retriable upstream failure, surfaced after the retry budget
    #[error("payment provider unavailable: {0}")]
    ProviderTransient(String),

    /// Non-retriable upstream 4xx
    #[error("payment provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type PaymentResult<T> = Result<T, PaymentError>;

impl PaymentError {
    /// True for kinds the store transaction runner may re-run
    pub fn is_retriable_conflict(&self) -> bool {
        matches!(self, PaymentError::Conflict(_))
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            let code = db.code();
            let code = code.as_deref();
            // Serialization failure / deadlock: retriable inside with_transaction
            if code == Some("40001") || code == Some("40P01") {
                return PaymentError::Conflict(db.message().to_string());
            }
            if code == Some("23505") {
                let constraint = db.constraint().unwrap_or_default();
                if constraint.contains("transactions_reference") {
                    return PaymentError::DuplicateReference(db.message().to_string());
                }
                return PaymentError::Conflict(db.message().to_string());
            }
        }
        PaymentError::Database(e.to_string())
    }
}

impl From<aeko_shared::types::ParseEnumError> for PaymentError {
    fn from(e: aeko_shared::types::ParseEnumError) -> Self {
        PaymentError::Validation(e.to_string())
    }
}
