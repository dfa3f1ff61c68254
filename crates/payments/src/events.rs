//! Payment audit events
//!
//! Append-only trail written after commits. Logging failures are reported
//! to the caller, which warns and moves on; audit writes never fail a
//! payment.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::PaymentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventType {
    MembershipGranted,
    SubscriptionGranted,
    TransactionFailed,
    WithdrawalRequested,
    WithdrawalCompleted,
    WithdrawalFailed,
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::MembershipGranted => "membership_granted",
            PaymentEventType::SubscriptionGranted => "subscription_granted",
            PaymentEventType::TransactionFailed => "transaction_failed",
            PaymentEventType::WithdrawalRequested => "withdrawal_requested",
            PaymentEventType::WithdrawalCompleted => "withdrawal_completed",
            PaymentEventType::WithdrawalFailed => "withdrawal_failed",
        }
    }
}

/// One audit row, built with the fields the event actually has
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    event_type: PaymentEventType,
    community_id: Option<Uuid>,
    user_id: Option<Uuid>,
    data: serde_json::Value,
}

impl PaymentEvent {
    pub fn new(event_type: PaymentEventType) -> Self {
        Self {
            event_type,
            community_id: None,
            user_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn community(mut self, community_id: Uuid) -> Self {
        self.community_id = Some(community_id);
        self
    }

    pub fn community_opt(mut self, community_id: Option<Uuid>) -> Self {
        self.community_id = community_id;
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Clone)]
pub struct PaymentEventLogger {
    pool: PgPool,
}

impl PaymentEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, event: PaymentEvent) -> PaymentResult<()> {
        sqlx::query(
            "INSERT INTO payment_events (community_id, user_id, event_type, data) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(event.community_id)
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_are_snake_case() {
        assert_eq!(
            PaymentEventType::MembershipGranted.as_str(),
            "membership_granted"
        );
        assert_eq!(
            PaymentEventType::WithdrawalFailed.as_str(),
            "withdrawal_failed"
        );
    }

    #[test]
    fn builder_collects_fields() {
        let community_id = Uuid::new_v4();
        let event = PaymentEvent::new(PaymentEventType::WithdrawalRequested)
            .community(community_id)
            .data(serde_json::json!({"amount_cents": 3000}));
        assert_eq!(event.community_id, Some(community_id));
        assert!(event.user_id.is_none());
    }
}
