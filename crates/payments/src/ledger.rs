//! Community earnings ledger
//!
//! Three balances per community — total earnings, pending withdrawals,
//! available for withdrawal — plus the append-only withdrawal history.
//! The bookkeeping rules live on `CommunityBalances` as pure transitions so
//! they are testable without a database:
//!
//! - completed payment: `total += amount`, `available += amount`
//! - withdrawal request: `pending += amount`, `available -= amount`
//! - completion success: `pending -= amount` (the funds already left
//!   `available` at request time)
//! - completion failure: `pending -= amount`, `available += amount`
//!
//! Under these rules `available <= total - pending` always holds, with
//! equality until the first completed withdrawal.

use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::Notifier;
use crate::error::{PaymentError, PaymentResult};
use crate::events::{PaymentEvent, PaymentEventLogger, PaymentEventType};
use crate::pipeline::mint_reference;
use crate::store::{CommunityRow, Store, WithdrawalRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityBalances {
    pub total_earnings_cents: i64,
    pub pending_withdrawals_cents: i64,
    pub available_for_withdrawal_cents: i64,
}

impl CommunityBalances {
    pub fn of(community: &CommunityRow) -> Self {
        Self {
            total_earnings_cents: community.total_earnings_cents,
            pending_withdrawals_cents: community.pending_withdrawals_cents,
            available_for_withdrawal_cents: community.available_for_withdrawal_cents,
        }
    }

    /// Accrual from a completed membership payment
    pub fn credit_payment(mut self, amount_cents: i64) -> Self {
        self.total_earnings_cents += amount_cents;
        self.available_for_withdrawal_cents += amount_cents;
        self
    }

    /// Reserve funds for a withdrawal request
    pub fn request_withdrawal(mut self, amount_cents: i64) -> PaymentResult<Self> {
        if amount_cents <= 0 {
            return Err(PaymentError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        if amount_cents > self.available_for_withdrawal_cents {
            return Err(PaymentError::InsufficientBalance {
                requested_cents: amount_cents,
                available_cents: self.available_for_withdrawal_cents,
            });
        }
        self.pending_withdrawals_cents += amount_cents;
        self.available_for_withdrawal_cents -= amount_cents;
        Ok(self)
    }

    /// Resolve a pending withdrawal; failure returns the funds to available
    pub fn complete_withdrawal(mut self, amount_cents: i64, success: bool) -> Self {
        self.pending_withdrawals_cents -= amount_cents;
        if !success {
            self.available_for_withdrawal_cents += amount_cents;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub community_id: Uuid,
    pub requester_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub reference: String,
    pub balances: CommunityBalances,
}

#[derive(Debug, Clone)]
pub struct WithdrawalCompletion {
    pub community_id: Uuid,
    pub reference: String,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResolution {
    pub reference: String,
    pub amount_cents: i64,
    pub status: String,
    pub balances: CommunityBalances,
}

/// History entry shaped for the API surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalView {
    pub reference: String,
    pub amount_cents: i64,
    pub method: String,
    pub status: String,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
}

impl From<WithdrawalRow> for WithdrawalView {
    fn from(row: WithdrawalRow) -> Self {
        Self {
            reference: row.reference,
            amount_cents: row.amount_cents,
            method: row.method,
            status: row.status,
            metadata: row.metadata,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

pub struct EarningsLedger {
    store: Store,
    events: PaymentEventLogger,
    notifier: Arc<dyn Notifier>,
}

impl EarningsLedger {
    pub fn new(store: Store, events: PaymentEventLogger, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            events,
            notifier,
        }
    }

    /// Owner-initiated withdrawal request. Reserves the funds and appends a
    /// pending withdrawal in one transaction; external processing is queued
    /// by the caller.
    pub async fn request_withdrawal(
        &self,
        req: &WithdrawalRequest,
    ) -> PaymentResult<WithdrawalReceipt> {
        if req.amount_cents <= 0 {
            return Err(PaymentError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }

        let receipt = self
            .store
            .with_transaction(|conn| {
                let req = req.clone();
                async move {
                    let now = OffsetDateTime::now_utc();
                    let community = Store::community_for_update(conn, req.community_id).await?;
                    if community.owner_id != req.requester_id {
                        return Err(PaymentError::Forbidden(
                            "only the community owner can request a withdrawal".to_string(),
                        ));
                    }

                    let balances =
                        CommunityBalances::of(&community).request_withdrawal(req.amount_cents)?;
                    let reference = mint_reference("WDR", req.community_id, now);

                    sqlx::query(
                        "INSERT INTO withdrawals \
                             (community_id, reference, amount_cents, method, status, metadata) \
                         VALUES ($1, $2, $3, $4, 'pending', $5)",
                    )
                    .bind(req.community_id)
                    .bind(&reference)
                    .bind(req.amount_cents)
                    .bind(&req.method)
                    .bind(&req.details)
                    .execute(&mut *conn)
                    .await?;

                    sqlx::query(
                        "UPDATE communities SET pending_withdrawals_cents = $1, \
                         available_for_withdrawal_cents = $2, updated_at = $3 WHERE id = $4",
                    )
                    .bind(balances.pending_withdrawals_cents)
                    .bind(balances.available_for_withdrawal_cents)
                    .bind(now)
                    .bind(req.community_id)
                    .execute(&mut *conn)
                    .await?;

                    Ok(WithdrawalReceipt { reference, balances })
                }
                .boxed()
            })
            .await?;

        tracing::info!(
            community_id = %req.community_id,
            reference = %receipt.reference,
            amount_cents = req.amount_cents,
            available_cents = receipt.balances.available_for_withdrawal_cents,
            "Withdrawal requested"
        );
        self.log_event(
            PaymentEvent::new(PaymentEventType::WithdrawalRequested)
                .community(req.community_id)
                .user(req.requester_id)
                .data(serde_json::json!({
                    "reference": receipt.reference,
                    "amount_cents": req.amount_cents,
                    "method": req.method,
                })),
        )
        .await;

        Ok(receipt)
    }

    /// Reconciliation entry point for the external processor. Rejected with
    /// `NotPending` unless the withdrawal is currently pending, which makes
    /// duplicated callbacks no-ops.
    pub async fn complete_withdrawal(
        &self,
        req: &WithdrawalCompletion,
    ) -> PaymentResult<WithdrawalResolution> {
        let resolution = self
            .store
            .with_transaction(|conn| {
                let req = req.clone();
                async move {
                    let now = OffsetDateTime::now_utc();
                    let withdrawal =
                        Store::withdrawal_for_update(&mut *conn, req.community_id, &req.reference)
                            .await?
                            .ok_or_else(|| {
                                PaymentError::NotFound(format!("withdrawal {}", req.reference))
                            })?;
                    if !withdrawal.is_pending() {
                        return Err(PaymentError::NotPending(req.reference.clone()));
                    }

                    let community = Store::community_for_update(conn, req.community_id).await?;
                    let balances = CommunityBalances::of(&community)
                        .complete_withdrawal(withdrawal.amount_cents, req.success);

                    let status = if req.success {
                        sqlx::query(
                            "UPDATE withdrawals SET status = 'completed', processed_at = $1 \
                             WHERE id = $2",
                        )
                        .bind(now)
                        .bind(withdrawal.id)
                        .execute(&mut *conn)
                        .await?;
                        "completed"
                    } else {
                        let patch = serde_json::json!({
                            "error": req
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "processing failed".to_string()),
                        });
                        sqlx::query(
                            "UPDATE withdrawals SET status = 'failed', processed_at = $1, \
                             metadata = metadata || $2 WHERE id = $3",
                        )
                        .bind(now)
                        .bind(&patch)
                        .bind(withdrawal.id)
                        .execute(&mut *conn)
                        .await?;
                        "failed"
                    };

                    sqlx::query(
                        "UPDATE communities SET pending_withdrawals_cents = $1, \
                         available_for_withdrawal_cents = $2, updated_at = $3 WHERE id = $4",
                    )
                    .bind(balances.pending_withdrawals_cents)
                    .bind(balances.available_for_withdrawal_cents)
                    .bind(now)
                    .bind(req.community_id)
                    .execute(&mut *conn)
                    .await?;

                    Ok(WithdrawalResolution {
                        reference: withdrawal.reference,
                        amount_cents: withdrawal.amount_cents,
                        status: status.to_string(),
                        balances,
                    })
                }
                .boxed()
            })
            .await?;

        tracing::info!(
            community_id = %req.community_id,
            reference = %resolution.reference,
            status = %resolution.status,
            "Withdrawal resolved"
        );
        let event_type = if req.success {
            PaymentEventType::WithdrawalCompleted
        } else {
            PaymentEventType::WithdrawalFailed
        };
        self.log_event(
            PaymentEvent::new(event_type)
                .community(req.community_id)
                .data(serde_json::json!({
                    "reference": resolution.reference,
                    "amount_cents": resolution.amount_cents,
                    "error": req.error_message,
                })),
        )
        .await;
        self.notify_owner(req.community_id, &resolution, req.success)
            .await;

        Ok(resolution)
    }

    pub async fn balances(&self, community_id: Uuid) -> PaymentResult<CommunityBalances> {
        let community = Store::community_required(self.store.pool(), community_id).await?;
        Ok(CommunityBalances::of(&community))
    }

    pub async fn withdrawal_history(
        &self,
        community_id: Uuid,
    ) -> PaymentResult<Vec<WithdrawalView>> {
        let rows = Store::withdrawal_history(self.store.pool(), community_id).await?;
        Ok(rows.into_iter().map(WithdrawalView::from).collect())
    }

    async fn log_event(&self, event: PaymentEvent) {
        if let Err(e) = self.events.log(event).await {
            tracing::warn!(error = %e, "Failed to log withdrawal event");
        }
    }

    /// Fire-and-forget owner notification
    async fn notify_owner(
        &self,
        community_id: Uuid,
        resolution: &WithdrawalResolution,
        success: bool,
    ) {
        let community = Store::community(self.store.pool(), community_id)
            .await
            .ok()
            .flatten();
        let Some(community) = community else { return };
        let owner = Store::user(self.store.pool(), community.owner_id)
            .await
            .ok()
            .flatten();
        let Some(owner) = owner else { return };

        let notifier = self.notifier.clone();
        let amount_cents = resolution.amount_cents;
        let currency = community.currency.clone();
        let name = community.name.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier
                .send_withdrawal_processed(&owner.email, &name, amount_cents, &currency, success)
                .await
            {
                tracing::warn!(error = %e, "Failed to send withdrawal email");
            }
        });
    }
}
