//! Typed store adapter over Postgres
//!
//! All shared state lives here; every core operation runs inside exactly one
//! store transaction. `with_transaction` provides the read-modify-write
//! atomicity contract: serialization failures roll back and re-run the
//! closure a bounded number of times before surfacing `Conflict`. The unique
//! index on `transactions.payment_reference` is the idempotency anchor;
//! duplicate inserts surface `DuplicateReference` so callers resolve the race
//! by reading the existing row.

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use aeko_shared::types::{MemberStatus, TransactionStatus, WithdrawalStatus};

use crate::error::{PaymentError, PaymentResult};

/// Bounded re-run budget for serialization conflicts
const TXN_ATTEMPTS: u32 = 3;

const USER_COLUMNS: &str = "id, email, subscription_plan_id, subscription_status, \
     subscription_expiry, golden_tick";

const PLAN_COLUMNS: &str = "id, name, price_cents, currency, duration, is_active";

const COMMUNITY_COLUMNS: &str = "id, owner_id, name, is_active, member_count, \
     is_paid_community, price_cents, currency, subscription_type, payment_methods, \
     stripe_account_id, paystack_subaccount, total_earnings_cents, \
     pending_withdrawals_cents, available_for_withdrawal_cents";

const MEMBER_COLUMNS: &str = "id, community_id, user_id, role, status, joined_at, \
     sub_type, sub_start, sub_end, sub_is_active, sub_payment_method, \
     sub_transaction_id, reminder_sent_for";

const TRANSACTION_COLUMNS: &str = "id, user_id, plan_id, community_id, amount_cents, \
     currency, payment_method, payment_reference, status, retry_count, \
     failure_reason, metadata, created_at, updated_at, verified_at";

const WITHDRAWAL_COLUMNS: &str = "id, community_id, reference, amount_cents, method, \
     status, metadata, created_at, processed_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub subscription_plan_id: Option<Uuid>,
    pub subscription_status: String,
    pub subscription_expiry: Option<OffsetDateTime>,
    pub golden_tick: bool,
}

impl UserRow {
    /// Active, non-expired platform subscription
    pub fn has_live_subscription(&self, now: OffsetDateTime) -> bool {
        self.subscription_status == "active"
            && self.subscription_expiry.map(|e| e > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub duration: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommunityRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub member_count: i32,
    pub is_paid_community: bool,
    pub price_cents: i64,
    pub currency: String,
    pub subscription_type: String,
    pub payment_methods: Vec<String>,
    pub stripe_account_id: Option<String>,
    pub paystack_subaccount: Option<String>,
    pub total_earnings_cents: i64,
    pub pending_withdrawals_cents: i64,
    pub available_for_withdrawal_cents: i64,
}

impl CommunityRow {
    pub fn accepts_method(&self, method: &str) -> bool {
        self.payment_methods.iter().any(|m| m == method)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberRow {
    pub id: Uuid,
    pub community_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub status: String,
    pub joined_at: OffsetDateTime,
    pub sub_type: Option<String>,
    pub sub_start: Option<OffsetDateTime>,
    pub sub_end: Option<OffsetDateTime>,
    pub sub_is_active: bool,
    pub sub_payment_method: Option<String>,
    pub sub_transaction_id: Option<Uuid>,
    pub reminder_sent_for: Option<OffsetDateTime>,
}

impl MemberRow {
    pub fn is_banned(&self) -> bool {
        self.status == MemberStatus::Banned.as_str()
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active.as_str()
    }

    /// Lazily-evaluated subscription liveness: an entry whose `sub_end` has
    /// passed no longer counts even before the daily scanner flips it.
    /// `sub_end = NULL` means lifetime access.
    pub fn has_live_subscription(&self, now: OffsetDateTime) -> bool {
        self.sub_is_active && self.sub_end.map(|e| e > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub community_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
    pub payment_reference: String,
    pub status: String,
    pub retry_count: i32,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub verified_at: Option<OffsetDateTime>,
}

impl TransactionRow {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending.as_str()
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed.as_str()
    }

    /// Provider-side reference recorded at initialization (Stripe
    /// PaymentIntent id); Paystack carries our own reference end to end.
    pub fn provider_reference(&self) -> Option<&str> {
        self.metadata.get("provider_reference").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WithdrawalRow {
    pub id: Uuid,
    pub community_id: Uuid,
    pub reference: String,
    pub amount_cents: i64,
    pub method: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
}

impl WithdrawalRow {
    pub fn is_pending(&self) -> bool {
        self.status == WithdrawalStatus::Pending.as_str()
    }
}

/// Insert payload for the pending transaction created at initialization
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub community_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
    pub payment_reference: String,
    pub metadata: serde_json::Value,
}

/// Typed access to the documents of the payment engine
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` inside a transaction with bounded re-run on serialization
    /// conflict. `f` must be re-runnable: all of its reads and writes happen
    /// through the connection it is handed.
    pub async fn with_transaction<T, F>(&self, f: F) -> PaymentResult<T>
    where
        T: Send,
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, PaymentResult<T>> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self.pool.begin().await.map_err(PaymentError::from)?;
            match f(&mut tx).await {
                Ok(value) => match tx.commit().await.map_err(PaymentError::from) {
                    Ok(()) => return Ok(value),
                    Err(err) if err.is_retriable_conflict() && attempt < TXN_ATTEMPTS => {
                        tracing::warn!(attempt, error = %err, "Transaction commit conflict, re-running");
                        continue;
                    }
                    Err(err) => return Err(err),
                },
                Err(err) => {
                    // Rollback failure is unremarkable: the connection drop rolls back anyway
                    let _ = tx.rollback().await;
                    if err.is_retriable_conflict() && attempt < TXN_ATTEMPTS {
                        tracing::warn!(attempt, error = %err, "Transaction conflict, re-running");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    pub async fn user(
        ex: impl sqlx::PgExecutor<'_>,
        id: Uuid,
    ) -> PaymentResult<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(ex)
            .await
            .map_err(Into::into)
    }

    pub async fn user_required(ex: impl sqlx::PgExecutor<'_>, id: Uuid) -> PaymentResult<UserRow> {
        Self::user(ex, id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("user {id}")))
    }

    pub async fn plan(ex: impl sqlx::PgExecutor<'_>, id: Uuid) -> PaymentResult<Option<PlanRow>> {
        sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(ex)
        .await
        .map_err(Into::into)
    }

    pub async fn plan_required(ex: impl sqlx::PgExecutor<'_>, id: Uuid) -> PaymentResult<PlanRow> {
        Self::plan(ex, id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("subscription plan {id}")))
    }

    pub async fn community(
        ex: impl sqlx::PgExecutor<'_>,
        id: Uuid,
    ) -> PaymentResult<Option<CommunityRow>> {
        sqlx::query_as::<_, CommunityRow>(&format!(
            "SELECT {COMMUNITY_COLUMNS} FROM communities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(ex)
        .await
        .map_err(Into::into)
    }

    pub async fn community_required(
        ex: impl sqlx::PgExecutor<'_>,
        id: Uuid,
    ) -> PaymentResult<CommunityRow> {
        Self::community(ex, id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("community {id}")))
    }

    /// Row-locked load used to linearize balance and member-count updates
    pub async fn community_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> PaymentResult<CommunityRow> {
        sqlx::query_as::<_, CommunityRow>(&format!(
            "SELECT {COMMUNITY_COLUMNS} FROM communities WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(PaymentError::from)?
        .ok_or_else(|| PaymentError::NotFound(format!("community {id}")))
    }

    pub async fn member(
        ex: impl sqlx::PgExecutor<'_>,
        community_id: Uuid,
        user_id: Uuid,
    ) -> PaymentResult<Option<MemberRow>> {
        sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM community_members \
             WHERE community_id = $1 AND user_id = $2"
        ))
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(ex)
        .await
        .map_err(Into::into)
    }

    pub async fn member_for_update(
        conn: &mut PgConnection,
        community_id: Uuid,
        user_id: Uuid,
    ) -> PaymentResult<Option<MemberRow>> {
        sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM community_members \
             WHERE community_id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(Into::into)
    }

    pub async fn transaction_by_reference(
        ex: impl sqlx::PgExecutor<'_>,
        reference: &str,
    ) -> PaymentResult<Option<TransactionRow>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(ex)
        .await
        .map_err(Into::into)
    }

    pub async fn transaction_by_id(
        ex: impl sqlx::PgExecutor<'_>,
        id: Uuid,
    ) -> PaymentResult<Option<TransactionRow>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(ex)
        .await
        .map_err(Into::into)
    }

    /// Row-locked load: the `status = pending` re-check fence that serializes
    /// concurrent verify/webhook attempts holds this lock.
    pub async fn transaction_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> PaymentResult<TransactionRow> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(PaymentError::from)?
        .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))
    }

    pub async fn withdrawal_for_update(
        conn: &mut PgConnection,
        community_id: Uuid,
        reference: &str,
    ) -> PaymentResult<Option<WithdrawalRow>> {
        sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals \
             WHERE community_id = $1 AND reference = $2 FOR UPDATE"
        ))
        .bind(community_id)
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await
        .map_err(Into::into)
    }

    pub async fn withdrawal_history(
        ex: impl sqlx::PgExecutor<'_>,
        community_id: Uuid,
    ) -> PaymentResult<Vec<WithdrawalRow>> {
        sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals \
             WHERE community_id = $1 ORDER BY created_at DESC"
        ))
        .bind(community_id)
        .fetch_all(ex)
        .await
        .map_err(Into::into)
    }

    /// Insert the pending transaction; a duplicate reference surfaces
    /// `DuplicateReference` for the caller to resolve.
    pub async fn insert_transaction(
        conn: &mut PgConnection,
        new: &NewTransaction,
    ) -> PaymentResult<TransactionRow> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions \
                 (user_id, plan_id, community_id, amount_cents, currency, \
                  payment_method, payment_reference, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(new.user_id)
        .bind(new.plan_id)
        .bind(new.community_id)
        .bind(new.amount_cents)
        .bind(&new.currency)
        .bind(&new.payment_method)
        .bind(&new.payment_reference)
        .bind(&new.metadata)
        .fetch_one(&mut *conn)
        .await
        .map_err(Into::into)
    }
}
