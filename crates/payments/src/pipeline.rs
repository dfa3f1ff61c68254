//! Payment pipeline
//!
//! Initializes, verifies, and reconciles transactions against community
//! memberships and platform subscription plans. The pipeline is idempotent
//! by `payment_reference`: the unique index plus the pending-status fence
//! inside the reconciliation transaction guarantee that a payment is applied
//! exactly once no matter how verify calls and webhook deliveries interleave.
//!
//! Provider calls never run while a store transaction is open: initialize
//! commits the pending transaction first, reconcile checks the provider
//! between two store transactions.

use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use aeko_shared::{BillingInterval, PaymentMethod, PlanDuration};

use crate::email::Notifier;
use crate::error::{PaymentError, PaymentResult};
use crate::events::{PaymentEvent, PaymentEventLogger, PaymentEventType};
use crate::gateway::{IntentMetadata, PaymentGateway, PaymentIntentSpec, WebhookEvent};
use crate::paystack::PaystackGateway;
use crate::store::{CommunityRow, NewTransaction, Store, TransactionRow};
use crate::stripe_gateway::StripeGateway;

/// Re-mint budget when a freshly minted reference collides
const REFERENCE_ATTEMPTS: u32 = 3;

/// What a payment is for; exactly one target per transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTarget {
    Community(Uuid),
    Plan(Uuid),
}

#[derive(Debug, Clone)]
pub struct InitializeRequest {
    pub user_id: Uuid,
    pub payment_method: PaymentMethod,
    pub target: PaymentTarget,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub reference: String,
    pub transaction_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    /// Paystack hosted checkout page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    /// Stripe client-side confirmation secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
}

/// Result of verify / webhook reconciliation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub success: bool,
    pub already_processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerificationOutcome {
    fn completed(reference: &str) -> Self {
        Self {
            success: true,
            already_processed: false,
            reference: Some(reference.to_string()),
            message: None,
        }
    }

    fn already(reference: &str) -> Self {
        Self {
            success: true,
            already_processed: true,
            reference: Some(reference.to_string()),
            message: None,
        }
    }

    fn failed(reference: &str, message: String) -> Self {
        Self {
            success: false,
            already_processed: false,
            reference: Some(reference.to_string()),
            message: Some(message),
        }
    }

    fn ignored(event_type: &str) -> Self {
        Self {
            success: true,
            already_processed: false,
            reference: None,
            message: Some(format!("event {event_type} ignored")),
        }
    }
}

/// What the pending-status fence decides for a reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionAction {
    /// Still pending: this caller applies the side effects
    Apply,
    /// A concurrent caller won the race; report `already_processed`
    AlreadyProcessed,
    /// Terminal failure; nothing to apply
    Refuse,
}

pub(crate) fn completion_action(status: &str) -> CompletionAction {
    match status {
        "pending" => CompletionAction::Apply,
        "completed" => CompletionAction::AlreadyProcessed,
        _ => CompletionAction::Refuse,
    }
}

/// Mint a pipeline reference: `<PREFIX>-<unix ms>-<first 6 id chars>`
pub(crate) fn mint_reference(prefix: &str, scope_id: Uuid, now: OffsetDateTime) -> String {
    let ms = now.unix_timestamp_nanos() / 1_000_000;
    let scope = scope_id.to_string();
    format!("{prefix}-{ms}-{}", &scope[..6])
}

struct PreparedTransaction {
    txn: TransactionRow,
    email: String,
}

pub struct PaymentPipeline {
    store: Store,
    paystack: Arc<PaystackGateway>,
    stripe: Arc<StripeGateway>,
    notifier: Arc<dyn Notifier>,
    events: PaymentEventLogger,
}

impl PaymentPipeline {
    pub fn new(
        store: Store,
        paystack: Arc<PaystackGateway>,
        stripe: Arc<StripeGateway>,
        notifier: Arc<dyn Notifier>,
        events: PaymentEventLogger,
    ) -> Self {
        Self {
            store,
            paystack,
            stripe,
            notifier,
            events,
        }
    }

    fn gateway_for(&self, method: PaymentMethod) -> PaymentResult<&dyn PaymentGateway> {
        match method {
            PaymentMethod::Paystack => Ok(self.paystack.as_ref()),
            PaymentMethod::Stripe => Ok(self.stripe.as_ref()),
            PaymentMethod::AekoWallet => Err(PaymentError::MethodUnavailable(
                method.as_str().to_string(),
            )),
        }
    }

    /// Start a payment: validate, insert the pending transaction, then ask
    /// the provider for a checkout handle.
    pub async fn initialize(&self, req: &InitializeRequest) -> PaymentResult<InitializeResponse> {
        // Reject unroutable methods before anything is written
        let gateway = self.gateway_for(req.payment_method)?;

        let prepared = self.prepare_transaction(req).await?;
        let txn = &prepared.txn;

        let metadata = IntentMetadata {
            user_id: txn.user_id,
            community_id: txn.community_id,
            plan_id: txn.plan_id,
            transaction_id: txn.id,
            kind: if txn.community_id.is_some() {
                "community_membership"
            } else {
                "plan_subscription"
            },
        };
        let subaccount = match req.target {
            PaymentTarget::Community(community_id) => {
                Store::community(self.store.pool(), community_id)
                    .await?
                    .and_then(|c| c.paystack_subaccount)
            }
            PaymentTarget::Plan(_) => None,
        };
        let spec = PaymentIntentSpec {
            reference: txn.payment_reference.clone(),
            amount_cents: txn.amount_cents,
            currency: txn.currency.clone(),
            email: prepared.email.clone(),
            metadata,
            subaccount,
        };

        match gateway.initialize(&spec).await {
            Ok(outcome) => {
                let patch = serde_json::json!({
                    "provider_reference": outcome.value.provider_reference,
                    "access_code": outcome.value.access_code,
                });
                sqlx::query(
                    "UPDATE transactions SET metadata = metadata || $1, \
                     retry_count = retry_count + $2, updated_at = NOW() WHERE id = $3",
                )
                .bind(&patch)
                .bind(outcome.retries as i32)
                .bind(txn.id)
                .execute(self.store.pool())
                .await
                .map_err(PaymentError::from)?;

                tracing::info!(
                    transaction_id = %txn.id,
                    reference = %txn.payment_reference,
                    method = %req.payment_method,
                    amount_cents = txn.amount_cents,
                    "Payment initialized"
                );

                Ok(InitializeResponse {
                    reference: txn.payment_reference.clone(),
                    transaction_id: txn.id,
                    amount_cents: txn.amount_cents,
                    currency: txn.currency.clone(),
                    authorization_url: outcome.value.authorization_url,
                    client_secret: outcome.value.client_secret,
                    access_code: outcome.value.access_code,
                })
            }
            Err(err) => {
                // The reference can never complete: record the terminal failure
                let reason = err.to_string();
                if let Err(db_err) = sqlx::query(
                    "UPDATE transactions SET status = 'failed', failure_reason = $1, \
                     updated_at = NOW() WHERE id = $2 AND status = 'pending'",
                )
                .bind(&reason)
                .bind(txn.id)
                .execute(self.store.pool())
                .await
                {
                    tracing::error!(
                        transaction_id = %txn.id,
                        error = %db_err,
                        "Failed to mark transaction failed after provider error"
                    );
                }
                self.log_event(
                    PaymentEvent::new(PaymentEventType::TransactionFailed)
                        .community_opt(txn.community_id)
                        .user(txn.user_id)
                        .data(serde_json::json!({
                            "transaction_id": txn.id,
                            "reference": txn.payment_reference,
                            "reason": reason,
                        })),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn prepare_transaction(
        &self,
        req: &InitializeRequest,
    ) -> PaymentResult<PreparedTransaction> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .store
                .with_transaction(|conn| {
                    let req = req.clone();
                    async move {
                        let now = OffsetDateTime::now_utc();
                        let user = Store::user_required(&mut *conn, req.user_id).await?;
                        if user.email.trim().is_empty() {
                            return Err(PaymentError::Validation(
                                "user has no email address".to_string(),
                            ));
                        }

                        let txn = match req.target {
                            PaymentTarget::Community(community_id) => {
                                let community =
                                    Store::community_required(&mut *conn, community_id).await?;
                                validate_community_intent(&community, req.payment_method)?;

                                if let Some(member) =
                                    Store::member(&mut *conn, community_id, req.user_id).await?
                                {
                                    if member.is_banned() {
                                        return Err(PaymentError::Forbidden(
                                            "banned from this community".to_string(),
                                        ));
                                    }
                                    if member.is_active() && member.has_live_subscription(now) {
                                        return Err(PaymentError::AlreadyMember(
                                            community_id.to_string(),
                                        ));
                                    }
                                }

                                Store::insert_transaction(
                                    &mut *conn,
                                    &NewTransaction {
                                        user_id: req.user_id,
                                        plan_id: None,
                                        community_id: Some(community_id),
                                        amount_cents: community.price_cents,
                                        currency: community.currency.clone(),
                                        payment_method: req.payment_method.as_str().to_string(),
                                        payment_reference: mint_reference(
                                            "COMM",
                                            req.user_id,
                                            now,
                                        ),
                                        metadata: serde_json::json!({
                                            "type": "community_membership",
                                        }),
                                    },
                                )
                                .await?
                            }
                            PaymentTarget::Plan(plan_id) => {
                                let plan = Store::plan_required(&mut *conn, plan_id).await?;
                                if !plan.is_active {
                                    return Err(PaymentError::Validation(
                                        "subscription plan is not active".to_string(),
                                    ));
                                }
                                if user.has_live_subscription(now)
                                    && user.subscription_plan_id == Some(plan_id)
                                {
                                    return Err(PaymentError::AlreadySubscribed(
                                        plan_id.to_string(),
                                    ));
                                }

                                Store::insert_transaction(
                                    &mut *conn,
                                    &NewTransaction {
                                        user_id: req.user_id,
                                        plan_id: Some(plan_id),
                                        community_id: None,
                                        amount_cents: plan.price_cents,
                                        currency: plan.currency.clone(),
                                        payment_method: req.payment_method.as_str().to_string(),
                                        payment_reference: mint_reference("SUB", req.user_id, now),
                                        metadata: serde_json::json!({
                                            "type": "plan_subscription",
                                        }),
                                    },
                                )
                                .await?
                            }
                        };

                        Ok(PreparedTransaction {
                            txn,
                            email: user.email,
                        })
                    }
                    .boxed()
                })
                .await;

            match result {
                Err(PaymentError::DuplicateReference(_)) if attempt < REFERENCE_ATTEMPTS => {
                    // Another worker minted the same millisecond reference;
                    // re-run mints a fresh one
                    continue;
                }
                other => return other,
            }
        }
    }

    /// Return-URL reconciliation
    pub async fn verify(
        &self,
        reference: &str,
        method: PaymentMethod,
    ) -> PaymentResult<VerificationOutcome> {
        let txn = Store::transaction_by_reference(self.store.pool(), reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {reference}")))?;
        self.reconcile(txn, method).await
    }

    /// Operator-triggered re-entry for a transaction stuck pending
    pub async fn reverify(&self, transaction_id: Uuid) -> PaymentResult<VerificationOutcome> {
        let txn = Store::transaction_by_id(self.store.pool(), transaction_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {transaction_id}")))?;
        let method = txn.payment_method.parse::<PaymentMethod>()?;
        self.reconcile(txn, method).await
    }

    /// Webhook delivery, Paystack shape
    pub async fn webhook_paystack(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> PaymentResult<VerificationOutcome> {
        let event = self.paystack.verify_webhook(raw_body, signature)?;
        self.deliver(event, PaymentMethod::Paystack).await
    }

    /// Webhook delivery, Stripe shape
    pub async fn webhook_stripe(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> PaymentResult<VerificationOutcome> {
        let event = self.stripe.verify_webhook(raw_body, signature_header)?;
        self.deliver(event, PaymentMethod::Stripe).await
    }

    async fn deliver(
        &self,
        event: WebhookEvent,
        method: PaymentMethod,
    ) -> PaymentResult<VerificationOutcome> {
        if !event.is_payment_success(method) {
            tracing::info!(
                event_type = %event.event_type,
                method = %method,
                "Ignoring unhandled provider event"
            );
            return Ok(VerificationOutcome::ignored(&event.event_type));
        }

        let txn = self.locate(&event).await?;
        self.reconcile(txn, method).await
    }

    /// Locate the transaction for a webhook event: metadata transaction id
    /// first (Stripe events only carry the PaymentIntent id), reference next
    /// (Paystack echoes ours back).
    async fn locate(&self, event: &WebhookEvent) -> PaymentResult<TransactionRow> {
        if let Some(id) = event.transaction_id {
            if let Some(txn) = Store::transaction_by_id(self.store.pool(), id).await? {
                return Ok(txn);
            }
        }
        if let Some(reference) = &event.reference {
            if let Some(txn) =
                Store::transaction_by_reference(self.store.pool(), reference).await?
            {
                return Ok(txn);
            }
        }
        Err(PaymentError::NotFound(format!(
            "transaction for event {}",
            event.event_type
        )))
    }

    /// Idempotent reconciliation shared by verify and webhook delivery
    async fn reconcile(
        &self,
        txn: TransactionRow,
        method: PaymentMethod,
    ) -> PaymentResult<VerificationOutcome> {
        match completion_action(&txn.status) {
            CompletionAction::AlreadyProcessed => {
                return Ok(VerificationOutcome::already(&txn.payment_reference));
            }
            CompletionAction::Refuse => {
                return Ok(VerificationOutcome::failed(
                    &txn.payment_reference,
                    txn.failure_reason
                        .clone()
                        .unwrap_or_else(|| "transaction already failed".to_string()),
                ));
            }
            CompletionAction::Apply => {}
        }

        let gateway = self.gateway_for(method)?;
        let provider_ref = match method {
            PaymentMethod::Stripe => txn
                .provider_reference()
                .map(str::to_string)
                .ok_or_else(|| {
                    PaymentError::Validation(
                        "transaction has no recorded payment intent".to_string(),
                    )
                })?,
            _ => txn.payment_reference.clone(),
        };

        // Provider check happens between store transactions
        let verification = gateway.verify(&provider_ref).await?;
        if verification.retries > 0 {
            if let Err(e) = sqlx::query(
                "UPDATE transactions SET retry_count = retry_count + $1, updated_at = NOW() \
                 WHERE id = $2",
            )
            .bind(verification.retries as i32)
            .bind(txn.id)
            .execute(self.store.pool())
            .await
            {
                tracing::warn!(transaction_id = %txn.id, error = %e, "Failed to persist retry count");
            }
        }

        if !verification.value.success {
            let message = verification
                .value
                .message
                .unwrap_or_else(|| "payment not confirmed by provider".to_string());
            tracing::info!(
                transaction_id = %txn.id,
                reference = %txn.payment_reference,
                message = %message,
                "Provider verification negative"
            );
            return Ok(VerificationOutcome::failed(&txn.payment_reference, message));
        }

        let txn_id = txn.id;
        let outcome = self
            .store
            .with_transaction(|conn| {
                async move {
                    // Re-check under the row lock: a concurrent caller may
                    // have completed this reference already
                    let txn = Store::transaction_for_update(&mut *conn, txn_id).await?;
                    match completion_action(&txn.status) {
                        CompletionAction::AlreadyProcessed => {
                            return Ok(VerificationOutcome::already(&txn.payment_reference));
                        }
                        CompletionAction::Refuse => {
                            return Ok(VerificationOutcome::failed(
                                &txn.payment_reference,
                                "transaction already failed".to_string(),
                            ));
                        }
                        CompletionAction::Apply => {}
                    }

                    let now = OffsetDateTime::now_utc();
                    if let Some(community_id) = txn.community_id {
                        grant_membership(conn, &txn, community_id, now).await?;
                    } else if let Some(plan_id) = txn.plan_id {
                        grant_subscription(conn, &txn, plan_id, now).await?;
                    } else {
                        return Err(PaymentError::Internal(
                            "transaction has no target".to_string(),
                        ));
                    }

                    sqlx::query(
                        "UPDATE transactions SET status = 'completed', verified_at = $1, \
                         updated_at = $1 WHERE id = $2",
                    )
                    .bind(now)
                    .bind(txn.id)
                    .execute(&mut *conn)
                    .await
                    .map_err(PaymentError::from)?;

                    Ok(VerificationOutcome::completed(&txn.payment_reference))
                }
                .boxed()
            })
            .await?;

        if outcome.success && !outcome.already_processed {
            tracing::info!(
                transaction_id = %txn.id,
                reference = %txn.payment_reference,
                amount_cents = txn.amount_cents,
                "Payment completed"
            );
            self.after_completion(&txn).await;
        }

        Ok(outcome)
    }

    /// Post-commit audit and notification; never fails the caller
    async fn after_completion(&self, txn: &TransactionRow) {
        let event_type = if txn.community_id.is_some() {
            PaymentEventType::MembershipGranted
        } else {
            PaymentEventType::SubscriptionGranted
        };
        self.log_event(
            PaymentEvent::new(event_type)
                .community_opt(txn.community_id)
                .user(txn.user_id)
                .data(serde_json::json!({
                    "transaction_id": txn.id,
                    "reference": txn.payment_reference,
                    "amount_cents": txn.amount_cents,
                    "currency": txn.currency,
                })),
        )
        .await;

        let Some(community_id) = txn.community_id else {
            return;
        };
        let user = Store::user(self.store.pool(), txn.user_id).await.ok().flatten();
        let community = Store::community(self.store.pool(), community_id)
            .await
            .ok()
            .flatten();
        if let (Some(user), Some(community)) = (user, community) {
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier
                    .send_membership_activated(&user.email, &community.name)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to send membership email");
                }
            });
        }
    }

    async fn log_event(&self, event: PaymentEvent) {
        if let Err(e) = self.events.log(event).await {
            tracing::warn!(error = %e, "Failed to log payment event");
        }
    }
}

fn has_value(field: &Option<String>) -> bool {
    field.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// Community-intent preconditions: method enabled, method configured
pub(crate) fn validate_community_intent(
    community: &CommunityRow,
    method: PaymentMethod,
) -> PaymentResult<()> {
    if !community.is_active {
        return Err(PaymentError::Validation("community is not active".to_string()));
    }
    if !community.is_paid_community {
        return Err(PaymentError::Validation(
            "community is not a paid community".to_string(),
        ));
    }
    if !community.accepts_method(method.as_str()) {
        return Err(PaymentError::MethodUnavailable(method.as_str().to_string()));
    }
    match method {
        PaymentMethod::Paystack if !has_value(&community.paystack_subaccount) => Err(
            PaymentError::MethodMisconfigured(method.as_str().to_string()),
        ),
        PaymentMethod::Stripe if !has_value(&community.stripe_account_id) => Err(
            PaymentError::MethodMisconfigured(method.as_str().to_string()),
        ),
        PaymentMethod::AekoWallet => Err(PaymentError::MethodUnavailable(
            method.as_str().to_string(),
        )),
        _ => Ok(()),
    }
}

async fn grant_membership(
    conn: &mut sqlx::PgConnection,
    txn: &TransactionRow,
    community_id: Uuid,
    now: OffsetDateTime,
) -> PaymentResult<()> {
    let community = Store::community_for_update(conn, community_id).await?;
    let interval = community.subscription_type.parse::<BillingInterval>()?;
    let sub_end = interval.period().map(|p| now + p);

    let member = Store::member_for_update(conn, community_id, txn.user_id).await?;
    let newly_active = member.as_ref().map(|m| !m.is_active()).unwrap_or(true);

    match member {
        Some(m) => {
            sqlx::query(
                "UPDATE community_members SET status = 'active', sub_type = $1, \
                 sub_start = $2, sub_end = $3, sub_is_active = TRUE, \
                 sub_payment_method = $4, sub_transaction_id = $5, \
                 reminder_sent_for = NULL, updated_at = $2 WHERE id = $6",
            )
            .bind(interval.as_str())
            .bind(now)
            .bind(sub_end)
            .bind(&txn.payment_method)
            .bind(txn.id)
            .bind(m.id)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO community_members \
                     (community_id, user_id, role, status, joined_at, sub_type, \
                      sub_start, sub_end, sub_is_active, sub_payment_method, \
                      sub_transaction_id) \
                 VALUES ($1, $2, 'member', 'active', $3, $4, $3, $5, TRUE, $6, $7)",
            )
            .bind(community_id)
            .bind(txn.user_id)
            .bind(now)
            .bind(interval.as_str())
            .bind(sub_end)
            .bind(&txn.payment_method)
            .bind(txn.id)
            .execute(&mut *conn)
            .await?;
        }
    }

    let member_delta: i32 = if newly_active { 1 } else { 0 };
    sqlx::query(
        "UPDATE communities SET member_count = member_count + $1, \
         total_earnings_cents = total_earnings_cents + $2, \
         available_for_withdrawal_cents = available_for_withdrawal_cents + $2, \
         updated_at = $3 WHERE id = $4",
    )
    .bind(member_delta)
    .bind(txn.amount_cents)
    .bind(now)
    .bind(community_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn grant_subscription(
    conn: &mut sqlx::PgConnection,
    txn: &TransactionRow,
    plan_id: Uuid,
    now: OffsetDateTime,
) -> PaymentResult<()> {
    let plan = Store::plan_required(&mut *conn, plan_id).await?;
    let duration = plan.duration.parse::<PlanDuration>()?;
    let expiry = now + duration.period();

    sqlx::query(
        "UPDATE users SET subscription_plan_id = $1, subscription_status = 'active', \
         subscription_expiry = $2, golden_tick = TRUE, updated_at = $3 WHERE id = $4",
    )
    .bind(plan_id)
    .bind(expiry)
    .bind(now)
    .bind(txn.user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn community(methods: &[&str]) -> CommunityRow {
        CommunityRow {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Rustaceans".to_string(),
            is_active: true,
            member_count: 0,
            is_paid_community: true,
            price_cents: 1000,
            currency: "USD".to_string(),
            subscription_type: "monthly".to_string(),
            payment_methods: methods.iter().map(|s| s.to_string()).collect(),
            stripe_account_id: Some("acct_X".to_string()),
            paystack_subaccount: None,
            total_earnings_cents: 0,
            pending_withdrawals_cents: 0,
            available_for_withdrawal_cents: 0,
        }
    }

    #[test]
    fn reference_format() {
        let now = datetime!(2024-04-01 12:00:00 UTC);
        let user_id = Uuid::new_v4();
        let reference = mint_reference("COMM", user_id, now);

        let parts: Vec<&str> = reference.splitn(3, '-').collect();
        assert_eq!(parts[0], "COMM");
        assert_eq!(parts[1], now.unix_timestamp().to_string() + "000");
        assert_eq!(parts[2], &user_id.to_string()[..6]);
    }

    #[test]
    fn method_not_enabled_is_unavailable() {
        let err = validate_community_intent(&community(&["paystack"]), PaymentMethod::Stripe)
            .unwrap_err();
        assert!(matches!(err, PaymentError::MethodUnavailable(_)));
    }

    #[test]
    fn missing_subaccount_is_misconfigured() {
        // paystack enabled but no subaccount configured
        let err = validate_community_intent(&community(&["paystack"]), PaymentMethod::Paystack)
            .unwrap_err();
        assert!(matches!(err, PaymentError::MethodMisconfigured(_)));
    }

    #[test]
    fn configured_stripe_passes() {
        assert!(validate_community_intent(&community(&["stripe"]), PaymentMethod::Stripe).is_ok());
    }

    #[test]
    fn wallet_has_no_gateway() {
        let err = validate_community_intent(
            &community(&["aeko_wallet"]),
            PaymentMethod::AekoWallet,
        )
        .unwrap_err();
        assert!(matches!(err, PaymentError::MethodUnavailable(_)));
    }

    #[test]
    fn fence_serializes_completion() {
        assert_eq!(completion_action("pending"), CompletionAction::Apply);
        assert_eq!(
            completion_action("completed"),
            CompletionAction::AlreadyProcessed
        );
        assert_eq!(completion_action("failed"), CompletionAction::Refuse);
    }
}
