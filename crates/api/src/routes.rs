//! HTTP surface of the payment engine
//!
//! Authentication is external: the upstream gateway injects the
//! authenticated user id in the `x-user-id` header. Webhook routes consume
//! the raw request bytes because both providers sign the exact body, and
//! they respond 2xx only after the state transition has committed so
//! providers re-deliver on failure.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{body::Bytes, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aeko_payments::{
    CommunityBalances, InitializeRequest, InitializeResponse, Notifier, PaymentTarget,
    VerificationOutcome, WithdrawalCompletion, WithdrawalReceipt, WithdrawalRequest,
    WithdrawalResolution, WithdrawalView,
};
use aeko_shared::PaymentMethod;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Caller identity, taken from the `x-user-id` header
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Uuid>().ok())
            .ok_or(ApiError::Unauthorized)?;
        Ok(AuthUser { user_id })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/payments/community/{community_id}/initialize",
            post(initialize_membership),
        )
        .route(
            "/payments/subscription/initialize",
            post(initialize_subscription),
        )
        .route("/payments/verify", get(verify_payment))
        .route("/payments/{transaction_id}/reverify", post(reverify_payment))
        .route("/webhooks/paystack", post(webhook_paystack))
        .route("/webhooks/stripe", post(webhook_stripe))
        .route(
            "/communities/{community_id}/withdraw/request",
            post(request_withdrawal),
        )
        .route(
            "/communities/{community_id}/withdraw/{reference}/complete",
            post(complete_withdrawal),
        )
        .route("/communities/{community_id}/balances", get(balances))
        .route("/communities/{community_id}/withdrawals", get(withdrawals))
        .with_state(state)
}

fn parse_method(raw: &str) -> ApiResult<PaymentMethod> {
    raw.parse::<PaymentMethod>()
        .map_err(|e| ApiError::Payment(e.into()))
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    email_available: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        email_available: state.payments.notifier.is_available(),
    })
}

// =============================================================================
// Payment initialization
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeMembershipBody {
    pub payment_method: String,
}

async fn initialize_membership(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(community_id): Path<Uuid>,
    Json(body): Json<InitializeMembershipBody>,
) -> ApiResult<Json<InitializeResponse>> {
    let req = InitializeRequest {
        user_id: auth_user.user_id,
        payment_method: parse_method(&body.payment_method)?,
        target: PaymentTarget::Community(community_id),
    };
    let response = state.payments.pipeline.initialize(&req).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeSubscriptionBody {
    pub plan_id: Uuid,
    pub payment_method: String,
}

async fn initialize_subscription(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<InitializeSubscriptionBody>,
) -> ApiResult<Json<InitializeResponse>> {
    let req = InitializeRequest {
        user_id: auth_user.user_id,
        payment_method: parse_method(&body.payment_method)?,
        target: PaymentTarget::Plan(body.plan_id),
    };
    let response = state.payments.pipeline.initialize(&req).await?;
    Ok(Json(response))
}

// =============================================================================
// Verification
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub reference: String,
    pub payment_method: String,
}

async fn verify_payment(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Json<VerificationOutcome>> {
    let method = parse_method(&query.payment_method)?;
    let outcome = state.payments.pipeline.verify(&query.reference, method).await?;
    Ok(Json(outcome))
}

async fn reverify_payment(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<VerificationOutcome>> {
    let outcome = state.payments.pipeline.reverify(transaction_id).await?;
    Ok(Json(outcome))
}

// =============================================================================
// Provider webhooks
// =============================================================================

async fn webhook_paystack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<VerificationOutcome>> {
    let signature = headers
        .get("x-paystack-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Payment(
            aeko_payments::PaymentError::WebhookSignatureInvalid,
        ))?;

    let outcome = state.payments.pipeline.webhook_paystack(&body, signature).await?;
    Ok(Json(outcome))
}

async fn webhook_stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<VerificationOutcome>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Payment(
            aeko_payments::PaymentError::WebhookSignatureInvalid,
        ))?;

    let outcome = state.payments.pipeline.webhook_stripe(&body, signature).await?;
    Ok(Json(outcome))
}

// =============================================================================
// Withdrawals
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequestBody {
    pub amount_cents: i64,
    pub method: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

async fn request_withdrawal(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(community_id): Path<Uuid>,
    Json(body): Json<WithdrawalRequestBody>,
) -> ApiResult<Json<WithdrawalReceipt>> {
    // details must be an object: withdrawal metadata is merged on completion
    let details = if body.details.is_null() {
        serde_json::json!({})
    } else {
        body.details
    };
    let req = WithdrawalRequest {
        community_id,
        requester_id: auth_user.user_id,
        amount_cents: body.amount_cents,
        method: body.method,
        details,
    };
    let receipt = state.payments.ledger.request_withdrawal(&req).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteWithdrawalBody {
    pub success: bool,
    pub error_message: Option<String>,
}

async fn complete_withdrawal(
    State(state): State<AppState>,
    Path((community_id, reference)): Path<(Uuid, String)>,
    Json(body): Json<CompleteWithdrawalBody>,
) -> ApiResult<Json<WithdrawalResolution>> {
    let req = WithdrawalCompletion {
        community_id,
        reference,
        success: body.success,
        error_message: body.error_message,
    };
    let resolution = state.payments.ledger.complete_withdrawal(&req).await?;
    Ok(Json(resolution))
}

// =============================================================================
// Read models
// =============================================================================

async fn balances(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(community_id): Path<Uuid>,
) -> ApiResult<Json<CommunityBalances>> {
    let balances = state.payments.ledger.balances(community_id).await?;
    Ok(Json(balances))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalHistoryResponse {
    withdrawals: Vec<WithdrawalView>,
}

async fn withdrawals(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(community_id): Path<Uuid>,
) -> ApiResult<Json<WithdrawalHistoryResponse>> {
    let history = state.payments.ledger.withdrawal_history(community_id).await?;
    Ok(Json(WithdrawalHistoryResponse {
        withdrawals: history,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_parsing() {
        assert_eq!(parse_method("stripe").unwrap(), PaymentMethod::Stripe);
        assert_eq!(parse_method("paystack").unwrap(), PaymentMethod::Paystack);

        let err = parse_method("bank_transfer").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn withdrawal_body_defaults_details() {
        let body: WithdrawalRequestBody =
            serde_json::from_str(r#"{"amountCents": 3000, "method": "bank_transfer"}"#).unwrap();
        assert_eq!(body.amount_cents, 3000);
        assert!(body.details.is_null());
    }

    #[test]
    fn complete_body_accepts_error_message() {
        let body: CompleteWithdrawalBody =
            serde_json::from_str(r#"{"success": false, "errorMessage": "NSF"}"#).unwrap();
        assert!(!body.success);
        assert_eq!(body.error_message.as_deref(), Some("NSF"));
    }
}
