//! API error mapping
//!
//! The payments engine surfaces semantic error kinds; this module maps them
//! to HTTP statuses at the boundary. Server-side failures are logged with a
//! correlation id that is echoed in the response body so operators can find
//! the matching log line.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use aeko_payments::PaymentError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or unparseable `x-user-id` header
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::Validation(_)
        | PaymentError::MethodUnavailable(_)
        | PaymentError::MethodMisconfigured(_)
        | PaymentError::WebhookSignatureInvalid
        | PaymentError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
        PaymentError::AlreadyMember(_) | PaymentError::AlreadySubscribed(_) => {
            StatusCode::PAYMENT_REQUIRED
        }
        PaymentError::Forbidden(_) => StatusCode::FORBIDDEN,
        PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::Conflict(_)
        | PaymentError::NotPending(_)
        | PaymentError::DuplicateReference(_) => StatusCode::CONFLICT,
        PaymentError::ProviderTransient(_) | PaymentError::ProviderRejected(_) => {
            StatusCode::BAD_GATEWAY
        }
        PaymentError::Database(_) | PaymentError::Config(_) | PaymentError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Payment(err) => payment_status(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let correlation_id = Uuid::new_v4();
            tracing::error!(%correlation_id, error = %self, "Request failed");
            let body = json!({
                "error": "internal server error",
                "correlationId": correlation_id,
            });
            return (status, Json(body)).into_response();
        }

        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
