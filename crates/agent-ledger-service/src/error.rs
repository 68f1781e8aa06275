//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use agent_ledger_core::LedgerError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the idempotency key is already in use.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Sum of all pools.
        available: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// Too many skill calls.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Storage stayed contended after retries.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits {
                available,
                required,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "available": available,
                    "required": required
                })),
            ),
            Self::RateLimited(msg) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                msg.clone(),
                None,
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Storage contention surfaced to caller");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "The ledger is busy, retry later".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { .. } => Self::NotFound(err.to_string()),
            LedgerError::Forbidden(msg) => Self::Forbidden(msg),
            LedgerError::InvalidArgument(msg) => Self::BadRequest(msg),
            LedgerError::InvalidId(e) => Self::BadRequest(format!("invalid identifier: {e}")),
            LedgerError::InsufficientBalance {
                available,
                required,
            } => Self::InsufficientCredits {
                available,
                required,
            },
            LedgerError::Conflict { upstream_tx_id } => {
                Self::Conflict(format!("upstream transaction {upstream_tx_id} already applied"))
            }
            LedgerError::RateLimited { key } => Self::RateLimited(format!("rate limit exceeded for {key}")),
            LedgerError::Busy(msg) => Self::Unavailable(msg),
            LedgerError::Storage(msg)
            | LedgerError::Serialization(msg)
            | LedgerError::Invariant(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: LedgerError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn ledger_errors_map_to_statuses() {
        assert_eq!(status_of(LedgerError::not_found("event", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(LedgerError::Forbidden("no".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(LedgerError::invalid("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(LedgerError::InsufficientBalance {
                available: Decimal::ONE,
                required: Decimal::TEN,
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(LedgerError::Conflict {
                upstream_tx_id: "tx".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(LedgerError::RateLimited { key: "aixbt".into() }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_of(LedgerError::Busy("locked".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(LedgerError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
