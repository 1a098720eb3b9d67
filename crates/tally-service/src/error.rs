//! API error types and responses.
//!
//! Quota and credit failures are deliberately distinct: 429 means the
//! request count is capped, 402 means the credit budget is. Both carry
//! enough detail for a client to decide whether to wait, purchase, or
//! escalate.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tally_core::format_credits;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Request-count quota exhausted for a window. Independent of credit
    /// balance; recoverable by waiting for the window rollover.
    #[error("quota exceeded: {window} limit {limit} reached ({current})")]
    QuotaExceeded {
        /// Which window is exhausted (`daily` or `monthly`).
        window: &'static str,
        /// The configured limit.
        limit: i64,
        /// The counter after the rejected increment.
        current: i64,
        /// Unix timestamp of the window rollover.
        resets_at_unix: i64,
    },

    /// The allocation cannot cover the requested cost. Recoverable by
    /// purchasing credits.
    #[error("insufficient credits: remaining={remaining_milli}, required={required_milli}")]
    InsufficientCredits {
        /// Remaining budget in milli-credits.
        remaining_milli: i64,
        /// Required amount in milli-credits.
        required_milli: i64,
    },

    /// The pool has too few unallocated credits (admin-time error).
    #[error("pool exhausted: available={available_milli}, requested={requested_milli}")]
    PoolExhausted {
        /// Unallocated milli-credits.
        available_milli: i64,
        /// Requested milli-credits.
        requested_milli: i64,
    },

    /// A pricing table lookup missed. Configuration defect; the request is
    /// rejected rather than priced at zero.
    #[error("unknown pricing key: {0}")]
    UnknownPricingKey(String),

    /// Webhook signature verification failed. Security-relevant; logged.
    #[error("invalid webhook signature")]
    SignatureInvalid,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
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
        let mut headers = HeaderMap::new();

        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::QuotaExceeded {
                window,
                limit,
                current,
                resets_at_unix,
            } => {
                // Mirror the rate-limit headers on the rejection so clients
                // can back off without parsing the body.
                headers.insert("ratelimit-limit", header_i64(*limit));
                headers.insert("ratelimit-remaining", HeaderValue::from_static("0"));
                headers.insert("ratelimit-reset", header_i64(*resets_at_unix));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "quota_exceeded",
                    self.to_string(),
                    Some(serde_json::json!({
                        "window": window,
                        "limit": limit,
                        "current": current,
                        "resets_at_unix": resets_at_unix,
                    })),
                )
            }
            Self::InsufficientCredits {
                remaining_milli,
                required_milli,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "remaining_milli": remaining_milli,
                    "required_milli": required_milli,
                    "remaining_credits": format_credits(*remaining_milli),
                    "required_credits": format_credits(*required_milli),
                })),
            ),
            Self::PoolExhausted {
                available_milli,
                requested_milli,
            } => (
                StatusCode::CONFLICT,
                "pool_exhausted",
                self.to_string(),
                Some(serde_json::json!({
                    "available_milli": available_milli,
                    "requested_milli": requested_milli,
                })),
            ),
            Self::UnknownPricingKey(key) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown_pricing_key",
                format!("no pricing configured for {key}"),
                None,
            ),
            Self::SignatureInvalid => (
                StatusCode::BAD_REQUEST,
                "signature_invalid",
                self.to_string(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, headers, Json(body)).into_response()
    }
}

fn header_i64(value: i64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

impl From<tally_store::StoreError> for ApiError {
    fn from(err: tally_store::StoreError) -> Self {
        match err {
            tally_store::StoreError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            tally_store::StoreError::InsufficientCredits {
                remaining_milli,
                required_milli,
            } => Self::InsufficientCredits {
                remaining_milli,
                required_milli,
            },
            tally_store::StoreError::PoolExhausted {
                available_milli,
                requested_milli,
            } => Self::PoolExhausted {
                available_milli,
                requested_milli,
            },
            tally_store::StoreError::AllocationExpired {
                pool_id,
                principal_id,
            } => Self::Conflict(format!(
                "allocation expired for {principal_id} in pool {pool_id}"
            )),
            tally_store::StoreError::InvalidAmount(amount) => {
                Self::BadRequest(format!("invalid amount: {amount}"))
            }
            tally_store::StoreError::Database(msg)
            | tally_store::StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<tally_core::PricingError> for ApiError {
    fn from(err: tally_core::PricingError) -> Self {
        match err {
            tally_core::PricingError::UnknownPricingKey { kind, key } => {
                Self::UnknownPricingKey(format!("{kind} {key:?}"))
            }
            tally_core::PricingError::InvalidQuantity(q) => {
                Self::BadRequest(format!("invalid quantity: {q}"))
            }
            tally_core::PricingError::Overflow => {
                Self::BadRequest("priced amount overflows".into())
            }
        }
    }
}
