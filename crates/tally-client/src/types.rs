//! Wire types mirroring the tally service API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tally_core::RoutingMode;

/// Pre-flight authorization request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRequest {
    /// The principal performing the metered action.
    pub principal_id: String,
    /// Resource category about to be consumed.
    pub resource_type: String,
    /// Estimated quantity.
    pub quantity: i64,
    /// Routing mode.
    pub routing_mode: RoutingMode,
}

/// Pre-flight authorization response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResponse {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// The pool the action will draw from.
    pub pool_id: String,
    /// Estimated cost in milli-credits.
    pub estimated_cost_milli: i64,
    /// Remaining allocation budget in milli-credits.
    pub remaining_milli: i64,
}

/// Post-action commit request.
#[derive(Debug, Clone, Serialize)]
pub struct CommitRequest {
    /// The principal that performed the metered action.
    pub principal_id: String,
    /// Resource category consumed.
    pub resource_type: String,
    /// Concrete resource name.
    pub resource_name: String,
    /// Actual quantity consumed.
    pub quantity: i64,
    /// Routing mode the action ran under.
    pub routing_mode: RoutingMode,
    /// Caller idempotency key; retries must reuse it.
    pub correlation_id: String,
    /// Additional context recorded on the attribution.
    pub metadata: serde_json::Value,
}

/// Post-action commit response.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitResponse {
    /// The action was accounted for.
    pub success: bool,
    /// The pool the deduction drew from.
    pub pool_id: String,
    /// Actual cost in milli-credits.
    pub cost_milli: i64,
    /// Remaining allocation budget in milli-credits.
    pub remaining_milli: i64,
    /// Attribution record id (absent for zero-cost requests).
    pub attribution_id: Option<String>,
    /// True when the charge became an overdraft anomaly.
    pub overdraft: bool,
    /// True when this correlation id had already been committed.
    pub deduplicated: bool,
}

/// An attribution record as returned by the lookup endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionRecord {
    /// Record id.
    pub attribution_id: String,
    /// The principal charged.
    pub principal_id: String,
    /// The pool charged.
    pub pool_id: String,
    /// Movement kind (`usage`, `refund`, `overdraft`).
    pub kind: String,
    /// Resource category.
    pub resource_type: String,
    /// Credits charged in milli-credits.
    pub credits_charged_milli: i64,
    /// Caller idempotency key.
    pub correlation_id: String,
    /// Additional context recorded on the attribution.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

/// Pool balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolBalance {
    /// The pool id.
    pub pool_id: String,
    /// Total credits in milli-credits.
    pub total_milli: i64,
    /// Allocated credits in milli-credits.
    pub allocated_milli: i64,
    /// Used credits in milli-credits.
    pub used_milli: i64,
    /// Unallocated credits in milli-credits.
    pub available_milli: i64,
}

/// API error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// The error payload.
    pub error: ApiErrorBody,
}

/// API error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured remediation detail.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
