//! Metered-action gateway handlers.
//!
//! `authorize` runs before the metered action, `commit` after it with the
//! actual consumption. Both responses carry rate-limit and credit headers
//! so gateway callers can propagate them to end clients.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{format_credits, PrincipalId, RoutingMode, UsageAttributionRecord};
use tally_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::orchestrator;
use crate::state::AppState;

fn default_routing_mode() -> RoutingMode {
    RoutingMode::Standard
}

/// Pre-flight authorization request.
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    /// The principal performing the metered action.
    pub principal_id: String,
    /// Resource category about to be consumed.
    pub resource_type: String,
    /// Estimated quantity (tokens, calls, ...).
    pub quantity: i64,
    /// Routing mode for the request.
    #[serde(default = "default_routing_mode")]
    pub routing_mode: RoutingMode,
}

/// Pre-flight authorization response.
#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    /// Whether the action may proceed (always true on a 200).
    pub allowed: bool,
    /// The pool the action will draw from.
    pub pool_id: String,
    /// Estimated cost in milli-credits.
    pub estimated_cost_milli: i64,
    /// Remaining allocation budget in milli-credits.
    pub remaining_milli: i64,
}

/// Authorize a metered action before it is performed.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<AuthorizeRequest>,
) -> Result<(HeaderMap, Json<AuthorizeResponse>), ApiError> {
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    let outcome = orchestrator::authorize(
        &state,
        &principal_id,
        &body.resource_type,
        body.quantity,
        body.routing_mode,
    )?;

    tracing::debug!(
        service = %auth.service_name,
        principal_id = %principal_id,
        resource_type = %body.resource_type,
        estimated_milli = outcome.estimated_milli,
        "Metered action authorized"
    );

    let mut headers = rate_limit_headers(&outcome.decision);
    insert_credit_header(&mut headers, "x-credits-remaining", outcome.remaining_milli);

    Ok((
        headers,
        Json(AuthorizeResponse {
            allowed: true,
            pool_id: outcome.pool_id.to_string(),
            estimated_cost_milli: outcome.estimated_milli,
            remaining_milli: outcome.remaining_milli,
        }),
    ))
}

/// Post-action commit request.
#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    /// The principal that performed the metered action.
    pub principal_id: String,
    /// Resource category consumed.
    pub resource_type: String,
    /// Concrete resource name (model identifier etc.).
    #[serde(default)]
    pub resource_name: String,
    /// Actual quantity consumed.
    pub quantity: i64,
    /// Routing mode the action ran under.
    #[serde(default = "default_routing_mode")]
    pub routing_mode: RoutingMode,
    /// Caller idempotency key; retries must reuse it.
    pub correlation_id: String,
    /// Additional context recorded on the attribution.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Post-action commit response.
#[derive(Debug, Serialize)]
pub struct CommitResponse {
    /// The action was accounted for (deducted or overdraft-flagged).
    pub success: bool,
    /// The pool the deduction drew from.
    pub pool_id: String,
    /// Actual cost in milli-credits.
    pub cost_milli: i64,
    /// Remaining allocation budget in milli-credits.
    pub remaining_milli: i64,
    /// Attribution record id (absent for zero-cost requests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution_id: Option<String>,
    /// True when the charge became an overdraft anomaly.
    pub overdraft: bool,
    /// True when this correlation id had already been committed.
    pub deduplicated: bool,
}

/// Commit the actual cost after the metered action completed.
pub async fn commit(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CommitRequest>,
) -> Result<(HeaderMap, Json<CommitResponse>), ApiError> {
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    if body.correlation_id.is_empty() {
        return Err(ApiError::BadRequest("correlation_id is required".into()));
    }

    let outcome = orchestrator::commit(
        &state,
        &principal_id,
        &body.resource_type,
        &body.resource_name,
        body.quantity,
        body.routing_mode,
        &body.correlation_id,
        body.metadata,
    )?;

    tracing::info!(
        service = %auth.service_name,
        principal_id = %principal_id,
        correlation_id = %body.correlation_id,
        cost_milli = outcome.cost_milli,
        overdraft = outcome.overdraft,
        deduplicated = outcome.deduplicated,
        "Metered action committed"
    );

    let mut headers = HeaderMap::new();
    insert_credit_header(&mut headers, "x-cost-incurred", outcome.cost_milli);
    insert_credit_header(&mut headers, "x-credits-remaining", outcome.remaining_milli);

    Ok((
        headers,
        Json(CommitResponse {
            success: true,
            pool_id: outcome.pool_id.to_string(),
            cost_milli: outcome.cost_milli,
            remaining_milli: outcome.remaining_milli,
            attribution_id: outcome.attribution_id.map(|id| id.to_string()),
            overdraft: outcome.overdraft,
            deduplicated: outcome.deduplicated,
        }),
    ))
}

/// Look up an attribution by its correlation id.
///
/// Resolves the "unknown outcome" case: a caller whose commit timed out
/// queries here before deciding whether to retry.
pub async fn get_attribution(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(correlation_id): Path<String>,
) -> Result<Json<UsageAttributionRecord>, ApiError> {
    let record = state
        .store
        .get_attribution_by_correlation(&correlation_id)?
        .ok_or_else(|| ApiError::NotFound(format!("attribution not found: {correlation_id}")))?;

    Ok(Json(record))
}

/// Rate-limit headers from the tighter (daily) window.
fn rate_limit_headers(decision: &tally_core::QuotaDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_i64_header(&mut headers, "ratelimit-limit", decision.daily.limit);
    insert_i64_header(
        &mut headers,
        "ratelimit-remaining",
        decision.daily.remaining().min(decision.monthly.remaining()),
    );
    insert_i64_header(
        &mut headers,
        "ratelimit-reset",
        decision.daily.resets_at.timestamp(),
    );
    headers
}

fn insert_i64_header(headers: &mut HeaderMap, name: &'static str, value: i64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

fn insert_credit_header(headers: &mut HeaderMap, name: &'static str, amount_milli: i64) {
    if let Ok(value) = HeaderValue::from_str(&format_credits(amount_milli)) {
        headers.insert(name, value);
    }
}
