//! Administrative handlers: allocations, refunds, credit grants, quota
//! resets, memberships, and the reconciliation report.
//!
//! Every mutation logs the acting operator; the ledger rows themselves
//! carry the actor where the data model has a slot for it.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{AttributionDraft, OrgMembership, PoolId, PrincipalId, QuotaWindow};
use tally_store::Store;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Allocation request.
#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    /// The pool to carve from.
    pub pool_id: String,
    /// The principal receiving the budget.
    pub principal_id: String,
    /// Budget size in milli-credits.
    pub amount_milli: i64,
}

/// Allocation response.
#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    /// The new allocation's id.
    pub allocation_id: String,
}

/// Replace a principal's allocation in a pool.
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, ApiError> {
    let pool_id: PoolId = body
        .pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    let allocation_id =
        state
            .store
            .allocate(&pool_id, &principal_id, body.amount_milli, &auth.actor)?;

    Ok(Json(AllocateResponse {
        allocation_id: allocation_id.to_string(),
    }))
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// The pool the usage was charged against.
    pub pool_id: String,
    /// The principal whose usage is refunded.
    pub principal_id: String,
    /// Amount to return in milli-credits.
    pub amount_milli: i64,
    /// Why the refund was issued.
    pub reason: String,
    /// Idempotency key for this refund operation.
    pub correlation_id: String,
}

/// Refund response.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// The refund attribution's id.
    pub attribution_id: String,
    /// Milli-credits actually returned.
    pub refunded_milli: i64,
    /// True when the amount was clamped to avoid negative usage.
    pub clamped: bool,
}

/// Refund previously charged usage.
pub async fn refund(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let pool_id: PoolId = body
        .pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    let draft = AttributionDraft::new("refund", &body.reason, &body.correlation_id)
        .with_metadata(serde_json::json!({ "actor": auth.actor }));

    let outcome = state
        .store
        .refund(&pool_id, &principal_id, body.amount_milli, draft)?;

    tracing::info!(
        actor = %auth.actor,
        pool_id = %pool_id,
        principal_id = %principal_id,
        refunded_milli = outcome.refunded_milli,
        clamped = outcome.clamped,
        "Refund issued"
    );

    Ok(Json(RefundResponse {
        attribution_id: outcome.attribution_id.to_string(),
        refunded_milli: outcome.refunded_milli,
        clamped: outcome.clamped,
    }))
}

/// Manual credit grant request.
#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    /// The pool to credit.
    pub pool_id: String,
    /// Amount in milli-credits.
    pub amount_milli: i64,
    /// Why the credits were granted.
    pub reason: String,
}

/// Credit grant response.
#[derive(Debug, Serialize)]
pub struct CreditResponse {
    /// New pool total in milli-credits.
    pub total_milli: i64,
}

/// Grant credits to a pool outside the invoice flow (support workflow).
pub async fn credit(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<CreditRequest>,
) -> Result<Json<CreditResponse>, ApiError> {
    let pool_id: PoolId = body
        .pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;

    let total_milli =
        state
            .store
            .credit_pool(&pool_id, body.amount_milli, &body.reason, &auth.actor)?;

    tracing::info!(
        actor = %auth.actor,
        pool_id = %pool_id,
        amount_milli = body.amount_milli,
        total_milli,
        "Manual credit grant"
    );

    Ok(Json(CreditResponse { total_milli }))
}

/// Quota reset request.
#[derive(Debug, Deserialize)]
pub struct QuotaResetRequest {
    /// The principal whose counter is reset.
    pub principal_id: String,
    /// Which window to zero (current period only).
    pub window: QuotaWindow,
}

/// Zero a principal's quota counter for the current window.
pub async fn quota_reset(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<QuotaResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    state
        .store
        .quota_force_reset(&principal_id, body.window, chrono::Utc::now())?;

    tracing::info!(
        actor = %auth.actor,
        principal_id = %principal_id,
        window = ?body.window,
        "Quota counter force-reset"
    );

    Ok(Json(serde_json::json!({ "reset": true })))
}

/// Membership request.
#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    /// The member principal.
    pub principal_id: String,
    /// The organization pool.
    pub pool_id: String,
    /// Whether this is the member's default organization.
    #[serde(default)]
    pub is_default: bool,
}

/// Add or update an organization membership.
pub async fn put_membership(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<MembershipRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;
    let pool_id: PoolId = body
        .pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;

    state.store.put_membership(&OrgMembership {
        principal_id,
        pool_id,
        is_default: body.is_default,
        joined_at: chrono::Utc::now(),
    })?;

    tracing::info!(
        actor = %auth.actor,
        principal_id = %principal_id,
        pool_id = %pool_id,
        is_default = body.is_default,
        "Membership updated"
    );

    Ok(Json(serde_json::json!({ "updated": true })))
}

/// Subscription provisioning request.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// The billing entity.
    pub principal_id: String,
    /// Provider plan code.
    pub plan_code: String,
}

/// Provision a subscription at the billing provider.
///
/// Outbound only: the internal `SubscriptionRecord` is not written here.
/// The provider confirms via webhook, which keeps the reconciliation
/// processor the single writer of subscription state.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<crate::provider::ProviderSubscription>, ApiError> {
    let principal_id: PrincipalId = body
        .principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| ApiError::ExternalService("billing provider not configured".into()))?;

    let subscription = provider
        .create_subscription(&principal_id.to_string(), &body.plan_code)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;

    tracing::info!(
        actor = %auth.actor,
        principal_id = %principal_id,
        plan_code = %body.plan_code,
        external_subscription_id = %subscription.external_subscription_id,
        "Subscription provisioned at provider"
    );

    Ok(Json(subscription))
}

/// One mismatch between the internal mirror and the provider.
#[derive(Debug, Serialize)]
pub struct ReconciliationEntry {
    /// The billing entity.
    pub principal_id: String,
    /// The provider-side subscription id.
    pub external_subscription_id: String,
    /// Which field disagrees (`status`, `plan_code`, `missing`).
    pub field: String,
    /// Our value.
    pub internal: String,
    /// The provider's value.
    pub provider: String,
}

/// Reconciliation report.
#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    /// Subscriptions checked.
    pub checked: usize,
    /// Mismatches found.
    pub mismatches: Vec<ReconciliationEntry>,
}

/// Diff internal subscription state against the provider.
///
/// Safety net for the webhook path: if the provider's retry window was
/// shorter than an outage, this report surfaces the drift for manual
/// reconciliation.
pub async fn reconciliation(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<ReconciliationReport>, ApiError> {
    let provider = state
        .provider
        .as_ref()
        .ok_or_else(|| ApiError::ExternalService("billing provider not configured".into()))?;

    let subscriptions = state.store.list_subscriptions()?;
    let checked = subscriptions.len();
    let mut mismatches = Vec::new();

    for sub in subscriptions {
        match provider
            .fetch_subscription(&sub.external_subscription_id)
            .await
        {
            Ok(remote) => {
                if remote.status != sub.status.to_string() {
                    mismatches.push(ReconciliationEntry {
                        principal_id: sub.principal_id.to_string(),
                        external_subscription_id: sub.external_subscription_id.clone(),
                        field: "status".into(),
                        internal: sub.status.to_string(),
                        provider: remote.status,
                    });
                }
                if remote.plan_code != sub.plan_code {
                    mismatches.push(ReconciliationEntry {
                        principal_id: sub.principal_id.to_string(),
                        external_subscription_id: sub.external_subscription_id,
                        field: "plan_code".into(),
                        internal: sub.plan_code,
                        provider: remote.plan_code,
                    });
                }
            }
            Err(e) => {
                mismatches.push(ReconciliationEntry {
                    principal_id: sub.principal_id.to_string(),
                    external_subscription_id: sub.external_subscription_id,
                    field: "missing".into(),
                    internal: sub.status.to_string(),
                    provider: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        actor = %auth.actor,
        checked,
        mismatches = mismatches.len(),
        "Reconciliation report generated"
    );

    Ok(Json(ReconciliationReport {
        checked,
        mismatches,
    }))
}
