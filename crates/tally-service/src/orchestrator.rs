//! Billing orchestrator: the request-time coordination of quota, pricing,
//! and the credit ledger.
//!
//! Two-phase flow. `authorize` runs before the metered action: quota
//! check-and-increment, billing-pool resolution, pre-flight estimate,
//! advisory balance check. `commit` runs after: the actual cost is
//! recomputed from real consumption and deducted atomically. A commit that
//! loses a late race records an overdraft instead of failing - the action
//! already happened, so it is never silently free and never an error to
//! the caller.

use serde::Serialize;

use tally_core::{
    resolve_billing_pool, AttributionDraft, AttributionId, AttributionKind, PoolId, PrincipalId,
    QuotaDecision, QuotaWindow, RoutingMode,
};
use tally_store::{Store, StoreError};

use crate::error::ApiError;
use crate::state::AppState;

/// Result of a pre-flight authorization.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeOutcome {
    /// The pool this request would draw from.
    pub pool_id: PoolId,

    /// Pre-flight cost estimate in milli-credits.
    pub estimated_milli: i64,

    /// Allocation budget remaining before any deduction, in milli-credits.
    pub remaining_milli: i64,

    /// Quota counters after the increment.
    pub decision: QuotaDecision,
}

/// Result of a post-action commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    /// The pool the deduction drew from.
    pub pool_id: PoolId,

    /// Actual cost in milli-credits.
    pub cost_milli: i64,

    /// Allocation budget remaining after the commit, in milli-credits.
    pub remaining_milli: i64,

    /// The attribution written (absent only for zero-cost requests).
    pub attribution_id: Option<AttributionId>,

    /// True when the deduction lost a late race and an overdraft was
    /// recorded instead. The caller's action still succeeded.
    pub overdraft: bool,

    /// True when this correlation id had already been committed and the
    /// stored outcome was returned.
    pub deduplicated: bool,
}

/// The pricing/quota tier for a principal: their subscription's plan code,
/// or `free` without one. The plan code stays authoritative even while
/// past_due; grace-period handling is a provider-side decision.
#[must_use]
pub fn tier_for(state: &AppState, principal_id: &PrincipalId) -> String {
    match state.store.get_subscription(principal_id) {
        Ok(Some(subscription)) => subscription.plan_code,
        Ok(None) => "free".to_string(),
        Err(e) => {
            tracing::error!(principal_id = %principal_id, error = %e, "Subscription lookup failed; defaulting tier");
            "free".to_string()
        }
    }
}

/// Resolve which pool a principal's usage draws from.
///
/// Deterministic order: default-marked organization first, then the
/// earliest-joined organization, else the principal's individual pool.
///
/// # Errors
///
/// Returns an error if the membership lookup fails.
pub fn resolve_pool(state: &AppState, principal_id: &PrincipalId) -> Result<PoolId, ApiError> {
    let memberships = state.store.get_memberships(principal_id)?;
    Ok(resolve_billing_pool(*principal_id, &memberships))
}

fn quota_error(decision: &QuotaDecision) -> ApiError {
    let status = decision
        .exceeded_window()
        .copied()
        .unwrap_or(decision.daily);
    ApiError::QuotaExceeded {
        window: match status.window {
            QuotaWindow::Daily => "daily",
            QuotaWindow::Monthly => "monthly",
        },
        limit: status.limit,
        current: status.count,
        resets_at_unix: status.resets_at.timestamp(),
    }
}

/// Pre-flight authorization for a metered action.
///
/// # Errors
///
/// - `ApiError::QuotaExceeded` when a window is exhausted (the increment is
///   still recorded for audit).
/// - `ApiError::InsufficientCredits` when the estimate exceeds the
///   remaining budget. Advisory: `commit` re-checks atomically.
/// - `ApiError::UnknownPricingKey` on a pricing table miss.
pub fn authorize(
    state: &AppState,
    principal_id: &PrincipalId,
    resource_type: &str,
    quantity: i64,
    mode: RoutingMode,
) -> Result<AuthorizeOutcome, ApiError> {
    let tier = tier_for(state, principal_id);
    let limits = state.config.quotas.limits_for(&tier);

    let decision =
        state
            .store
            .quota_check_and_increment(principal_id, &limits, chrono::Utc::now())?;
    if !decision.allowed() {
        return Err(quota_error(&decision));
    }

    let pool_id = resolve_pool(state, principal_id)?;
    let estimated_milli = state
        .config
        .pricing
        .estimate(resource_type, quantity, mode, &tier)?;

    let remaining_milli = state
        .store
        .get_active_allocation(&pool_id, principal_id)?
        .map_or(0, |alloc| alloc.remaining_milli());

    if estimated_milli > 0 && !state.store.has_sufficient(&pool_id, principal_id, estimated_milli)? {
        return Err(ApiError::InsufficientCredits {
            remaining_milli,
            required_milli: estimated_milli,
        });
    }

    Ok(AuthorizeOutcome {
        pool_id,
        estimated_milli,
        remaining_milli,
        decision,
    })
}

/// Commit the actual cost of a performed action.
///
/// Retries must reuse the same `correlation_id`; a duplicate commit returns
/// the stored outcome instead of deducting again.
///
/// # Errors
///
/// Pricing and storage failures propagate; a lost deduction race does NOT
/// error (see [`CommitOutcome::overdraft`]).
#[allow(clippy::too_many_arguments)]
pub fn commit(
    state: &AppState,
    principal_id: &PrincipalId,
    resource_type: &str,
    resource_name: &str,
    quantity: i64,
    mode: RoutingMode,
    correlation_id: &str,
    metadata: serde_json::Value,
) -> Result<CommitOutcome, ApiError> {
    let tier = tier_for(state, principal_id);
    let pool_id = resolve_pool(state, principal_id)?;

    let cost_milli = state
        .config
        .pricing
        .estimate(resource_type, quantity, mode, &tier)?;

    // BYO and zero-quantity requests never touch the ledger.
    if cost_milli == 0 {
        let remaining_milli = state
            .store
            .get_active_allocation(&pool_id, principal_id)?
            .map_or(0, |alloc| alloc.remaining_milli());
        return Ok(CommitOutcome {
            pool_id,
            cost_milli: 0,
            remaining_milli,
            attribution_id: None,
            overdraft: false,
            deduplicated: false,
        });
    }

    let draft = AttributionDraft::new(resource_type, resource_name, correlation_id)
        .with_metadata(metadata);

    match state
        .store
        .deduct(&pool_id, principal_id, cost_milli, draft.clone())
    {
        Ok(outcome) => {
            // A deduplicated outcome may resolve to an earlier overdraft;
            // report it as such so retries see a consistent answer.
            let overdraft = outcome.deduplicated
                && state
                    .store
                    .get_attribution(outcome.attribution_id)?
                    .is_some_and(|record| record.kind == AttributionKind::Overdraft);

            Ok(CommitOutcome {
                pool_id,
                cost_milli,
                remaining_milli: outcome.remaining_milli,
                attribution_id: Some(outcome.attribution_id),
                overdraft,
                deduplicated: outcome.deduplicated,
            })
        }
        Err(
            err @ (StoreError::InsufficientCredits { .. }
            | StoreError::NotFound { .. }
            | StoreError::AllocationExpired { .. }),
        ) => {
            // The metered action already happened; the failed charge becomes
            // a flagged overdraft for the reconciliation workflow.
            let mut overdraft_draft = draft;
            overdraft_draft.metadata = serde_json::json!({
                "anomaly": "overdraft",
                "reason": err.to_string(),
                "context": overdraft_draft.metadata,
            });

            let attribution_id = state.store.record_overdraft(
                &pool_id,
                principal_id,
                cost_milli,
                overdraft_draft,
            )?;

            let remaining_milli = state
                .store
                .get_active_allocation(&pool_id, principal_id)?
                .map_or(0, |alloc| alloc.remaining_milli());

            Ok(CommitOutcome {
                pool_id,
                cost_milli,
                remaining_milli,
                attribution_id: Some(attribution_id),
                overdraft: true,
                deduplicated: false,
            })
        }
        Err(err) => Err(err.into()),
    }
}
