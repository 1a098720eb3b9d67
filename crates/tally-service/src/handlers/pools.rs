//! Pool and allocation read handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{format_credits, PoolId, PoolLedgerEntry, PrincipalId};
use tally_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Pool balance response.
#[derive(Debug, Serialize)]
pub struct PoolResponse {
    /// The pool id.
    pub pool_id: String,
    /// Total credits in milli-credits.
    pub total_milli: i64,
    /// Allocated credits in milli-credits.
    pub allocated_milli: i64,
    /// Used credits in milli-credits.
    pub used_milli: i64,
    /// Unallocated credits in milli-credits (derived).
    pub available_milli: i64,
    /// Total formatted as decimal credits (display only).
    pub total_credits: String,
}

/// Get a pool's balances.
pub async fn get_pool(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(pool_id): Path<String>,
) -> Result<Json<PoolResponse>, ApiError> {
    let pool_id: PoolId = pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;

    let pool = state
        .store
        .get_pool(&pool_id)?
        .ok_or_else(|| ApiError::NotFound(format!("pool not found: {pool_id}")))?;

    Ok(Json(PoolResponse {
        pool_id: pool.pool_id.to_string(),
        total_milli: pool.total_milli,
        allocated_milli: pool.allocated_milli,
        used_milli: pool.used_milli,
        available_milli: pool.available_milli(),
        total_credits: format_credits(pool.total_milli),
    }))
}

/// Allocation response.
#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    /// The allocation id.
    pub allocation_id: String,
    /// Budget size in milli-credits.
    pub allocated_milli: i64,
    /// Consumed milli-credits.
    pub used_milli: i64,
    /// Remaining milli-credits (derived).
    pub remaining_milli: i64,
    /// Actor that set this budget.
    pub allocated_by: String,
}

/// Get the active allocation for a `(pool, principal)` pair.
pub async fn get_allocation(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((pool_id, principal_id)): Path<(String, String)>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let pool_id: PoolId = pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;
    let principal_id: PrincipalId = principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    let alloc = state
        .store
        .get_active_allocation(&pool_id, &principal_id)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("allocation not found: {pool_id}/{principal_id}"))
        })?;

    Ok(Json(AllocationResponse {
        allocation_id: alloc.allocation_id.to_string(),
        allocated_milli: alloc.allocated_milli,
        used_milli: alloc.used_milli,
        remaining_milli: alloc.remaining_milli(),
        allocated_by: alloc.allocated_by,
    }))
}

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum number of rows (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Attribution listing response.
#[derive(Debug, Serialize)]
pub struct AttributionListResponse {
    /// The records, newest first.
    pub attributions: Vec<tally_core::UsageAttributionRecord>,
}

/// List attribution records for an allocation, newest first.
pub async fn list_attributions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((pool_id, principal_id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Json<AttributionListResponse>, ApiError> {
    let pool_id: PoolId = pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;
    let principal_id: PrincipalId = principal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid principal ID".into()))?;

    let attributions =
        state
            .store
            .list_attributions(&pool_id, &principal_id, query.limit, query.offset)?;

    Ok(Json(AttributionListResponse { attributions }))
}

/// Pool ledger listing response.
#[derive(Debug, Serialize)]
pub struct PoolLedgerResponse {
    /// The entries, newest first.
    pub entries: Vec<PoolLedgerEntry>,
}

/// List pool-level balance mutations, newest first.
pub async fn list_pool_ledger(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(pool_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PoolLedgerResponse>, ApiError> {
    let pool_id: PoolId = pool_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pool ID".into()))?;

    let entries = state
        .store
        .list_pool_ledger(&pool_id, query.limit, query.offset)?;

    Ok(Json(PoolLedgerResponse { entries }))
}
