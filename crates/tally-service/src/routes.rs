//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, meter, pools, webhooks};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Metered gateway (gateway API key)
/// - `POST /v1/meter/authorize` - Pre-flight quota + credit check
/// - `POST /v1/meter/commit` - Deduct actual cost after the action
/// - `GET /v1/attributions/:correlation_id` - Resolve unknown outcomes
///
/// ## Reads (gateway API key)
/// - `GET /v1/pools/:pool_id` - Pool balances
/// - `GET /v1/pools/:pool_id/ledger` - Pool-level mutations
/// - `GET /v1/pools/:pool_id/allocations/:principal_id` - Active allocation
/// - `GET /v1/pools/:pool_id/allocations/:principal_id/attributions`
///
/// ## Admin (admin API key; all audit-logged)
/// - `POST /v1/admin/allocations` - Replace a principal's budget
/// - `POST /v1/admin/refunds` - Refund charged usage
/// - `POST /v1/admin/credits` - Manual credit grant
/// - `POST /v1/admin/quota/reset` - Zero the current quota window
/// - `POST /v1/admin/memberships` - Organization membership
/// - `POST /v1/admin/subscriptions` - Provision at the provider (outbound)
/// - `GET /v1/admin/reconciliation` - Diff against the provider
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/billing` - Billing provider events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Metered gateway
        .route("/v1/meter/authorize", post(meter::authorize))
        .route("/v1/meter/commit", post(meter::commit))
        .route(
            "/v1/attributions/:correlation_id",
            get(meter::get_attribution),
        )
        // Reads
        .route("/v1/pools/:pool_id", get(pools::get_pool))
        .route("/v1/pools/:pool_id/ledger", get(pools::list_pool_ledger))
        .route(
            "/v1/pools/:pool_id/allocations/:principal_id",
            get(pools::get_allocation),
        )
        .route(
            "/v1/pools/:pool_id/allocations/:principal_id/attributions",
            get(pools::list_attributions),
        )
        // Admin
        .route("/v1/admin/allocations", post(admin::allocate))
        .route("/v1/admin/refunds", post(admin::refund))
        .route("/v1/admin/credits", post(admin::credit))
        .route("/v1/admin/quota/reset", post(admin::quota_reset))
        .route("/v1/admin/memberships", post(admin::put_membership))
        .route("/v1/admin/subscriptions", post(admin::create_subscription))
        .route("/v1/admin/reconciliation", get(admin::reconciliation))
        // Webhooks
        .route("/webhooks/billing", post(webhooks::billing_webhook))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
