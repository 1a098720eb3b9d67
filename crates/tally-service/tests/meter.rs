//! Metered-gateway integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

use tally_core::{AttributionKind, PrincipalId, QuotaLimits};
use tally_store::Store;

// ============================================================================
// Authorize
// ============================================================================

#[tokio::test]
async fn authorize_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/meter/authorize")
        .json(&json!({
            "principal_id": PrincipalId::generate().to_string(),
            "resource_type": "api_call",
            "quantity": 1000
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn authorize_success_carries_rate_limit_headers() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    harness.seed_allocation(principal, 100_000);

    let response = harness
        .server
        .post("/v1/meter/authorize")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1000
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["allowed"], true);
    // api_call: 1 credit per 1000 calls, free tier +20% markup.
    assert_eq!(body["estimated_cost_milli"], 1_200);
    assert_eq!(body["remaining_milli"], 100_000);

    assert_eq!(response.header("ratelimit-limit"), "100");
    assert_eq!(response.header("ratelimit-remaining"), "99");
    assert!(!response.header("ratelimit-reset").is_empty());
    assert_eq!(response.header("x-credits-remaining"), "100.000");
}

#[tokio::test]
async fn authorize_insufficient_credits_is_402_not_429() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    // Funded pool, but the allocation is smaller than the estimate.
    harness.seed_allocation(principal, 100);

    let response = harness
        .server
        .post("/v1/meter/authorize")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "llm_output_tokens",
            "quantity": 100_000
        }))
        .await;

    response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["remaining_milli"], 100);
}

#[tokio::test]
async fn authorize_quota_exceeded_is_429_not_402() {
    let harness = TestHarness::with_config(|config| {
        config.quotas.default = QuotaLimits {
            daily: 3,
            monthly: 1_000,
        };
    });
    let principal = PrincipalId::generate();
    // Ample credits: the rejection below must be about the quota.
    harness.seed_allocation(principal, 10_000_000);

    for _ in 0..3 {
        harness
            .server
            .post("/v1/meter/authorize")
            .add_header("x-api-key", harness.gateway_api_key.as_str())
            .json(&json!({
                "principal_id": principal.to_string(),
                "resource_type": "api_call",
                "quantity": 1
            }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/v1/meter/authorize")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1
        }))
        .await;

    response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "quota_exceeded");
    assert_eq!(body["error"]["details"]["window"], "daily");
    assert_eq!(body["error"]["details"]["limit"], 3);
    // Usage beyond the quota is still recorded.
    assert_eq!(body["error"]["details"]["current"], 4);
    assert_eq!(response.header("ratelimit-remaining"), "0");
}

#[tokio::test]
async fn authorize_unknown_resource_fails_closed() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    harness.seed_allocation(principal, 100_000);

    let response = harness
        .server
        .post("/v1/meter/authorize")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "quantum_flux",
            "quantity": 10
        }))
        .await;

    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unknown_pricing_key");
}

// ============================================================================
// Commit
// ============================================================================

#[tokio::test]
async fn commit_deducts_actual_cost() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let pool = harness.seed_allocation(principal, 100_000);

    let response = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "resource_name": "chat.completions",
            "quantity": 1000,
            "correlation_id": "corr-commit-1",
            "metadata": {"request_id": "req-1"}
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["cost_milli"], 1_200);
    assert_eq!(body["remaining_milli"], 98_800);
    assert_eq!(body["overdraft"], false);

    assert_eq!(response.header("x-cost-incurred"), "1.200");
    assert_eq!(response.header("x-credits-remaining"), "98.800");

    let alloc = harness
        .store
        .get_active_allocation(&pool, &principal)
        .unwrap()
        .unwrap();
    assert_eq!(alloc.used_milli, 1_200);
}

#[tokio::test]
async fn commit_retry_with_same_correlation_id_deduplicates() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let pool = harness.seed_allocation(principal, 100_000);

    let request = json!({
        "principal_id": principal.to_string(),
        "resource_type": "api_call",
        "quantity": 1000,
        "correlation_id": "corr-retry"
    });

    let first = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&request)
        .await;
    first.assert_status_ok();
    let first_body: serde_json::Value = first.json();
    assert_eq!(first_body["deduplicated"], false);

    let second = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&request)
        .await;
    second.assert_status_ok();
    let second_body: serde_json::Value = second.json();
    assert_eq!(second_body["deduplicated"], true);
    assert_eq!(
        second_body["attribution_id"],
        first_body["attribution_id"]
    );

    // Charged once.
    let alloc = harness
        .store
        .get_active_allocation(&pool, &principal)
        .unwrap()
        .unwrap();
    assert_eq!(alloc.used_milli, 1_200);
}

#[tokio::test]
async fn commit_after_losing_race_records_overdraft() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let pool = harness.seed_allocation(principal, 500);

    // Actual consumption prices above the allocation.
    let response = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "llm_output_tokens",
            "resource_name": "sonnet-large",
            "quantity": 50_000,
            "correlation_id": "corr-overdraft"
        }))
        .await;

    // The action already happened: success from the caller's perspective.
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["overdraft"], true);

    // Flagged for reconciliation; no counters moved.
    let record = harness
        .store
        .get_attribution_by_correlation("corr-overdraft")
        .unwrap()
        .unwrap();
    assert_eq!(record.kind, AttributionKind::Overdraft);

    let alloc = harness
        .store
        .get_active_allocation(&pool, &principal)
        .unwrap()
        .unwrap();
    assert_eq!(alloc.used_milli, 0);
}

#[tokio::test]
async fn commit_byo_costs_nothing() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();

    let response = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "llm_output_tokens",
            "quantity": 1_000_000,
            "routing_mode": "bring_your_own",
            "correlation_id": "corr-byo"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["cost_milli"], 0);
    assert_eq!(body["overdraft"], false);
    assert_eq!(response.header("x-cost-incurred"), "0.000");
}

#[tokio::test]
async fn commit_without_correlation_id_is_rejected() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    harness.seed_allocation(principal, 100_000);

    let response = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1000,
            "correlation_id": ""
        }))
        .await;

    response.assert_status_bad_request();
}

// ============================================================================
// Attribution lookup
// ============================================================================

#[tokio::test]
async fn attribution_lookup_resolves_unknown_outcomes() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    harness.seed_allocation(principal, 100_000);

    harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1000,
            "correlation_id": "corr-lookup"
        }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .get("/v1/attributions/corr-lookup")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["correlation_id"], "corr-lookup");
    assert_eq!(body["credits_charged_milli"], 1_200);

    harness
        .server
        .get("/v1/attributions/corr-never-happened")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .await
        .assert_status_not_found();
}

// ============================================================================
// Org pool resolution
// ============================================================================

#[tokio::test]
async fn org_pool_takes_over_after_joining_and_history_stays_individual() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let individual_pool = harness.seed_allocation(principal, 100_000);

    // First commit draws from the individual pool.
    harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1000,
            "correlation_id": "corr-individual"
        }))
        .await
        .assert_status_ok();

    // Join an organization mid-session.
    let org_pool = tally_core::PoolId::generate();
    harness
        .store
        .credit_pool(&org_pool, 1_000_000, "org seed", "test")
        .unwrap();
    harness
        .store
        .allocate(&org_pool, &principal, 500_000, "test")
        .unwrap();
    harness
        .server
        .post("/v1/admin/memberships")
        .add_header("x-admin-key", harness.admin_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "pool_id": org_pool.to_string(),
            "is_default": true
        }))
        .await
        .assert_status_ok();

    // Subsequent requests use the org pool.
    let response = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1000,
            "correlation_id": "corr-org"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["pool_id"], org_pool.to_string());

    // Prior attribution rows remain attributed to the individual pool.
    let individual_records = harness
        .store
        .list_attributions(&individual_pool, &principal, 10, 0)
        .unwrap();
    assert_eq!(individual_records.len(), 1);
    assert_eq!(individual_records[0].correlation_id, "corr-individual");

    let org_records = harness
        .store
        .list_attributions(&org_pool, &principal, 10, 0)
        .unwrap();
    assert_eq!(org_records.len(), 1);
    assert_eq!(org_records[0].correlation_id, "corr-org");
}
