//! Webhook endpoint integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

use tally_core::{PoolId, PrincipalId, SubscriptionStatus};
use tally_store::Store;

fn invoice_paid_body(event_id: &str, principal: PrincipalId, amount_milli: i64) -> String {
    json!({
        "event_id": event_id,
        "type": "invoice.paid",
        "data": {
            "principal_id": principal.to_string(),
            "invoice_id": "inv_100",
            "amount_milli": amount_milli
        }
    })
    .to_string()
}

// ============================================================================
// Signature verification
// ============================================================================

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected_without_state_change() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let body = invoice_paid_body("evt_sig", principal, 10_000);

    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header("x-billing-signature", "deadbeef")
        .add_header("content-type", "application/json")
        .text(body.clone())
        .await;
    response.assert_status_bad_request();
    let error: serde_json::Value = response.json();
    assert_eq!(error["error"]["code"], "signature_invalid");

    // The dedup store was not touched: a correctly re-signed retry of the
    // same event still applies.
    assert!(!harness.store.is_event_processed("evt_sig").unwrap());
    let retry = harness
        .server
        .post("/webhooks/billing")
        .add_header("x-billing-signature", harness.sign_webhook(&body))
        .add_header("content-type", "application/json")
        .text(body)
        .await;
    retry.assert_status_ok();
    let retried: serde_json::Value = retry.json();
    assert_eq!(retried["status"], "applied");
}

#[tokio::test]
async fn webhook_missing_signature_is_rejected() {
    let harness = TestHarness::new();
    let body = invoice_paid_body("evt_nosig", PrincipalId::generate(), 1_000);

    harness
        .server
        .post("/webhooks/billing")
        .add_header("content-type", "application/json")
        .text(body)
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn malformed_payload_is_a_400() {
    let harness = TestHarness::new();
    let body = "{not json";

    harness
        .server
        .post("/webhooks/billing")
        .add_header("x-billing-signature", harness.sign_webhook(body))
        .add_header("content-type", "application/json")
        .text(body)
        .await
        .assert_status_bad_request();
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn invoice_paid_replay_credits_exactly_once() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let body = invoice_paid_body("evt_replay", principal, 25_000);
    let signature = harness.sign_webhook(&body);

    let first = harness
        .server
        .post("/webhooks/billing")
        .add_header("x-billing-signature", signature.clone())
        .add_header("content-type", "application/json")
        .text(body.clone())
        .await;
    first.assert_status_ok();
    let first_body: serde_json::Value = first.json();
    assert_eq!(first_body["status"], "applied");

    // At-least-once delivery: replays answer success without reapplying.
    for _ in 0..3 {
        let replay = harness
            .server
            .post("/webhooks/billing")
            .add_header("x-billing-signature", signature.clone())
            .add_header("content-type", "application/json")
            .text(body.clone())
            .await;
        replay.assert_status_ok();
        let replay_body: serde_json::Value = replay.json();
        assert_eq!(replay_body["status"], "already_processed");
    }

    let pool = harness
        .store
        .get_pool(&PoolId::for_principal(principal))
        .unwrap()
        .unwrap();
    assert_eq!(pool.total_milli, 25_000);
}

// ============================================================================
// Subscription lifecycle
// ============================================================================

async fn deliver(harness: &TestHarness, body: String) -> serde_json::Value {
    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header("x-billing-signature", harness.sign_webhook(&body))
        .add_header("content-type", "application/json")
        .text(body)
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn subscription_lifecycle_via_endpoint() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();

    let created = deliver(
        &harness,
        json!({
            "event_id": "evt_l1",
            "type": "subscription.created",
            "data": {
                "principal_id": principal.to_string(),
                "plan_code": "standard",
                "external_subscription_id": "sub_ext_7",
                "current_period_end": "2026-09-01T00:00:00Z"
            }
        })
        .to_string(),
    )
    .await;
    assert_eq!(created["status"], "applied");

    deliver(
        &harness,
        json!({
            "event_id": "evt_l2",
            "type": "subscription.updated",
            "data": {
                "principal_id": principal.to_string(),
                "plan_code": "pro",
                "status": "active",
                "external_subscription_id": "sub_ext_7",
                "current_period_end": "2026-10-01T00:00:00Z"
            }
        })
        .to_string(),
    )
    .await;

    let failed = deliver(
        &harness,
        json!({
            "event_id": "evt_l3",
            "type": "invoice.payment_failed",
            "data": { "principal_id": principal.to_string() }
        })
        .to_string(),
    )
    .await;
    assert_eq!(failed["status"], "applied");
    assert_eq!(
        harness
            .store
            .get_subscription(&principal)
            .unwrap()
            .unwrap()
            .status,
        SubscriptionStatus::PastDue
    );

    let canceled = deliver(
        &harness,
        json!({
            "event_id": "evt_l4",
            "type": "subscription.canceled",
            "data": { "principal_id": principal.to_string() }
        })
        .to_string(),
    )
    .await;
    assert_eq!(canceled["status"], "applied");

    // Out-of-order reactivation after cancel is ignored, not an error.
    let stale = deliver(
        &harness,
        json!({
            "event_id": "evt_l5",
            "type": "subscription.updated",
            "data": {
                "principal_id": principal.to_string(),
                "plan_code": "pro",
                "status": "active",
                "external_subscription_id": "sub_ext_7",
                "current_period_end": "2026-11-01T00:00:00Z"
            }
        })
        .to_string(),
    )
    .await;
    assert_eq!(stale["status"], "ignored");
    assert_eq!(
        harness
            .store
            .get_subscription(&principal)
            .unwrap()
            .unwrap()
            .status,
        SubscriptionStatus::Canceled
    );
}

#[tokio::test]
async fn unknown_event_type_answers_200_unhandled() {
    let harness = TestHarness::new();
    let body = json!({
        "event_id": "evt_unknown",
        "type": "payment_method.attached",
        "data": { "anything": 1 }
    })
    .to_string();

    let result = deliver(&harness, body).await;
    assert_eq!(result["received"], true);
    assert_eq!(result["status"], "unhandled");
}

// ============================================================================
// Paid invoice feeding the ledger
// ============================================================================

#[tokio::test]
async fn paid_invoice_funds_usage_end_to_end() {
    let harness = TestHarness::new();
    let principal = PrincipalId::generate();
    let pool = PoolId::for_principal(principal);

    // Invoice credits the pool via webhook.
    deliver(&harness, invoice_paid_body("evt_fund", principal, 100_000)).await;

    // Admin carves a budget from the freshly funded pool.
    harness
        .server
        .post("/v1/admin/allocations")
        .add_header("x-admin-key", harness.admin_api_key.as_str())
        .json(&json!({
            "pool_id": pool.to_string(),
            "principal_id": principal.to_string(),
            "amount_milli": 50_000
        }))
        .await
        .assert_status_ok();

    // The gateway can now commit usage against it.
    let response = harness
        .server
        .post("/v1/meter/commit")
        .add_header("x-api-key", harness.gateway_api_key.as_str())
        .json(&json!({
            "principal_id": principal.to_string(),
            "resource_type": "api_call",
            "quantity": 1000,
            "correlation_id": "corr-e2e"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["remaining_milli"], 48_800);
}
