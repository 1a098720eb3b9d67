//! Webhook reconciliation processor.
//!
//! Inbound billing-provider events are a tagged enum, not a string match
//! chain, so each transition is independently testable. Every handler's
//! effect commits atomically with the dedup mark in the store; a failure
//! leaves the event unmarked and the provider's automatic retry is the
//! recovery path. Duplicate deliveries short-circuit to success.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use tally_core::{PoolId, PrincipalId, SubscriptionStatus};
use tally_store::{EventOutcome, Store, StoreError, SubscriptionMutation};

use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::error::ApiError;

/// A signed webhook event from the billing provider.
#[derive(Debug, Deserialize)]
pub struct ProviderEventEnvelope {
    /// Provider event id (the dedup key).
    pub event_id: String,

    /// The typed event.
    #[serde(flatten)]
    pub kind: ProviderEventKind,
}

/// The recognized provider event types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProviderEventKind {
    /// A subscription was created.
    #[serde(rename = "subscription.created")]
    SubscriptionCreated(SubscriptionPayload),

    /// A subscription changed (plan, status, period).
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated(SubscriptionPayload),

    /// A subscription was terminated. Does not touch credits.
    #[serde(rename = "subscription.canceled")]
    SubscriptionCanceled(SubscriptionRef),

    /// An invoice was paid; the purchased amount credits the pool. The
    /// amount comes from the event payload, never recomputed here.
    #[serde(rename = "invoice.paid")]
    InvoicePaid(InvoicePaidPayload),

    /// An invoice payment failed; the subscription goes past_due. Already
    /// granted credits are not clawed back.
    #[serde(rename = "invoice.payment_failed")]
    InvoicePaymentFailed(SubscriptionRef),

    /// Any event type this processor does not handle.
    #[serde(other)]
    Unknown,
}

/// Payload for subscription created/updated events.
#[derive(Debug, Deserialize)]
pub struct SubscriptionPayload {
    /// The billing entity.
    pub principal_id: PrincipalId,

    /// Provider plan code.
    pub plan_code: String,

    /// Status carried by the event, when present. Created events default
    /// to trialing, updated events to active.
    pub status: Option<SubscriptionStatus>,

    /// Provider-side subscription id.
    pub external_subscription_id: String,

    /// End of the current billing period.
    pub current_period_end: DateTime<Utc>,
}

/// Minimal reference payload for cancel / payment-failed events.
#[derive(Debug, Deserialize)]
pub struct SubscriptionRef {
    /// The billing entity.
    pub principal_id: PrincipalId,
}

/// Payload for invoice.paid events.
#[derive(Debug, Deserialize)]
pub struct InvoicePaidPayload {
    /// The billing entity whose pool is credited.
    pub principal_id: PrincipalId,

    /// Provider invoice id (recorded as the credit reason).
    pub invoice_id: String,

    /// Purchased amount in milli-credits, from the payload.
    pub amount_milli: i64,
}

/// How an inbound event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// The effect was applied and the event marked processed.
    Applied,

    /// The event id was seen before; nothing was reapplied.
    AlreadyProcessed,

    /// The event was recognized but named an impossible transition (or an
    /// unknown record) and was ignored.
    Ignored,

    /// The event type is not handled by this processor.
    Unhandled,
}

impl WebhookDisposition {
    /// Response label for the provider.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyProcessed => "already_processed",
            Self::Ignored => "ignored",
            Self::Unhandled => "unhandled",
        }
    }
}

/// Verify the provider's HMAC-SHA256 hex signature over the raw body.
///
/// Rejection happens before any state is touched, so a legitimately
/// re-signed retry of the same event can still succeed later.
///
/// # Errors
///
/// Returns `ApiError::SignatureInvalid` on mismatch.
pub fn verify_signature(body: &str, signature: &str, secret: &str) -> Result<(), ApiError> {
    let expected = hmac_sha256_hex(secret, body);
    if constant_time_eq(&expected, signature) {
        Ok(())
    } else {
        tracing::warn!("Webhook signature verification failed");
        Err(ApiError::SignatureInvalid)
    }
}

/// Apply one inbound event to the store.
///
/// # Errors
///
/// Storage failures propagate; the event stays unmarked so the provider's
/// retry re-attempts it.
pub fn process_event(
    store: &dyn Store,
    envelope: &ProviderEventEnvelope,
) -> Result<WebhookDisposition, StoreError> {
    let event_id = envelope.event_id.as_str();

    let outcome = match &envelope.kind {
        ProviderEventKind::SubscriptionCreated(payload) => store.apply_subscription_event(
            event_id,
            &payload.principal_id,
            SubscriptionMutation::Upsert {
                plan_code: payload.plan_code.clone(),
                status: payload.status.unwrap_or(SubscriptionStatus::Trialing),
                external_subscription_id: payload.external_subscription_id.clone(),
                current_period_end: payload.current_period_end,
            },
        )?,
        ProviderEventKind::SubscriptionUpdated(payload) => store.apply_subscription_event(
            event_id,
            &payload.principal_id,
            SubscriptionMutation::Upsert {
                plan_code: payload.plan_code.clone(),
                status: payload.status.unwrap_or(SubscriptionStatus::Active),
                external_subscription_id: payload.external_subscription_id.clone(),
                current_period_end: payload.current_period_end,
            },
        )?,
        ProviderEventKind::SubscriptionCanceled(payload) => store.apply_subscription_event(
            event_id,
            &payload.principal_id,
            SubscriptionMutation::MarkCanceled,
        )?,
        ProviderEventKind::InvoicePaymentFailed(payload) => store.apply_subscription_event(
            event_id,
            &payload.principal_id,
            SubscriptionMutation::MarkPastDue,
        )?,
        ProviderEventKind::InvoicePaid(payload) => {
            // Invoices are billed against the entity's own pool, not an
            // organization the entity happens to belong to.
            let pool_id = PoolId::for_principal(payload.principal_id);
            store.apply_invoice_paid(
                event_id,
                &pool_id,
                payload.amount_milli,
                &format!("invoice {}", payload.invoice_id),
            )?
        }
        ProviderEventKind::Unknown => {
            tracing::debug!(event_id, "Unhandled provider event type");
            return Ok(WebhookDisposition::Unhandled);
        }
    };

    Ok(match outcome {
        EventOutcome::Applied => WebhookDisposition::Applied,
        EventOutcome::Duplicate => WebhookDisposition::AlreadyProcessed,
        EventOutcome::Ignored => WebhookDisposition::Ignored,
    })
}
