//! Inbound webhook endpoint for the billing provider.
//!
//! Order matters: signature verification first (a failure must not touch
//! the dedup store), then parsing, then the reconciliation processor.
//! Business-level rejections answer 2xx/4xx; 5xx is reserved for storage
//! failures where the provider's retry is the correct remedy.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;
use crate::webhook::{self, ProviderEventEnvelope};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// How it was handled: `applied`, `already_processed`, `ignored`,
    /// or `unhandled`.
    pub status: &'static str,
}

/// Handle billing-provider webhooks.
pub async fn billing_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.provider_webhook_secret {
        let signature = headers
            .get("x-billing-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::SignatureInvalid)?;

        webhook::verify_signature(&body, signature, secret)?;
    } else {
        tracing::warn!("Webhook secret not configured - skipping signature verification");
    }

    let envelope: ProviderEventEnvelope =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_id = %envelope.event_id,
        "Received billing provider webhook"
    );

    let disposition = webhook::process_event(state.store.as_ref(), &envelope)?;

    Ok(Json(WebhookResponse {
        received: true,
        status: disposition.as_str(),
    }))
}
