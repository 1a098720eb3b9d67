//! Authentication extractors.
//!
//! Two caller classes:
//!
//! - `ServiceAuth` - metered-gateway callers (the inference routers),
//!   authenticated with the shared gateway API key.
//! - `AdminAuth` - administrative operations, authenticated with the admin
//!   key and carrying the actor identity for the audit trail. Authorization
//!   of who may hold the admin key is delegated to the surrounding platform.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::state::AppState;

/// Service authentication via the gateway API key.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The calling service's self-reported name (for log attribution).
    pub service_name: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .gateway_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if api_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let service_name = parts
            .headers
            .get("x-service-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Ok(ServiceAuth { service_name })
    }
}

/// Admin authentication via the admin API key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// The acting operator's identity, recorded in every audit entry.
    pub actor: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if api_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let actor = parts
            .headers
            .get("x-admin-actor")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown-admin")
            .to_string();

        Ok(AdminAuth { actor })
    }
}
