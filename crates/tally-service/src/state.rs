//! Application state.
//!
//! Constructed once in `main` and passed explicitly through the router;
//! there are no module-level singletons, which keeps per-test isolation
//! trivial.

use std::sync::Arc;

use tally_store::RocksStore;

use crate::config::ServiceConfig;
use crate::provider::ProviderClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Billing provider client (optional; outbound calls and the
    /// reconciliation report need it, webhook intake does not).
    pub provider: Option<Arc<ProviderClient>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let provider = config
            .provider_api_url
            .as_ref()
            .zip(config.provider_api_key.as_ref())
            .map(|(url, key)| {
                tracing::info!(provider_url = %url, "Billing provider integration enabled");
                Arc::new(ProviderClient::new(url, key))
            });

        if provider.is_none() {
            tracing::warn!(
                "Billing provider not configured - outbound subscription calls and reconciliation unavailable"
            );
        }

        if config.provider_webhook_secret.is_none() {
            tracing::warn!(
                "Webhook secret not configured - inbound events will be accepted unverified (development mode)"
            );
        }

        Self {
            store,
            config,
            provider,
        }
    }

    /// Check if the provider adapter is configured.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }
}
