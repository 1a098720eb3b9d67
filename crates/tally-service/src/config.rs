//! Service configuration.
//!
//! Environment-variable driven with JSON file loading for the pricing and
//! quota tables, so rate changes are deploys of configuration, not code.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use tally_core::{PricingConfig, QuotaLimits};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory (default: "/data/tally").
    pub data_dir: String,

    /// API key for metered-gateway callers (service-to-service auth).
    pub gateway_api_key: Option<String>,

    /// API key for administrative operations.
    pub admin_api_key: Option<String>,

    /// Billing provider API URL (optional; outbound adapter).
    pub provider_api_url: Option<String>,

    /// Billing provider API key (optional).
    pub provider_api_key: Option<String>,

    /// Shared secret for webhook signature verification (optional; webhooks
    /// are accepted unverified only in development).
    pub provider_webhook_secret: Option<String>,

    /// How long processed webhook events are retained before TTL eviction,
    /// in days. Providers do not retry indefinitely.
    pub event_retention_days: i64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Pricing tables.
    pub pricing: PricingConfig,

    /// Quota limits per tier.
    pub quotas: QuotaConfig,
}

/// Quota limits keyed by plan code, with a fallback for principals without
/// a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Per-tier limits, keyed by plan code.
    pub tiers: HashMap<String, QuotaLimits>,

    /// Limits for principals with no (or an unknown) plan.
    pub default: QuotaLimits,
}

impl QuotaConfig {
    /// Limits for a tier, falling back to the default.
    #[must_use]
    pub fn limits_for(&self, tier: &str) -> QuotaLimits {
        self.tiers.get(tier).copied().unwrap_or(self.default)
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert(
            "free".to_string(),
            QuotaLimits {
                daily: 100,
                monthly: 2_000,
            },
        );
        tiers.insert(
            "standard".to_string(),
            QuotaLimits {
                daily: 1_000,
                monthly: 20_000,
            },
        );
        tiers.insert(
            "pro".to_string(),
            QuotaLimits {
                daily: 10_000,
                monthly: 200_000,
            },
        );
        tiers.insert(
            "enterprise".to_string(),
            QuotaLimits {
                daily: 100_000,
                monthly: 2_000_000,
            },
        );

        Self {
            default: QuotaLimits {
                daily: 100,
                monthly: 2_000,
            },
            tiers,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables and config files.
    #[must_use]
    pub fn from_env() -> Self {
        let pricing = std::env::var("PRICING_CONFIG_PATH")
            .ok()
            .and_then(|path| match load_json_file::<PricingConfig>(&path) {
                Ok(config) => {
                    tracing::info!(path = %path, "Loaded pricing tables from file");
                    Some(config)
                }
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Failed to load pricing tables; using defaults");
                    None
                }
            })
            .unwrap_or_default();

        let quotas = std::env::var("QUOTA_CONFIG_PATH")
            .ok()
            .and_then(|path| match load_json_file::<QuotaConfig>(&path) {
                Ok(config) => {
                    tracing::info!(path = %path, "Loaded quota limits from file");
                    Some(config)
                }
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Failed to load quota limits; using defaults");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tally".into()),
            gateway_api_key: std::env::var("GATEWAY_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            provider_api_url: std::env::var("PROVIDER_API_URL").ok(),
            provider_api_key: std::env::var("PROVIDER_API_KEY").ok(),
            provider_webhook_secret: std::env::var("PROVIDER_WEBHOOK_SECRET").ok(),
            event_retention_days: std::env::var("EVENT_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(14),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            pricing,
            quotas,
        }
    }
}

/// Load a JSON config file.
fn load_json_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tally".into(),
            gateway_api_key: None,
            admin_api_key: None,
            provider_api_url: None,
            provider_api_key: None,
            provider_webhook_secret: None,
            event_retention_days: 14,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing: PricingConfig::default(),
            quotas: QuotaConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_limits_fall_back_to_default() {
        let config = QuotaConfig::default();
        assert_eq!(config.limits_for("pro").daily, 10_000);
        assert_eq!(config.limits_for("no-such-tier").daily, 100);
    }

    #[test]
    fn quota_config_json_shape() {
        let json = r#"{
            "default": {"daily": 10, "monthly": 100},
            "tiers": {"pro": {"daily": 50, "monthly": 500}}
        }"#;
        let config: QuotaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.limits_for("pro").monthly, 500);
        assert_eq!(config.limits_for("free").monthly, 100);
    }
}
