//! Common test utilities for tally integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use tempfile::TempDir;

use tally_core::{PoolId, PrincipalId};
use tally_service::{create_router, AppState, ServiceConfig};
use tally_store::{RocksStore, Store};

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct store handle for seeding and invariant assertions.
    pub store: Arc<RocksStore>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The gateway API key for metering requests.
    pub gateway_api_key: String,
    /// The admin API key for administrative requests.
    pub admin_api_key: String,
    /// The webhook signing secret.
    pub webhook_secret: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness with a config tweak (smaller quotas, etc.).
    pub fn with_config(tweak: impl FnOnce(&mut ServiceConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let gateway_api_key = "test-gateway-key".to_string();
        let admin_api_key = "test-admin-key".to_string();
        let webhook_secret = "test-webhook-secret".to_string();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            gateway_api_key: Some(gateway_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            provider_webhook_secret: Some(webhook_secret.clone()),
            ..ServiceConfig::default()
        };
        tweak(&mut config);

        let state = AppState::new(Arc::clone(&store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            _temp_dir: temp_dir,
            gateway_api_key,
            admin_api_key,
            webhook_secret,
        }
    }

    /// Seed a funded pool with an allocation for `principal`.
    pub fn seed_allocation(&self, principal: PrincipalId, amount_milli: i64) -> PoolId {
        let pool = PoolId::for_principal(principal);
        self.store
            .credit_pool(&pool, amount_milli, "test seed", "test")
            .expect("seed credit");
        self.store
            .allocate(&pool, &principal, amount_milli, "test")
            .expect("seed allocation");
        pool
    }

    /// Sign a webhook body the way the provider does.
    pub fn sign_webhook(&self, body: &str) -> String {
        tally_service::crypto::hmac_sha256_hex(&self.webhook_secret, body)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
