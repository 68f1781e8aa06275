//! Common test utilities for agent ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use agent_ledger_core::QuotaDefaults;
use agent_ledger_service::auth::AdminClaims;
use agent_ledger_service::{create_router, AppState, ServiceConfig, StoreBackend};
use agent_ledger_store::MemoryStore;

/// Secret used to sign admin tokens in tests.
pub const ADMIN_SECRET: &str = "test-admin-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
}

impl TestHarness {
    /// Create a harness with admin auth disabled and no default quota.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let service_api_key = "test-service-key".to_string();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            store_backend: StoreBackend::Memory,
            service_api_key: Some(service_api_key.clone()),
            admin_jwt_secret: Some(ADMIN_SECRET.into()),
            refill_interval_seconds: 0,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let state = AppState::new(Arc::new(MemoryStore::new()), config)
            .expect("Failed to build state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            service_api_key,
        }
    }

    /// Harness whose new users start with a free quota.
    pub fn with_quota(free_quota: &str, refill_amount: &str) -> Self {
        let defaults = QuotaDefaults {
            free_quota: free_quota.parse().unwrap(),
            refill_amount: refill_amount.parse().unwrap(),
        };
        Self::with_config(|config| config.quota_defaults = defaults)
    }

    /// A valid admin bearer header.
    pub fn admin_auth_header() -> String {
        let claims = AdminClaims {
            sub: "ops".into(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(ADMIN_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    /// Recharge a user and return the account body.
    pub async fn recharge(&self, user_id: &str, amount: &str, upstream_tx_id: &str) -> Value {
        let response = self
            .server
            .post("/v1/credit/recharge")
            .json(&json!({
                "user_id": user_id,
                "amount": amount,
                "upstream_tx_id": upstream_tx_id,
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json()
    }

    /// Bill a user through the service route and return the receipt body.
    pub async fn spend(&self, body: Value) -> axum_test::TestResponse {
        self.server
            .post("/v1/credit/spend")
            .add_header("x-api-key", &self.service_api_key)
            .json(&body)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a decimal string field of a JSON body.
pub fn decimal(value: &Value) -> rust_decimal::Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {value}"))
        .parse()
        .unwrap()
}
