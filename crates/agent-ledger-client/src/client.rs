//! Agent ledger HTTP client implementation.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use agent_ledger_core::{Account, AgentStatistics, CreditEvent, OwnerType, Page};

use crate::error::ClientError;
use crate::types::{
    AdmitRequest, AdmitResponse, ApiErrorResponse, EventFeedQuery, RechargeRequest,
    RewardRequest, SpendReceipt, SpendRequest, TransactionWithEvent,
};

/// Agent ledger API client.
///
/// Agent runtimes use the service methods (`spend`, `admit_skill`) with an API key.
/// Admin tools additionally set a bearer token for the `/v1/credit` management routes.
#[derive(Debug, Clone)]
pub struct AgentLedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
    admin_token: Option<String>,
}

impl AgentLedgerClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the ledger service (e.g., `"http://agent-ledger:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
            admin_token: options.admin_token,
        })
    }

    // =========================================================================
    // Service routes
    // =========================================================================

    /// Bill a paid agent action.
    ///
    /// Replaying a request with the same `upstream_tx_id` returns the original receipt
    /// with `already_applied` set.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InsufficientCredits`] when the user cannot pay, or another
    /// error if the request fails.
    pub async fn spend(&self, request: &SpendRequest) -> Result<SpendReceipt, ClientError> {
        let response = self
            .service(self.client.post(self.url("/v1/credit/spend")))
            .json(request)
            .send()
            .await?;

        let receipt: SpendReceipt = self.handle_response(response).await?;
        tracing::debug!(
            event_id = %receipt.event.id,
            already_applied = receipt.already_applied,
            "Spend recorded"
        );
        Ok(receipt)
    }

    /// Check whether a skill call may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Forbidden`] for a disabled or owner-only skill and
    /// [`ClientError::RateLimited`] when the category limit is exhausted.
    pub async fn admit_skill(&self, request: &AdmitRequest) -> Result<AdmitResponse, ClientError> {
        let response = self
            .service(self.client.post(self.url("/v1/skills/admit")))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =========================================================================
    // Admin routes
    // =========================================================================

    /// Get an account, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_account(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> Result<Account, ClientError> {
        let path = format!("/v1/credit/accounts/{}/{owner_id}", owner_type.as_str());
        let response = self.admin(self.client.get(self.url(&path))).send().await?;

        self.handle_response(response).await
    }

    /// Add purchased credits to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn recharge(&self, request: &RechargeRequest) -> Result<Account, ClientError> {
        let response = self
            .admin(self.client.post(self.url("/v1/credit/recharge")))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Add reward credits to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn reward(&self, request: &RewardRequest) -> Result<Account, ClientError> {
        let response = self
            .admin(self.client.post(self.url("/v1/credit/reward")))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Change a user's daily quota and hourly refill.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects the values.
    pub async fn update_daily_quota(
        &self,
        user_id: &str,
        upstream_tx_id: &str,
        free_quota: Option<Decimal>,
        refill_amount: Option<Decimal>,
    ) -> Result<Account, ClientError> {
        let body = serde_json::json!({
            "upstream_tx_id": upstream_tx_id,
            "free_quota": free_quota,
            "refill_amount": refill_amount,
        });
        let path = format!("/v1/credit/users/{user_id}/daily-quota");
        let response = self
            .admin(self.client.put(self.url(&path)))
            .json(&body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Income statistics of an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn agent_statistics(&self, agent_id: &str) -> Result<AgentStatistics, ClientError> {
        let path = format!("/v1/credit/agents/{agent_id}/statistics");
        let response = self.admin(self.client.get(self.url(&path))).send().await?;

        self.handle_response(response).await
    }

    /// Get an event by the idempotency key that created it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no event has the key.
    pub async fn event_by_upstream_tx_id(
        &self,
        upstream_tx_id: &str,
    ) -> Result<CreditEvent, ClientError> {
        let response = self
            .admin(self.client.get(self.url("/v1/credit/event")))
            .query(&[("upstream_tx_id", upstream_tx_id)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// One page of the global event feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_events(
        &self,
        query: &EventFeedQuery,
    ) -> Result<Page<CreditEvent>, ClientError> {
        let response = self
            .admin(self.client.get(self.url("/v1/credit/events")))
            .query(query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// One page of a user's postings, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_transactions(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Page<TransactionWithEvent>, ClientError> {
        let mut query = vec![("user_id", user_id.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .admin(self.client.get(self.url("/v1/credit/transactions")))
            .query(&query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn service(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    fn admin(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.admin_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let detail = api_error.error;
                let decimal_detail = |key: &str| {
                    detail
                        .details
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .and_then(serde_json::Value::as_str)
                        .and_then(|s| s.parse::<Decimal>().ok())
                        .unwrap_or_default()
                };

                match detail.code.as_str() {
                    "insufficient_credits" => Err(ClientError::InsufficientCredits {
                        available: decimal_detail("available"),
                        required: decimal_detail("required"),
                    }),
                    "forbidden" => Err(ClientError::Forbidden(detail.message)),
                    "rate_limited" => Err(ClientError::RateLimited(detail.message)),
                    code => Err(ClientError::Api {
                        code: code.to_string(),
                        message: detail.message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
    /// Bearer token for the admin routes.
    pub admin_token: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
            admin_token: None,
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the admin bearer token.
    #[must_use]
    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }
}
