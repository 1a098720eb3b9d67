//! Tally HTTP client implementation.

use reqwest::Client;
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, AttributionRecord, AuthorizeRequest, AuthorizeResponse, CommitRequest,
    CommitResponse, PoolBalance,
};

/// Options for building a [`TallyClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Name reported in `x-service-name` for log attribution.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            service_name: "unknown".to_string(),
        }
    }
}

/// Tally API client for metering callers (inference gateways).
#[derive(Debug, Clone)]
pub struct TallyClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl TallyClient {
    /// Create a new tally client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the tally service (e.g. `"http://tally:8080"`)
    /// * `api_key` - Gateway API key
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new tally client with custom options.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should not happen with
    /// default settings).
    #[must_use]
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        }
    }

    /// Authorize a metered action before performing it.
    ///
    /// # Errors
    ///
    /// `ClientError::QuotaExceeded` / `ClientError::InsufficientCredits`
    /// for the two rejection classes, or a transport/API error.
    pub async fn authorize(
        &self,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeResponse, ClientError> {
        let url = format!("{}/v1/meter/authorize", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Commit the actual cost after the metered action completed.
    ///
    /// Retries after a timeout must reuse the same `correlation_id`; the
    /// service deduplicates and returns the recorded outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn commit(&self, request: CommitRequest) -> Result<CommitResponse, ClientError> {
        let url = format!("{}/v1/meter/commit", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Look up an attribution by correlation id.
    ///
    /// Resolves the "unknown outcome" case after a timed-out commit:
    /// `Ok(Some(_))` means the charge landed, `Ok(None)` means it did not.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn get_attribution(
        &self,
        correlation_id: &str,
    ) -> Result<Option<AttributionRecord>, ClientError> {
        let url = format!("{}/v1/attributions/{correlation_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::handle_response(response).await?))
    }

    /// Fetch a pool's balances.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn get_pool(&self, pool_id: &str) -> Result<PoolBalance, ClientError> {
        let url = format!("{}/v1/pools/{pool_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ApiErrorResponse> = serde_json::from_str(&body).ok();

        let Some(parsed) = parsed else {
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: "unknown".into(),
                message: body,
            });
        };

        let details = parsed.error.details.unwrap_or(serde_json::Value::Null);
        Err(match parsed.error.code.as_str() {
            "quota_exceeded" => ClientError::QuotaExceeded {
                message: parsed.error.message,
                resets_at_unix: details.get("resets_at_unix").and_then(serde_json::Value::as_i64),
            },
            "insufficient_credits" => ClientError::InsufficientCredits {
                message: parsed.error.message,
                remaining_milli: details
                    .get("remaining_milli")
                    .and_then(serde_json::Value::as_i64),
            },
            _ => ClientError::Api {
                status: status.as_u16(),
                code: parsed.error.code,
                message: parsed.error.message,
            },
        })
    }
}
