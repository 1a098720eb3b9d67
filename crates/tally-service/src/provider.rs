//! Thin client for the external subscription-billing provider.
//!
//! Outbound calls only: create/update/fetch subscriptions. No business
//! logic lives here; the webhook reconciliation processor owns all state
//! mutation, and this adapter exists so the orchestrator and the
//! reconciliation report can reach the provider.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors from the provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned a non-success status.
    #[error("provider API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        message: String,
    },
}

/// Provider-side view of a subscription, as returned by its API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSubscription {
    /// Provider-side subscription id.
    pub external_subscription_id: String,

    /// Plan code on the provider side.
    pub plan_code: String,

    /// Provider status string (provider vocabulary, not ours).
    pub status: String,
}

/// Request body for subscription creation.
#[derive(Debug, Serialize)]
struct SubscriptionRequest<'a> {
    external_customer_id: &'a str,
    plan_code: &'a str,
}

/// Billing provider API client.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ProviderClient {
    /// Create a new provider client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (does not happen with
    /// default TLS settings).
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Create a subscription for a billing entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider rejects it.
    pub async fn create_subscription(
        &self,
        external_customer_id: &str,
        plan_code: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let url = format!("{}/v1/subscriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SubscriptionRequest {
                external_customer_id,
                plan_code,
            })
            .send()
            .await?;

        Self::parse(response).await
    }

    /// Change a subscription's plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider rejects it.
    pub async fn update_subscription(
        &self,
        external_subscription_id: &str,
        plan_code: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let url = format!(
            "{}/v1/subscriptions/{external_subscription_id}",
            self.base_url
        );
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "plan_code": plan_code }))
            .send()
            .await?;

        Self::parse(response).await
    }

    /// Fetch the provider's current view of a subscription. Used by the
    /// reconciliation report to diff against the internal mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider rejects it.
    pub async fn fetch_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let url = format!(
            "{}/v1/subscriptions/{external_subscription_id}",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<ProviderSubscription, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(512);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_subscription_parses_provider_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions/sub_ext_9"))
            .and(bearer_token("pk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "external_subscription_id": "sub_ext_9",
                "plan_code": "pro",
                "status": "active"
            })))
            .mount(&server)
            .await;

        let client = ProviderClient::new(server.uri(), "pk-test");
        let sub = client.fetch_subscription("sub_ext_9").await.unwrap();
        assert_eq!(sub.plan_code, "pro");
        assert_eq!(sub.status, "active");
    }

    #[tokio::test]
    async fn provider_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such subscription"))
            .mount(&server)
            .await;

        let client = ProviderClient::new(server.uri(), "pk-test");
        let err = client.fetch_subscription("missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn update_subscription_puts_new_plan() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/subscriptions/sub_ext_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "external_subscription_id": "sub_ext_9",
                "plan_code": "enterprise",
                "status": "active"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(server.uri(), "pk-test");
        let sub = client
            .update_subscription("sub_ext_9", "enterprise")
            .await
            .unwrap();
        assert_eq!(sub.plan_code, "enterprise");
    }

    #[tokio::test]
    async fn create_subscription_posts_customer_and_plan() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "external_subscription_id": "sub_ext_new",
                "plan_code": "standard",
                "status": "trialing"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(server.uri(), "pk-test");
        let sub = client
            .create_subscription("principal-1", "standard")
            .await
            .unwrap();
        assert_eq!(sub.external_subscription_id, "sub_ext_new");
    }
}
