//! HTTP provider client for OpenAI-compatible chat completion APIs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::debug;

use crate::usage::TokenUsage;

use super::wire::{ChatRequest, ChatResponse, Message};
use super::{DispatchRequest, DispatchResponse, ProviderClient, ProviderError};

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Async HTTP client for one provider's OpenAI-compatible endpoint
#[derive(Clone)]
pub struct HttpProviderClient {
    provider: String,
    http_client: HttpClient,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProviderClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Builder for `HttpProviderClient`
pub struct HttpProviderClientBuilder {
    provider: String,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpProviderClientBuilder {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: None,
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> std::result::Result<HttpProviderClient, ProviderError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ProviderError::BadRequest("base_url is required".to_string()))?;
        let api_key = self
            .api_key
            .ok_or_else(|| ProviderError::Auth("API key is required".to_string()))?;

        let timeout = Duration::from_secs(self.timeout_secs);
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(HttpProviderClient {
            provider: self.provider,
            http_client,
            base_url,
            api_key,
            timeout,
        })
    }
}

impl HttpProviderClient {
    pub fn builder(provider: impl Into<String>) -> HttpProviderClientBuilder {
        HttpProviderClientBuilder::new(provider)
    }

    fn map_reqwest_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Network(error.to_string())
        }
    }

    async fn handle_error_response(
        &self,
        status: reqwest::StatusCode,
        response: reqwest::Response,
    ) -> ProviderError {
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => ProviderError::Auth(format!("{}: {}", status, body)),
            429 => ProviderError::RateLimited {
                retry_after_secs: extract_retry_after(&body),
            },
            404 => ProviderError::UnknownModel(body),
            400 | 402 | 422 => ProviderError::BadRequest(body),
            500..=599 => ProviderError::Server {
                status: status.as_u16(),
                message: body,
            },
            _ => ProviderError::Network(format!("HTTP {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn dispatch(
        &self,
        model_id: &str,
        request: &DispatchRequest,
    ) -> std::result::Result<DispatchResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));

        let body = ChatRequest::new(model_id, messages)
            .with_temperature(request.temperature)
            .with_max_tokens(request.max_tokens);

        debug!(provider = %self.provider, model = %model_id, "Sending chat completion request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.handle_error_response(status, response).await);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to parse response: {}", e)))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::BadRequest("empty response from API".to_string()))?;

        let usage = chat_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(DispatchResponse {
            content: choice.message.content,
            usage,
        })
    }
}

/// Extract retry-after value from a 429 error body
fn extract_retry_after(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
        return Some(retry_after);
    }
    json.get("error")
        .and_then(|e| e.get("retry_after"))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_credentials() {
        assert!(
            HttpProviderClient::builder("anthropic")
                .base_url("https://example.com/v1")
                .build()
                .is_err()
        );
        assert!(
            HttpProviderClient::builder("anthropic")
                .api_key("key")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_builder_complete() {
        let client = HttpProviderClient::builder("anthropic")
            .base_url("https://example.com/v1")
            .api_key("key")
            .timeout_secs(30)
            .build()
            .unwrap();
        assert_eq!(client.provider(), "anthropic");
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(
            extract_retry_after(r#"{"error": {"retry_after": 60}}"#),
            Some(60)
        );
        assert_eq!(extract_retry_after(r#"{"message": "slow down"}"#), None);
        assert_eq!(extract_retry_after("not json"), None);
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpProviderClient>();
    }
}
