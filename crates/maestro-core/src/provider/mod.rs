//! Provider client seam
//!
//! Every backend - cloud API or local inference server - is reached through
//! the same `ProviderClient` trait: one prompt in, one completion plus token
//! usage out. The core never speaks provider wire protocols beyond the
//! OpenAI-compatible shape implemented by `HttpProviderClient`, and it is
//! agnostic to per-provider authentication mechanics.

mod http;
mod wire;

pub use http::{HttpProviderClient, HttpProviderClientBuilder};
pub use wire::{ChatRequest, ChatResponse, Choice, Message, MessageRole, Usage};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::usage::TokenUsage;

/// A single prompt dispatch, provider-agnostic
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl DispatchRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// What a provider returns on success
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Failure taxonomy for one dispatch, classified for the retry policy
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

/// How the fallback executor should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential/configuration problem: negative-cache the provider and
    /// skip its remaining candidates without consuming retry budget
    Configuration,
    /// Worth retrying the same candidate with backoff
    Transient,
    /// Advance to the next candidate immediately
    Permanent,
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Auth(_) => ErrorClass::Configuration,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Server { .. } | Self::Network(_) => {
                ErrorClass::Transient
            }
            Self::BadRequest(_) | Self::UnknownModel(_) => ErrorClass::Permanent,
        }
    }
}

/// Uniform dispatch interface implemented per backend
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider this client serves
    fn provider(&self) -> &str;

    /// Send one prompt to one model and wait for the completion
    async fn dispatch(
        &self,
        model_id: &str,
        request: &DispatchRequest,
    ) -> std::result::Result<DispatchResponse, ProviderError>;
}

/// Client lookup by provider name
#[derive(Clone, Default)]
pub struct ProviderClients {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider().to_string(), client);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(provider).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClients")
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
