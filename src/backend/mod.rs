//! Chat backends: one uniform "system + user text in, text + usage out" call
//! per vendor wire protocol.

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use crate::config::{BackendConfig, BackendKind};
use crate::models::TokenUsage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A single chat call
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Absent means no system instruction at all
    pub system_prompt: Option<String>,
    pub user_message: String,
    /// Ask for a bare JSON object where the backend supports it
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(system_prompt: Option<&str>, user_message: &str) -> Self {
        Self {
            system_prompt: system_prompt.map(str::to_string),
            user_message: user_message.to_string(),
            json_mode: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Text plus provider-reported token usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Stands in for a backend that could not be constructed, e.g. a missing
/// API key. Every call fails with the construction error.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatBackend for UnavailableBackend {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        anyhow::bail!("Backend unavailable: {}", self.reason)
    }
}

/// Build the backend described by `config`, reading its key from the environment
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ChatBackend>> {
    let api_key = std::env::var(&config.env_var_api_key)
        .with_context(|| format!("Environment variable {} not found", config.env_var_api_key))?;

    let backend: Arc<dyn ChatBackend> = match config.kind {
        BackendKind::Openai => Arc::new(OpenAiBackend::new(config, api_key)?),
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(config, api_key)?),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(config, api_key)?),
    };
    Ok(backend)
}

/// Like [`build_backend`], but construction failures become an
/// [`UnavailableBackend`] so they surface per call instead of per job.
pub fn build_backend_or_unavailable(name: &str, config: &BackendConfig) -> Arc<dyn ChatBackend> {
    match build_backend(config) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(backend = name, error = %format!("{:#}", e), "backend unavailable");
            Arc::new(UnavailableBackend::new(format!("{:#}", e)))
        }
    }
}

fn http_client(config: &BackendConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}

/// Turn a non-2xx reply into an error carrying the status and body
async fn check_status(response: reqwest::Response, vendor: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{} API returned {}: {}", vendor, status, body.trim())
}
