use super::{ChatBackend, Completion, CompletionRequest, check_status, http_client};
use crate::config::BackendConfig;
use crate::models::TokenUsage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API backend
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicBackend {
    pub fn new(config: &BackendConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.endpoint().to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    /// Text of the first content block, when that block is text
    fn extract_completion(response: MessagesResponse) -> Completion {
        let text = match response.content.first() {
            Some(block) if block.kind == "text" => block.text.clone().unwrap_or_default(),
            _ => String::new(),
        };

        let usage = match response.usage {
            Some(usage) => TokenUsage {
                input: usage.input_tokens,
                output: usage.output_tokens,
                total: usage.input_tokens + usage.output_tokens,
            },
            None => TokenUsage::default(),
        };

        Completion { text, usage }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: request.system_prompt.as_deref().filter(|s| !s.is_empty()),
            messages: [Message {
                role: "user",
                content: &request.user_message,
            }],
        };

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let parsed: MessagesResponse = check_status(response, "Anthropic")
            .await?
            .json()
            .await
            .context("Failed to decode Anthropic response")?;

        Ok(Self::extract_completion(parsed))
    }
}
