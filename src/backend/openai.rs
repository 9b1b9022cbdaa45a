use super::{ChatBackend, Completion, CompletionRequest, http_client};
use crate::config::BackendConfig;
use crate::models::TokenUsage;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, ResponseFormat,
    },
};
use async_trait::async_trait;

/// OpenAI-compatible chat completions backend
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig, api_key: String) -> Result<Self> {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.endpoint());

        let client = Client::with_config(openai_config).with_http_client(http_client(config)?);

        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    /// Build the chat completion request. An absent system prompt is sent
    /// as an empty system message.
    fn build_request(&self, request: &CompletionRequest) -> Result<CreateChatCompletionRequest> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system_prompt.clone().unwrap_or_default())
            .build()
            .context("Failed to build system message")?
            .into();

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(request.user_message.clone())
            .build()
            .context("Failed to build user message")?
            .into();

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages([system_message, user_message]);
        if request.json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }

        args.build().context("Failed to build chat completion request")
    }

    fn extract_completion(response: CreateChatCompletionResponse) -> Completion {
        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let usage = match response.usage {
            Some(usage) => TokenUsage {
                input: u64::from(usage.prompt_tokens),
                output: u64::from(usage.completion_tokens),
                total: u64::from(usage.total_tokens),
            },
            None => TokenUsage::default(),
        };

        Completion { text, usage }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_request(request)?;
        let response = self
            .client
            .chat()
            .create(body)
            .await
            .context("OpenAI chat completion failed")?;

        Ok(Self::extract_completion(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, default_provider_config};
    use crate::models::Provider;

    fn config_for(server: &mockito::Server) -> BackendConfig {
        let mut config = default_provider_config(Provider::Gpt);
        assert_eq!(config.kind, BackendKind::Openai);
        config.api_endpoint = Some(format!("{}/v1", server.url()));
        config.timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn test_complete_extracts_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model": "gpt-5-2025-08-07", "response_format": {"type": "json_object"}}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "gpt-5-2025-08-07",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "{\"winner\": \"A\"}"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
                }"#,
            )
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&config_for(&server), "test-key".to_string()).unwrap();
        let completion = backend
            .complete(&CompletionRequest::new(None, "judge this").json())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(completion.text, r#"{"winner": "A"}"#);
        assert_eq!(
            completion.usage,
            TokenUsage {
                input: 12,
                output: 8,
                total: 20
            }
        );
    }

    #[tokio::test]
    async fn test_complete_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "bad key", "type": "invalid_request_error", "param": null, "code": null}}"#)
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&config_for(&server), "wrong".to_string()).unwrap();
        let result = backend.complete(&CompletionRequest::new(Some("sys"), "hi")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_build_request_sends_empty_system_message_when_absent() {
        let server_url = "http://localhost:1/v1";
        let mut config = default_provider_config(Provider::Gpt);
        config.api_endpoint = Some(server_url.to_string());
        let backend = OpenAiBackend::new(&config, "k".to_string()).unwrap();

        let request = backend.build_request(&CompletionRequest::new(None, "hi")).unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert!(value.get("response_format").is_none());
    }
}
