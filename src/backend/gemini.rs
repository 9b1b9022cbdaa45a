use super::{ChatBackend, Completion, CompletionRequest, check_status, http_client};
use crate::config::BackendConfig;
use crate::models::TokenUsage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Google Gemini generateContent backend
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.endpoint().to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// Concatenated text parts of the first candidate
    fn extract_completion(response: GenerateResponse) -> Completion {
        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        let usage = match response.usage_metadata {
            Some(usage) => TokenUsage {
                input: usage.prompt_token_count,
                output: usage.candidates_token_count,
                total: usage.total_token_count,
            },
            None => TokenUsage::default(),
        };

        Completion { text, usage }
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let system_instruction = request
            .system_prompt
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|text| Content {
                role: None,
                parts: [Part { text }],
            });

        let body = GenerateRequest {
            contents: [Content {
                role: Some("user"),
                parts: [Part {
                    text: &request.user_message,
                }],
            }],
            system_instruction,
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
                response_mime_type: request.json_mode.then_some("application/json"),
            },
        };

        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let parsed: GenerateResponse = check_status(response, "Gemini")
            .await?
            .json()
            .await
            .context("Failed to decode Gemini response")?;

        Ok(Self::extract_completion(parsed))
    }
}
