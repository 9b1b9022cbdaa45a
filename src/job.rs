//! Caller-facing job payloads and their validation into [`EvaluationJob`].

use crate::models::{EvaluationJob, ManualResponse, PromptSpec, PromptVersion, Provider};
use crate::rubric::DEFAULT_SERVICE_TYPE;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Body of a model evaluation request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEvalRequest {
    #[serde(default)]
    pub test_title: String,
    #[serde(default)]
    pub test_question_id: Option<String>,
    #[serde(default)]
    pub system_prompt_version: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_message: String,
    pub models: Vec<String>,
    /// Number or numeric string
    #[serde(default)]
    pub repeat_count: Option<Value>,
}

/// Body of a prompt A/B request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEvalRequest {
    #[serde(default)]
    pub test_title: String,
    #[serde(default)]
    pub test_question_id: Option<String>,
    pub version_a: PromptVersion,
    pub version_b: PromptVersion,
    pub user_message: String,
    pub models: Vec<String>,
    #[serde(default)]
    pub repeat_count: Option<Value>,
}

/// Body of a manual dual-input request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEvalRequest {
    #[serde(default)]
    pub test_title: String,
    #[serde(default)]
    pub test_question_id: Option<String>,
    #[serde(default)]
    pub common_test_env: Option<String>,
    pub question: String,
    #[serde(default)]
    pub service_type: Option<String>,
    pub response_a: ManualResponse,
    pub response_b: ManualResponse,
}

/// A job file for the `run` command; `kind` selects the payload shape
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    Model(ModelEvalRequest),
    Prompt(PromptEvalRequest),
    Manual(ManualEvalRequest),
}

impl JobRequest {
    pub fn into_job(self) -> Result<EvaluationJob> {
        match self {
            JobRequest::Model(request) => request.into_job(),
            JobRequest::Prompt(request) => request.into_job(),
            JobRequest::Manual(request) => request.into_job(),
        }
    }
}

/// Read a job file, TOML or JSON by extension
pub fn load_job_file(path: &Path) -> Result<EvaluationJob> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;

    let request: JobRequest = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON job: {}", path.display()))?,
        _ => toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML job: {}", path.display()))?,
    };
    request.into_job()
}

/// Clamp a loosely typed repetition count to at least 1; unreadable values count as 1
pub fn parse_repeat_count(value: Option<&Value>) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => leading_integer(s),
        _ => None,
    };
    parsed.map_or(1, |n| n.clamp(1, u32::MAX as i64) as u32)
}

/// Integer prefix of `s` after leading whitespace, e.g. `" 3 times"` is 3
fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let sign_len = usize::from(s.starts_with(['-', '+']));
    let digits = s[sign_len..].chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    s[..sign_len + digits].parse().ok()
}

fn parse_providers(models: &[String]) -> Result<Vec<Provider>> {
    if models.is_empty() {
        bail!("At least one model must be selected");
    }
    let mut providers = Vec::with_capacity(models.len());
    for model in models {
        let provider: Provider = model.parse()?;
        if !providers.contains(&provider) {
            providers.push(provider);
        }
    }
    Ok(providers)
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} must not be empty", what);
    }
    Ok(())
}

fn title_or_default(title: String) -> String {
    let title = title.trim();
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title.to_string()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ModelEvalRequest {
    pub fn into_job(self) -> Result<EvaluationJob> {
        require(&self.user_message, "User message")?;
        Ok(EvaluationJob {
            title: title_or_default(self.test_title),
            question_id: non_blank(self.test_question_id),
            prompt: PromptSpec::Single {
                version: non_blank(self.system_prompt_version),
                system_prompt: non_blank(self.system_prompt),
            },
            providers: parse_providers(&self.models)?,
            repeat_count: parse_repeat_count(self.repeat_count.as_ref()),
            user_message: self.user_message,
        })
    }
}

impl PromptEvalRequest {
    pub fn into_job(self) -> Result<EvaluationJob> {
        require(&self.user_message, "User message")?;
        require(&self.version_a.prompt, "Version A prompt")?;
        require(&self.version_b.prompt, "Version B prompt")?;
        Ok(EvaluationJob {
            title: title_or_default(self.test_title),
            question_id: non_blank(self.test_question_id),
            prompt: PromptSpec::Versioned {
                a: self.version_a,
                b: self.version_b,
            },
            providers: parse_providers(&self.models)?,
            repeat_count: parse_repeat_count(self.repeat_count.as_ref()),
            user_message: self.user_message,
        })
    }
}

impl ManualEvalRequest {
    pub fn into_job(self) -> Result<EvaluationJob> {
        require(&self.question, "Question")?;
        require(&self.response_a.content, "Response A")?;
        require(&self.response_b.content, "Response B")?;
        let service_type = non_blank(self.service_type)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string());

        Ok(EvaluationJob {
            title: title_or_default(self.test_title),
            question_id: non_blank(self.test_question_id),
            prompt: PromptSpec::Manual {
                common_env: non_blank(self.common_test_env),
                service_type,
                a: self.response_a,
                b: self.response_b,
            },
            providers: Vec::new(),
            repeat_count: 1,
            user_message: self.question,
        })
    }
}
