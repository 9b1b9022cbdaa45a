use crate::models::{JudgeId, Provider};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Wire protocol spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Google Gemini generateContent
    Gemini,
}

impl BackendKind {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            BackendKind::Openai => "https://api.openai.com/v1",
            BackendKind::Anthropic => "https://api.anthropic.com/v1",
            BackendKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

/// Configuration for one generation or judge backend
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// API base URL; defaults to the vendor endpoint for `kind`
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Model string sent to the backend
    pub model: String,
    /// Name shown in results and reports; defaults to `model`
    #[serde(default)]
    pub display_name: Option<String>,
    /// Maximum tokens for backends that require a limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout enforced by the HTTP client
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl BackendConfig {
    fn new(kind: BackendKind, env_var_api_key: &str, model: &str, display_name: &str) -> Self {
        Self {
            kind,
            api_endpoint: None,
            env_var_api_key: env_var_api_key.to_string(),
            model: model.to_string(),
            display_name: Some(display_name.to_string()),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }

    fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn endpoint(&self) -> &str {
        match &self.api_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/'),
            None => self.kind.default_endpoint(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.model)
    }
}

/// Bounds on in-flight calls, scoped to a single job
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConcurrencyConfig {
    /// Generation calls per batch
    #[serde(default = "default_generation_concurrency")]
    pub generation: usize,
    /// Judge-pair invocations for consistency/performance jobs
    #[serde(default = "default_evaluation_concurrency")]
    pub evaluation: usize,
    /// Judge-pair invocations for prompt A/B jobs
    #[serde(default = "default_evaluation_concurrency")]
    pub comparative: usize,
    /// Judge-pair invocations for manual comparisons
    #[serde(default = "default_manual_concurrency")]
    pub manual: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            generation: default_generation_concurrency(),
            evaluation: default_evaluation_concurrency(),
            comparative: default_evaluation_concurrency(),
            manual: default_manual_concurrency(),
        }
    }
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_generation_concurrency() -> usize {
    5
}

fn default_evaluation_concurrency() -> usize {
    3
}

fn default_manual_concurrency() -> usize {
    2
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

/// Built-in backend for each provider
pub fn default_provider_config(provider: Provider) -> BackendConfig {
    const GOOGLE_KEY: &str = "GOOGLE_GENERATIVE_AI_API_KEY";
    match provider {
        Provider::GeminiPro => {
            BackendConfig::new(BackendKind::Gemini, GOOGLE_KEY, "gemini-2.5-pro", "gemini-2.5-pro")
        }
        Provider::Gemini3ProPreview => BackendConfig::new(
            BackendKind::Gemini,
            GOOGLE_KEY,
            "gemini-3-pro-preview",
            "gemini-3-pro-preview",
        ),
        Provider::GeminiFlash => BackendConfig::new(
            BackendKind::Gemini,
            GOOGLE_KEY,
            "gemini-3-flash-preview",
            "gemini-3-flash-preview",
        ),
        Provider::Claude => BackendConfig::new(
            BackendKind::Anthropic,
            "ANTHROPIC_API_KEY",
            "claude-sonnet-4-5",
            "Claude 4.5 Sonnet",
        ),
        Provider::Gpt => {
            BackendConfig::new(BackendKind::Openai, "OPENAI_API_KEY", "gpt-5-2025-08-07", "GPT-5")
        }
    }
}

/// Built-in backend for each judge
pub fn default_judge_config(judge: JudgeId) -> BackendConfig {
    match judge {
        JudgeId::Gpt => {
            BackendConfig::new(BackendKind::Openai, "OPENAI_API_KEY", "gpt-5-2025-08-07", "GPT-5")
        }
        JudgeId::Claude => BackendConfig::new(
            BackendKind::Anthropic,
            "ANTHROPIC_API_KEY",
            "claude-sonnet-4-5",
            "Claude 4.5 Sonnet",
        )
        .with_max_tokens(4000),
    }
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Generation backends keyed by provider id (`gpt`, `claude`, ...)
    #[serde(default)]
    pub providers: BTreeMap<String, BackendConfig>,
    /// Judge backends keyed by judge id (`gpt`, `claude`)
    #[serde(default)]
    pub judges: BTreeMap<String, BackendConfig>,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Root directory for saved reports
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Listen address for `serve`
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            judges: BTreeMap::new(),
            concurrency: ConcurrencyConfig::default(),
            results_dir: default_results_dir(),
            bind: default_bind(),
        }
        .with_defaults()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config.with_defaults())
    }

    /// Load from `path` when given, otherwise use built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Fill in built-in backends for every provider/judge the file left out
    fn with_defaults(mut self) -> Self {
        for provider in Provider::ALL {
            self.providers
                .entry(provider.as_str().to_string())
                .or_insert_with(|| default_provider_config(provider));
        }
        for judge in JudgeId::BOTH {
            self.judges
                .entry(judge.as_str().to_string())
                .or_insert_with(|| default_judge_config(judge));
        }
        self
    }

    fn validate(&self) -> Result<()> {
        for key in self.providers.keys() {
            key.parse::<Provider>()
                .with_context(|| format!("Invalid [providers.{}] section", key))?;
        }
        for key in self.judges.keys() {
            if !JudgeId::BOTH.iter().any(|j| j.as_str() == key) {
                anyhow::bail!("Unknown judge: {} (expected gpt or claude)", key);
            }
        }
        Ok(())
    }

    pub fn provider(&self, provider: Provider) -> BackendConfig {
        self.providers
            .get(provider.as_str())
            .cloned()
            .unwrap_or_else(|| default_provider_config(provider))
    }

    pub fn judge(&self, judge: JudgeId) -> BackendConfig {
        self.judges
            .get(judge.as_str())
            .cloned()
            .unwrap_or_else(|| default_judge_config(judge))
    }
}
