use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Generation backends a job can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "gemini-pro")]
    GeminiPro,
    #[serde(rename = "gemini-3-pro-preview")]
    Gemini3ProPreview,
    #[serde(rename = "gemini-flash")]
    GeminiFlash,
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "gpt")]
    Gpt,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::GeminiPro,
        Provider::Gemini3ProPreview,
        Provider::GeminiFlash,
        Provider::Claude,
        Provider::Gpt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::GeminiPro => "gemini-pro",
            Provider::Gemini3ProPreview => "gemini-3-pro-preview",
            Provider::GeminiFlash => "gemini-flash",
            Provider::Claude => "claude",
            Provider::Gpt => "gpt",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Provider::ALL.iter().find(|p| p.as_str() == s.trim()) {
            Some(provider) => Ok(*provider),
            None => bail!("Unknown provider: {}", s),
        }
    }
}

/// The two judge backends; every verdict-producing task asks both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeId {
    Gpt,
    Claude,
}

impl JudgeId {
    pub const BOTH: [JudgeId; 2] = [JudgeId::Gpt, JudgeId::Claude];

    pub fn as_str(self) -> &'static str {
        match self {
            JudgeId::Gpt => "gpt",
            JudgeId::Claude => "claude",
        }
    }
}

impl fmt::Display for JudgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of an A/B comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Version {
    A,
    B,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::A => f.write_str("A"),
            Version::B => f.write_str("B"),
        }
    }
}

/// One generation call to execute. Identity is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTask {
    pub provider: Provider,
    /// 1-based
    pub repeat_index: u32,
    pub version: Option<Version>,
}

/// Outcome of a generation call, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Display name of the backend that answered
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    pub repeat_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn success(
        task: &GenerationTask,
        model: impl Into<String>,
        response: String,
        usage: TokenUsage,
        latency_ms: u64,
    ) -> Self {
        Self {
            model: model.into(),
            provider: Some(task.provider),
            repeat_index: task.repeat_index,
            version: task.version,
            response,
            input_tokens: usage.input,
            output_tokens: usage.output,
            total_tokens: usage.total,
            latency_ms,
            error: None,
        }
    }

    /// Failed call: empty response, zero tokens, latency still recorded
    pub fn failure(
        task: &GenerationTask,
        model: impl Into<String>,
        error: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            model: model.into(),
            provider: Some(task.provider),
            repeat_index: task.repeat_index,
            version: task.version,
            response: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            latency_ms,
            error: Some(error.into()),
        }
    }

    /// Hand-supplied response used by manual comparisons
    pub fn manual(model: impl Into<String>, version: Version, response: String) -> Self {
        Self {
            model: model.into(),
            provider: None,
            repeat_index: 1,
            version: Some(version),
            response,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Token accounting reported by a backend; zero where the backend omits it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Judge's view on whether repeated generations from one model agree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyVerdict {
    pub target_model: String,
    pub judge_model: String,
    pub analysis: String,
    /// 0..=10, 0 when the judge reply carried no score
    pub score: u8,
    pub verdict: Verdict,
}

/// Maxima of the per-trial performance breakdown; they sum to 100.
pub const ACCURACY_MAX: f64 = 40.0;
pub const ADHERENCE_MAX: f64 = 30.0;
pub const LOGIC_MAX: f64 = 20.0;
pub const READABILITY_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    S,
    A,
    B,
    C,
    F,
}

impl Grade {
    pub fn from_score(avg_score: f64) -> Self {
        match avg_score {
            s if s >= 90.0 => Grade::S,
            s if s >= 80.0 => Grade::A,
            s if s >= 70.0 => Grade::B,
            s if s >= 50.0 => Grade::C,
            _ => Grade::F,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Some(Grade::S),
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetadata {
    pub model: String,
    pub total_trials: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Breakdown {
    pub accuracy: f64,
    pub adherence: f64,
    pub logic: f64,
    pub readability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialScore {
    pub id: u32,
    pub breakdown: Breakdown,
    pub total_score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub avg_score: f64,
    pub pass_count: u32,
    pub consistency_std_dev: String,
    pub grade: Grade,
}

/// Judge-supplied body of a performance verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub test_metadata: TestMetadata,
    pub results: Vec<TrialScore>,
    pub final_summary: FinalSummary,
}

/// Absolute quality assessment of a batch of generations from one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceVerdict {
    #[serde(flatten)]
    pub report: PerformanceReport,
    #[serde(rename = "judgeModel")]
    pub judge_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    A,
    B,
    Tie,
}

impl Winner {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Some(Winner::A),
            "b" => Some(Winner::B),
            "tie" => Some(Winner::Tie),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SidePair {
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "B")]
    pub b: f64,
}

/// One rubric criterion paired with the judge's scores for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    pub key: String,
    pub label: String,
    pub max: u32,
    pub score: SidePair,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparativeScores {
    /// Every per-criterion pair the judge returned, keyed as returned
    #[serde(flatten)]
    pub by_key: BTreeMap<String, SidePair>,
    pub details: Vec<ScoreDetail>,
    /// Judge-supplied; never recomputed from `details`
    pub total: SidePair,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SideNotes {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SideAnalysis {
    #[serde(rename = "A")]
    pub a: SideNotes,
    #[serde(rename = "B")]
    pub b: SideNotes,
}

/// Judge-supplied body of a head-to-head verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparativeReport {
    pub winner: Winner,
    pub win_factor: String,
    pub scores: ComparativeScores,
    pub analysis: SideAnalysis,
    pub suggestion: String,
}

/// Head-to-head assessment of two responses, tagged with the compared model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparativeVerdict {
    pub target_model: String,
    pub judge_model: String,
    #[serde(flatten)]
    pub report: ComparativeReport,
}

/// System prompt variant used by a prompt A/B job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub name: String,
    pub prompt: String,
}

/// Hand-supplied response plus the environment it was produced under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualResponse {
    pub content: String,
    #[serde(default)]
    pub env: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptSpec {
    /// One system prompt, judged for consistency and performance
    Single {
        version: Option<String>,
        system_prompt: Option<String>,
    },
    /// Two system prompts, judged head to head per provider
    Versioned { a: PromptVersion, b: PromptVersion },
    /// Two supplied responses, judged head to head under a service rubric
    Manual {
        common_env: Option<String>,
        service_type: String,
        a: ManualResponse,
        b: ManualResponse,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    ModelEval,
    PromptEval,
    ManualEval,
}

impl TestType {
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::ModelEval => "model_eval",
            TestType::PromptEval => "prompt_eval",
            TestType::ManualEval => "manual_eval",
        }
    }
}

/// A validated job: one generation phase, one evaluation phase, one report
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationJob {
    pub title: String,
    pub question_id: Option<String>,
    pub prompt: PromptSpec,
    pub user_message: String,
    pub providers: Vec<Provider>,
    /// Always >= 1
    pub repeat_count: u32,
}

impl EvaluationJob {
    pub fn test_type(&self) -> TestType {
        match self.prompt {
            PromptSpec::Single { .. } => TestType::ModelEval,
            PromptSpec::Versioned { .. } => TestType::PromptEval,
            PromptSpec::Manual { .. } => TestType::ManualEval,
        }
    }
}

/// Every verdict collected during the evaluation phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdicts {
    pub consistency: Vec<ConsistencyVerdict>,
    pub performance: Vec<PerformanceVerdict>,
    pub comparative: Vec<ComparativeVerdict>,
}

impl Verdicts {
    pub fn len(&self) -> usize {
        self.consistency.len() + self.performance.len() + self.comparative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Complete result set handed to the report store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub generations: Vec<GenerationResult>,
    pub verdicts: Verdicts,
}
