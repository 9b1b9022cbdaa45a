use crate::backend::{ChatBackend, CompletionRequest, build_backend_or_unavailable};
use crate::config::Config;
use crate::models::{ComparativeVerdict, ConsistencyVerdict, JudgeId, PerformanceVerdict, Verdict};
use crate::parser::{self, ParseOutcome};
use crate::prompts::{self, ComparisonContext};
use crate::rubric::Rubric;
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::{debug, warn};

/// One judge backend plus the name its verdicts carry
pub struct Judge {
    id: JudgeId,
    name: String,
    backend: Arc<dyn ChatBackend>,
}

impl Judge {
    pub fn new(id: JudgeId, name: impl Into<String>, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            id,
            name: name.into(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send an evaluation prompt and return the raw reply text
    pub async fn judge(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let mut request = CompletionRequest::new(None, prompt);
        if json_mode {
            request = request.json();
        }

        let completion = self
            .backend
            .complete(&request)
            .await
            .with_context(|| format!("Judge {} failed", self.id))?;

        if completion.text.trim().is_empty() {
            bail!("Judge {} returned an empty reply", self.id);
        }
        Ok(completion.text)
    }

    /// Consistency check of `compares` against `reference`.
    ///
    /// Always yields a verdict: a failed call reads as score 0 / Fail.
    pub async fn consistency(
        &self,
        target_model: &str,
        reference: &str,
        compares: &[String],
    ) -> ConsistencyVerdict {
        let prompt = prompts::consistency_prompt(reference, compares);

        match self.judge(&prompt, false).await {
            Ok(raw) => {
                let reading = parser::parse_consistency(&raw);
                ConsistencyVerdict {
                    target_model: target_model.to_string(),
                    judge_model: self.name.clone(),
                    analysis: reading.analysis,
                    score: reading.score,
                    verdict: reading.verdict,
                }
            }
            Err(e) => {
                warn!(judge = %self.id, target = target_model, error = %format!("{:#}", e), "consistency check failed");
                ConsistencyVerdict {
                    target_model: target_model.to_string(),
                    judge_model: self.name.clone(),
                    analysis: format!("Evaluation failed: {:#}", e),
                    score: 0,
                    verdict: Verdict::Fail,
                }
            }
        }
    }

    /// Absolute grading of every repetition from one model
    pub async fn performance(&self, target_model: &str, responses: &[String]) -> Option<PerformanceVerdict> {
        let prompt = prompts::performance_prompt(target_model, responses);
        let raw = self.judge_or_log(&prompt, "performance", target_model).await?;

        match parser::parse_performance(&raw) {
            ParseOutcome::Ok(mut report) => {
                if report.test_metadata.model.is_empty() {
                    report.test_metadata.model = target_model.to_string();
                }
                Some(PerformanceVerdict {
                    report,
                    judge_model: self.name.clone(),
                })
            }
            ParseOutcome::Malformed(raw) => {
                warn!(judge = %self.id, target = target_model, chars = raw.len(), "performance reply was not usable JSON");
                None
            }
        }
    }

    /// Head-to-head comparison of two responses under `rubric`
    pub async fn comparative(
        &self,
        target_model: &str,
        rubric: &Rubric,
        context: &ComparisonContext,
        response_a: &str,
        response_b: &str,
    ) -> Option<ComparativeVerdict> {
        let prompt = prompts::comparative_prompt(rubric, context, response_a, response_b);
        let raw = self.judge_or_log(&prompt, "comparative", target_model).await?;

        match parser::parse_comparative(&raw, rubric) {
            ParseOutcome::Ok(report) => Some(ComparativeVerdict {
                target_model: target_model.to_string(),
                judge_model: self.name.clone(),
                report,
            }),
            ParseOutcome::Malformed(raw) => {
                warn!(judge = %self.id, target = target_model, rubric = rubric.tag, chars = raw.len(), "comparative reply was not usable JSON");
                None
            }
        }
    }

    async fn judge_or_log(&self, prompt: &str, mode: &str, target_model: &str) -> Option<String> {
        match self.judge(prompt, true).await {
            Ok(raw) => {
                debug!(judge = %self.id, mode, target = target_model, chars = raw.len(), "judge replied");
                Some(raw)
            }
            Err(e) => {
                warn!(judge = %self.id, mode, target = target_model, error = %format!("{:#}", e), "judge call failed");
                None
            }
        }
    }
}

/// The two judges every evaluation task is sent to
pub struct JudgePanel {
    gpt: Judge,
    claude: Judge,
}

impl JudgePanel {
    pub fn new(gpt: Judge, claude: Judge) -> Self {
        Self { gpt, claude }
    }

    pub fn from_config(config: &Config) -> Self {
        let build = |id: JudgeId| {
            let judge_config = config.judge(id);
            let name = format!("judge-{}", id);
            let backend = build_backend_or_unavailable(&name, &judge_config);
            Judge::new(id, judge_config.display_name(), backend)
        };
        Self::new(build(JudgeId::Gpt), build(JudgeId::Claude))
    }

    /// Both judges, GPT first
    pub fn pair(&self) -> (&Judge, &Judge) {
        (&self.gpt, &self.claude)
    }
}
