use crate::config::{Config, ConcurrencyConfig};
use crate::evaluation::{self, JudgeTask};
use crate::events::{JobEvent, JobState, ProgressEmitter};
use crate::judge::JudgePanel;
use crate::models::{
    EvaluationJob, GenerationResult, JobResults, JudgeId, PromptSpec, Version,
};
use crate::prompts::ComparisonContext;
use crate::provider::ProviderSet;
use crate::scheduler::{self, GenerationPrompt};
use crate::storage::{FileReportStore, ReportStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const EVENT_BUFFER: usize = 64;

/// Main runner that drives a job through generation, evaluation and persistence
pub struct Runner {
    providers: Arc<ProviderSet>,
    judges: Arc<JudgePanel>,
    concurrency: ConcurrencyConfig,
    store: Arc<dyn ReportStore>,
}

impl Runner {
    pub fn new(
        providers: ProviderSet,
        judges: JudgePanel,
        concurrency: ConcurrencyConfig,
        store: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            providers: Arc::new(providers),
            judges: Arc::new(judges),
            concurrency,
            store,
        }
    }

    /// Build backends, judges and the report store from configuration
    pub fn from_config(config: &Config) -> Self {
        let store = FileReportStore::new(&config.results_dir)
            .with_judge(config.judge(JudgeId::Gpt).display_name(), JudgeId::Gpt)
            .with_judge(config.judge(JudgeId::Claude).display_name(), JudgeId::Claude);

        Self::new(
            ProviderSet::from_config(config),
            JudgePanel::from_config(config),
            config.concurrency.clone(),
            Arc::new(store),
        )
    }

    /// Run `job` to completion; exactly one terminal event is emitted
    pub async fn run_job(&self, job: EvaluationJob, emitter: &ProgressEmitter) {
        info!(
            title = %job.title,
            test_type = job.test_type().as_str(),
            providers = job.providers.len(),
            repeat_count = job.repeat_count,
            "job started"
        );

        match self.execute(job, emitter).await {
            Ok(saved_path) => {
                info!(path = %saved_path, "job finished");
                emitter.finish(saved_path).await;
            }
            Err(e) if emitter.is_detached() => {
                warn!(error = %format!("{:#}", e), "job abandoned");
                emitter.fail(format!("{:#}", e)).await;
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(error = %message, "job failed");
                emitter.fail(message).await;
            }
        }
    }

    /// Start `job` on its own task and hand back the event stream.
    /// A job that failed validation yields a single error event, and so does
    /// a job task that panicked.
    pub fn spawn_job(self: &Arc<Self>, job: Result<EvaluationJob>) -> mpsc::Receiver<JobEvent> {
        let (emitter, rx) = ProgressEmitter::channel(EVENT_BUFFER);
        let emitter = Arc::new(emitter);
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let job = match job {
                Ok(job) => job,
                Err(e) => return emitter.fail(format!("{:#}", e)).await,
            };
            let worker = {
                let emitter = Arc::clone(&emitter);
                tokio::spawn(async move { runner.run_job(job, &emitter).await })
            };
            if let Err(e) = worker.await {
                error!(error = %e, "job task aborted");
                emitter.fail(format!("Job task aborted: {}", e)).await;
            }
        });
        rx
    }

    async fn execute(&self, job: EvaluationJob, emitter: &ProgressEmitter) -> Result<String> {
        emitter.enter(JobState::Generating);
        let generations = self.generate(&job).await?;
        emitter.emit(JobEvent::GenerationAll(generations.clone())).await;
        ensure_attached(emitter)?;

        emitter.enter(JobState::Evaluating);
        let (tasks, limit) = self.plan_evaluation(&job, &generations);
        let verdicts = evaluation::run_evaluation_batch(&self.judges, tasks, limit, emitter).await;
        ensure_attached(emitter)?;

        emitter.enter(JobState::Persisting);
        let results = JobResults {
            generations,
            verdicts,
        };
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(&job, &results))
            .await
            .context("Report writer did not complete")?
            .context("Failed to save report")
    }

    async fn generate(&self, job: &EvaluationJob) -> Result<Vec<GenerationResult>> {
        let limit = self.concurrency.generation;
        match &job.prompt {
            PromptSpec::Single { system_prompt, .. } => {
                let prompt = GenerationPrompt::new(system_prompt.as_deref(), &job.user_message);
                let tasks = scheduler::plan_batch(&job.providers, job.repeat_count, None);
                scheduler::run_generation_batch(&self.providers, tasks, &prompt, limit).await
            }
            PromptSpec::Versioned { a, b } => {
                scheduler::run_versioned_batches(
                    &self.providers,
                    &job.providers,
                    job.repeat_count,
                    &GenerationPrompt::new(Some(&a.prompt), &job.user_message),
                    &GenerationPrompt::new(Some(&b.prompt), &job.user_message),
                    limit,
                )
                .await
            }
            PromptSpec::Manual { a, b, .. } => Ok(vec![
                GenerationResult::manual("Manual Input A", Version::A, a.content.clone()),
                GenerationResult::manual("Manual Input B", Version::B, b.content.clone()),
            ]),
        }
    }

    /// Judge tasks for `job` and the pool bound they run under
    fn plan_evaluation(&self, job: &EvaluationJob, generations: &[GenerationResult]) -> (Vec<JudgeTask>, usize) {
        match &job.prompt {
            PromptSpec::Single { .. } => (
                evaluation::plan_model_eval(generations, job.repeat_count),
                self.concurrency.evaluation,
            ),
            PromptSpec::Versioned { a, b } => {
                let context = ComparisonContext::Prompts {
                    system_a: a.prompt.clone(),
                    system_b: b.prompt.clone(),
                    user_query: job.user_message.clone(),
                };
                (
                    evaluation::plan_prompt_comparison(generations, context),
                    self.concurrency.comparative,
                )
            }
            PromptSpec::Manual {
                common_env,
                service_type,
                a,
                b,
            } => {
                let context = ComparisonContext::Service {
                    common_env: common_env.clone(),
                    env_a: a.env.clone(),
                    env_b: b.env.clone(),
                    user_query: job.user_message.clone(),
                };
                (
                    evaluation::plan_manual_comparison(service_type, context, &a.content, &b.content),
                    self.concurrency.manual,
                )
            }
        }
    }
}

/// Stop between phases once nobody is listening
fn ensure_attached(emitter: &ProgressEmitter) -> Result<()> {
    if emitter.is_detached() {
        anyhow::bail!("Client disconnected");
    }
    Ok(())
}
