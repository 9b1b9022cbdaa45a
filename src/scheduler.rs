//! Generation fan-out: every (provider, repetition[, version]) task runs
//! under a per-batch semaphore and every task yields a result.

use crate::models::{GenerationResult, GenerationTask, Provider, Version};
use crate::provider::ProviderSet;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Prompt pair shared by every task of one batch
#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub system_prompt: Option<Arc<str>>,
    pub user_message: Arc<str>,
}

impl GenerationPrompt {
    pub fn new(system_prompt: Option<&str>, user_message: &str) -> Self {
        Self {
            system_prompt: system_prompt.map(Arc::from),
            user_message: Arc::from(user_message),
        }
    }
}

/// One task per provider and repetition; repetition indices start at 1
pub fn plan_batch(providers: &[Provider], repeat_count: u32, version: Option<Version>) -> Vec<GenerationTask> {
    providers
        .iter()
        .flat_map(|&provider| {
            (1..=repeat_count).map(move |repeat_index| GenerationTask {
                provider,
                repeat_index,
                version,
            })
        })
        .collect()
}

/// Run `tasks` with at most `limit` calls in flight.
///
/// Returns one result per task in plan order. Individual call failures are
/// results with `error` set; only a panicked or cancelled task fails the batch.
pub async fn run_generation_batch(
    providers: &ProviderSet,
    tasks: Vec<GenerationTask>,
    prompt: &GenerationPrompt,
    limit: usize,
) -> Result<Vec<GenerationResult>> {
    let total = tasks.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut join_set = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        let Some(adapter) = providers.get(task.provider) else {
            debug!(provider = %task.provider, "no adapter registered");
            let result = GenerationResult::failure(
                &task,
                task.provider.as_str(),
                format!("Provider {} is not configured", task.provider),
                0,
            );
            join_set.spawn(async move { (index, result) });
            continue;
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Generation pool closed")?;
        let prompt = prompt.clone();
        join_set.spawn(async move {
            let _permit = permit;
            let result = adapter
                .generate(&task, prompt.system_prompt.as_deref(), &prompt.user_message)
                .await;
            (index, result)
        });
    }

    let mut indexed = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        let (index, result) = joined.context("Generation task did not complete")?;
        indexed.push((index, result));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let results: Vec<GenerationResult> = indexed.into_iter().map(|(_, result)| result).collect();
    let failed = results.iter().filter(|r| !r.is_success()).count();
    info!(total, failed, "generation batch finished");
    Ok(results)
}

/// A and B batches run concurrently, each with its own pool; A results come first
pub async fn run_versioned_batches(
    providers: &ProviderSet,
    selected: &[Provider],
    repeat_count: u32,
    prompt_a: &GenerationPrompt,
    prompt_b: &GenerationPrompt,
    limit: usize,
) -> Result<Vec<GenerationResult>> {
    let batch_a = run_generation_batch(
        providers,
        plan_batch(selected, repeat_count, Some(Version::A)),
        prompt_a,
        limit,
    );
    let batch_b = run_generation_batch(
        providers,
        plan_batch(selected, repeat_count, Some(Version::B)),
        prompt_b,
        limit,
    );

    let (mut results, results_b) = tokio::try_join!(batch_a, batch_b)?;
    results.extend(results_b);
    Ok(results)
}
