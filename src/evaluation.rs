//! Evaluation fan-out: group finished generations into judge tasks and run
//! them, each against both judges, under a bounded pool.

use crate::events::{JobEvent, ProgressEmitter};
use crate::judge::JudgePanel;
use crate::models::{
    ComparativeVerdict, ConsistencyVerdict, GenerationResult, PerformanceVerdict, Verdicts, Version,
};
use crate::prompts::ComparisonContext;
use crate::rubric::{PROMPT_AB, Rubric};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Target name carried by verdicts of a manual comparison
pub const MANUAL_TARGET: &str = "Manual Comparison";

/// One unit of judge work; both judges are asked
#[derive(Debug, Clone)]
pub enum JudgeTask {
    Consistency {
        target_model: String,
        reference: String,
        compares: Vec<String>,
    },
    Performance {
        target_model: String,
        responses: Vec<String>,
    },
    Comparative {
        target_model: String,
        rubric: &'static Rubric,
        context: Arc<ComparisonContext>,
        response_a: String,
        response_b: String,
    },
}

impl JudgeTask {
    pub fn mode(&self) -> &'static str {
        match self {
            JudgeTask::Consistency { .. } => "consistency",
            JudgeTask::Performance { .. } => "performance",
            JudgeTask::Comparative { .. } => "comparative",
        }
    }

    pub fn target_model(&self) -> &str {
        match self {
            JudgeTask::Consistency { target_model, .. }
            | JudgeTask::Performance { target_model, .. }
            | JudgeTask::Comparative { target_model, .. } => target_model,
        }
    }
}

/// Verdicts produced by one task; a judge that failed contributes nothing
#[derive(Debug, Clone, PartialEq)]
pub enum TaskVerdicts {
    Consistency(Vec<ConsistencyVerdict>),
    Performance(Vec<PerformanceVerdict>),
    Comparative(Vec<ComparativeVerdict>),
}

impl TaskVerdicts {
    pub fn len(&self) -> usize {
        match self {
            TaskVerdicts::Consistency(v) => v.len(),
            TaskVerdicts::Performance(v) => v.len(),
            TaskVerdicts::Comparative(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group results by model name, keeping first-appearance order; each group
/// is sorted by repetition.
fn group_by_model<'a>(
    results: impl IntoIterator<Item = &'a GenerationResult>,
) -> Vec<(String, Vec<&'a GenerationResult>)> {
    let mut groups: Vec<(String, Vec<&GenerationResult>)> = Vec::new();
    for result in results {
        match groups.iter_mut().find(|(model, _)| *model == result.model) {
            Some((_, runs)) => runs.push(result),
            None => groups.push((result.model.clone(), vec![result])),
        }
    }
    for (_, runs) in &mut groups {
        runs.sort_by_key(|r| r.repeat_index);
    }
    groups
}

/// Consistency and performance tasks for a single-prompt job.
///
/// Nothing is judged for a single repetition. Consistency needs two
/// successful repetitions: the earliest is the reference, the later ones are
/// compared against it. Every model gets a performance task over all its
/// repetitions in order, failed ones as empty text.
pub fn plan_model_eval(generations: &[GenerationResult], repeat_count: u32) -> Vec<JudgeTask> {
    if repeat_count <= 1 {
        return Vec::new();
    }

    let mut tasks = Vec::new();
    for (model, runs) in group_by_model(generations) {
        let successful: Vec<&GenerationResult> = runs.iter().copied().filter(|r| r.is_success()).collect();

        if let [reference, rest @ ..] = successful.as_slice() {
            if !rest.is_empty() {
                tasks.push(JudgeTask::Consistency {
                    target_model: model.clone(),
                    reference: reference.response.clone(),
                    compares: rest.iter().map(|r| r.response.clone()).collect(),
                });
            }
        }

        tasks.push(JudgeTask::Performance {
            target_model: model,
            responses: runs.iter().map(|r| r.response.clone()).collect(),
        });
    }
    tasks
}

/// One comparative task per model present on both sides of a prompt A/B job,
/// pairing the first successful repetition of each side.
pub fn plan_prompt_comparison(generations: &[GenerationResult], context: ComparisonContext) -> Vec<JudgeTask> {
    let context = Arc::new(context);
    let side = |version: Version| group_by_model(generations.iter().filter(move |r| r.version == Some(version)));
    let groups_b = side(Version::B);

    let mut tasks = Vec::new();
    for (model, runs_a) in side(Version::A) {
        let Some((_, runs_b)) = groups_b.iter().find(|(name, _)| *name == model) else {
            continue;
        };
        let first_a = runs_a.iter().find(|r| r.is_success());
        let first_b = runs_b.iter().find(|r| r.is_success());
        let (Some(first_a), Some(first_b)) = (first_a, first_b) else {
            debug!(model = %model, "no successful pair, comparison skipped");
            continue;
        };

        tasks.push(JudgeTask::Comparative {
            target_model: model,
            rubric: &PROMPT_AB,
            context: context.clone(),
            response_a: first_a.response.clone(),
            response_b: first_b.response.clone(),
        });
    }
    tasks
}

/// The single service-specific task of a manual comparison
pub fn plan_manual_comparison(
    service_type: &str,
    context: ComparisonContext,
    response_a: &str,
    response_b: &str,
) -> Vec<JudgeTask> {
    vec![JudgeTask::Comparative {
        target_model: MANUAL_TARGET.to_string(),
        rubric: Rubric::for_service(service_type),
        context: Arc::new(context),
        response_a: response_a.to_string(),
        response_b: response_b.to_string(),
    }]
}

/// Ask both judges concurrently
pub async fn run_judge_task(judges: &JudgePanel, task: &JudgeTask) -> TaskVerdicts {
    let (gpt, claude) = judges.pair();
    match task {
        JudgeTask::Consistency {
            target_model,
            reference,
            compares,
        } => {
            let (a, b) = tokio::join!(
                gpt.consistency(target_model, reference, compares),
                claude.consistency(target_model, reference, compares)
            );
            TaskVerdicts::Consistency(vec![a, b])
        }
        JudgeTask::Performance {
            target_model,
            responses,
        } => {
            let (a, b) = tokio::join!(
                gpt.performance(target_model, responses),
                claude.performance(target_model, responses)
            );
            TaskVerdicts::Performance(a.into_iter().chain(b).collect())
        }
        JudgeTask::Comparative {
            target_model,
            rubric,
            context,
            response_a,
            response_b,
        } => {
            let (a, b) = tokio::join!(
                gpt.comparative(target_model, rubric, context, response_a, response_b),
                claude.comparative(target_model, rubric, context, response_a, response_b)
            );
            TaskVerdicts::Comparative(a.into_iter().chain(b).collect())
        }
    }
}

/// Run `tasks` with at most `limit` judge pairs in flight, emitting each
/// task's verdicts as soon as it resolves. Tasks not yet started when the
/// receiver hangs up are skipped.
pub async fn run_evaluation_batch(
    judges: &JudgePanel,
    tasks: Vec<JudgeTask>,
    limit: usize,
    emitter: &ProgressEmitter,
) -> Verdicts {
    let total = tasks.len();
    info!(tasks = total, limit, "evaluation started");

    let mut outcomes = stream::iter(tasks)
        .map(|task| async move {
            if emitter.is_detached() {
                debug!(mode = task.mode(), target = task.target_model(), "receiver gone, judge task skipped");
                return None;
            }
            let verdicts = run_judge_task(judges, &task).await;
            debug!(mode = task.mode(), target = task.target_model(), verdicts = verdicts.len(), "judge task finished");
            Some(verdicts)
        })
        .buffer_unordered(limit.max(1));

    let mut collected = Verdicts::default();
    while let Some(outcome) = outcomes.next().await {
        let Some(outcome) = outcome else {
            continue;
        };
        match outcome {
            TaskVerdicts::Consistency(verdicts) => {
                if verdicts.is_empty() {
                    continue;
                }
                emitter.emit(JobEvent::ConsistencyUpdate(verdicts.clone())).await;
                collected.consistency.extend(verdicts);
            }
            TaskVerdicts::Performance(verdicts) => {
                for verdict in verdicts {
                    emitter.emit(JobEvent::PerformanceUpdate(verdict.clone())).await;
                    collected.performance.push(verdict);
                }
            }
            TaskVerdicts::Comparative(verdicts) => {
                for verdict in verdicts {
                    emitter.emit(JobEvent::ComparativeUpdate(verdict.clone())).await;
                    collected.comparative.push(verdict);
                }
            }
        }
    }

    info!(tasks = total, verdicts = collected.len(), "evaluation finished");
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::Judge;
    use crate::models::{GenerationTask, JudgeId, Provider, TokenUsage, Verdict};
    use crate::testing::StubBackend;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const PERFORMANCE_REPLY: &str = r#"{"results": [{"id": 1, "total_score": 90}], "final_summary": {"grade": "S"}}"#;
    const COMPARATIVE_REPLY: &str = r#"{"winner": "B", "scores": {"total": {"A": 60, "B": 75}}}"#;

    fn generation(provider: Provider, model: &str, repeat_index: u32, version: Option<Version>, text: &str) -> GenerationResult {
        let task = GenerationTask {
            provider,
            repeat_index,
            version,
        };
        if text.is_empty() {
            GenerationResult::failure(&task, model, "timeout", 10)
        } else {
            GenerationResult::success(&task, model, text.to_string(), TokenUsage::default(), 10)
        }
    }

    /// Judge that answers consistency in text and everything else in JSON
    fn smart_stub() -> StubBackend {
        StubBackend::new(|request| {
            if !request.json_mode {
                Ok("Analysis: same\nScore: 10\nVerdict: Pass".to_string())
            } else if request.user_message.contains("\"winner\"") {
                Ok(COMPARATIVE_REPLY.to_string())
            } else {
                Ok(PERFORMANCE_REPLY.to_string())
            }
        })
    }

    fn panel(gpt: &StubBackend, claude: &StubBackend) -> JudgePanel {
        JudgePanel::new(
            Judge::new(JudgeId::Gpt, "GPT-5", gpt.clone().into_arc()),
            Judge::new(JudgeId::Claude, "Claude 4.5 Sonnet", claude.clone().into_arc()),
        )
    }

    fn drain(rx: &mut mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn prompt_context() -> ComparisonContext {
        ComparisonContext::Prompts {
            system_a: "formal".into(),
            system_b: "casual".into(),
            user_query: "hello".into(),
        }
    }

    #[test]
    fn test_plan_model_eval_needs_repetitions() {
        let generations = vec![generation(Provider::Gpt, "GPT-5", 1, None, "x")];
        assert!(plan_model_eval(&generations, 1).is_empty());
    }

    #[test]
    fn test_plan_model_eval_reference_is_earliest_success() {
        let generations = vec![
            generation(Provider::Gpt, "GPT-5", 3, None, "third"),
            generation(Provider::Gpt, "GPT-5", 1, None, ""),
            generation(Provider::Gpt, "GPT-5", 2, None, "second"),
        ];
        let tasks = plan_model_eval(&generations, 3);
        assert_eq!(tasks.len(), 2);

        match &tasks[0] {
            JudgeTask::Consistency { reference, compares, .. } => {
                assert_eq!(reference, "second");
                assert_eq!(compares, &vec!["third".to_string()]);
            }
            other => panic!("unexpected task {:?}", other),
        }
        match &tasks[1] {
            JudgeTask::Performance { responses, .. } => {
                assert_eq!(responses, &vec![String::new(), "second".to_string(), "third".to_string()]);
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_plan_model_eval_grades_models_that_always_failed() {
        let generations = vec![
            generation(Provider::Gpt, "GPT-5", 1, None, ""),
            generation(Provider::Gpt, "GPT-5", 2, None, ""),
        ];
        let tasks = plan_model_eval(&generations, 2);

        assert_eq!(tasks.len(), 1);
        match &tasks[0] {
            JudgeTask::Performance { target_model, responses } => {
                assert_eq!(target_model, "GPT-5");
                assert_eq!(responses, &vec![String::new(), String::new()]);
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_plan_model_eval_skips_consistency_with_one_success() {
        let generations = vec![
            generation(Provider::Claude, "Claude", 1, None, "only"),
            generation(Provider::Claude, "Claude", 2, None, ""),
        ];
        let tasks = plan_model_eval(&generations, 2);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].mode(), "performance");
    }

    #[test]
    fn test_plan_prompt_comparison_pairs_first_success_per_side() {
        let generations = vec![
            generation(Provider::Gpt, "GPT-5", 1, Some(Version::A), ""),
            generation(Provider::Gpt, "GPT-5", 2, Some(Version::A), "a2"),
            generation(Provider::Gpt, "GPT-5", 1, Some(Version::B), "b1"),
            generation(Provider::Gpt, "GPT-5", 2, Some(Version::B), "b2"),
            generation(Provider::Claude, "Claude", 1, Some(Version::A), ""),
            generation(Provider::Claude, "Claude", 1, Some(Version::B), "cb"),
        ];
        let tasks = plan_prompt_comparison(&generations, prompt_context());

        assert_eq!(tasks.len(), 1);
        match &tasks[0] {
            JudgeTask::Comparative {
                target_model,
                rubric,
                response_a,
                response_b,
                ..
            } => {
                assert_eq!(target_model, "GPT-5");
                assert_eq!(rubric.tag, "prompt_ab");
                assert_eq!(response_a, "a2");
                assert_eq!(response_b, "b1");
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_plan_manual_comparison_selects_rubric() {
        let context = ComparisonContext::Service {
            common_env: None,
            env_a: String::new(),
            env_b: String::new(),
            user_query: "q".into(),
        };
        let tasks = plan_manual_comparison("venture_combination", context, "a", "b");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].target_model(), MANUAL_TARGET);
        match &tasks[0] {
            JudgeTask::Comparative { rubric, .. } => assert_eq!(rubric.tag, "venture_combination"),
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_two_providers_three_repetitions_yield_eight_verdicts() {
        let mut generations = Vec::new();
        for (provider, model) in [(Provider::Gpt, "GPT-5"), (Provider::Claude, "Claude 4.5 Sonnet")] {
            for repeat_index in 1..=3 {
                generations.push(generation(provider, model, repeat_index, None, "same answer"));
            }
        }
        let tasks = plan_model_eval(&generations, 3);
        assert_eq!(tasks.len(), 4);

        let (gpt, claude) = (smart_stub(), smart_stub());
        let (emitter, mut rx) = ProgressEmitter::channel(64);
        let verdicts = run_evaluation_batch(&panel(&gpt, &claude), tasks, 3, &emitter).await;

        assert_eq!(verdicts.consistency.len(), 4);
        assert_eq!(verdicts.performance.len(), 4);
        assert_eq!(verdicts.len(), 8);
        assert!(verdicts.consistency.iter().all(|v| v.verdict == Verdict::Pass && v.score >= 8));

        let events = drain(&mut rx);
        let consistency_events = events.iter().filter(|e| e.kind() == "consistency_update").count();
        let performance_events = events.iter().filter(|e| e.kind() == "performance_update").count();
        assert_eq!(consistency_events, 2);
        assert_eq!(performance_events, 4);
    }

    #[tokio::test]
    async fn test_both_judges_failing_contributes_nothing() {
        let generations = vec![
            generation(Provider::Gpt, "GPT-5", 1, Some(Version::A), "a"),
            generation(Provider::Gpt, "GPT-5", 1, Some(Version::B), "b"),
        ];
        let tasks = plan_prompt_comparison(&generations, prompt_context());

        let (gpt, claude) = (StubBackend::failing("down"), StubBackend::replying("not json"));
        let (emitter, mut rx) = ProgressEmitter::channel(8);
        let verdicts = run_evaluation_batch(&panel(&gpt, &claude), tasks, 3, &emitter).await;

        assert!(verdicts.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_one_judge_failing_keeps_the_other() {
        let generations = vec![
            generation(Provider::Gpt, "GPT-5", 1, Some(Version::A), "a"),
            generation(Provider::Gpt, "GPT-5", 1, Some(Version::B), "b"),
        ];
        let tasks = plan_prompt_comparison(&generations, prompt_context());

        let (gpt, claude) = (StubBackend::failing("down"), smart_stub());
        let (emitter, mut rx) = ProgressEmitter::channel(8);
        let verdicts = run_evaluation_batch(&panel(&gpt, &claude), tasks, 3, &emitter).await;

        assert_eq!(verdicts.comparative.len(), 1);
        assert_eq!(verdicts.comparative[0].judge_model, "Claude 4.5 Sonnet");
        assert_eq!(verdicts.comparative[0].target_model, "GPT-5");
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_evaluation_respects_concurrency_bound() {
        let gpt = smart_stub().with_delay(Duration::from_millis(20));
        let claude = smart_stub().with_delay(Duration::from_millis(20));
        let tasks: Vec<JudgeTask> = (0..8)
            .map(|i| JudgeTask::Performance {
                target_model: format!("model-{}", i),
                responses: vec!["r".to_string()],
            })
            .collect();

        let (emitter, _rx) = ProgressEmitter::channel(64);
        let verdicts = run_evaluation_batch(&panel(&gpt, &claude), tasks, 2, &emitter).await;

        assert_eq!(verdicts.performance.len(), 16);
        assert!(gpt.max_in_flight() <= 2);
        assert!(claude.max_in_flight() <= 2);
        assert_eq!(gpt.calls(), 8);
    }

    #[tokio::test]
    async fn test_detached_receiver_skips_remaining_tasks() {
        let judge = smart_stub();
        let tasks: Vec<JudgeTask> = (0..4)
            .map(|i| JudgeTask::Performance {
                target_model: format!("model-{}", i),
                responses: vec!["r".to_string()],
            })
            .collect();

        let (emitter, rx) = ProgressEmitter::channel(8);
        drop(rx);
        let verdicts = run_evaluation_batch(&panel(&judge, &judge), tasks, 2, &emitter).await;

        assert!(emitter.is_detached());
        assert!(verdicts.is_empty());
        assert_eq!(judge.calls(), 0);
    }
}
