//! Report persistence.
//!
//! A saved job is a folder of markdown and JSON files under
//! `<results_dir>/<test_type>/<YYYYMMDD_HHMM>_<title>/`.

use crate::models::{
    ComparativeVerdict, ConsistencyVerdict, EvaluationJob, GenerationResult, JobResults, JudgeId,
    PerformanceVerdict, PromptSpec,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives a finished job and returns where it was persisted
pub trait ReportStore: Send + Sync {
    fn save(&self, job: &EvaluationJob, results: &JobResults) -> Result<String>;
}

const TITLE_MAX_CHARS: usize = 15;

static MODEL_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s.]+").expect("valid model separator regex"));

/// Title usable as part of a folder name
pub fn safe_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .take(TITLE_MAX_CHARS)
        .collect()
}

/// Model name usable as part of a file name
pub fn safe_model_name(model: &str) -> String {
    MODEL_SEPARATORS.replace_all(model, "_").into_owned()
}

pub struct FileReportStore {
    root: PathBuf,
    /// Judge display names mapped to the key used in file names
    judges: Vec<(String, JudgeId)>,
}

impl FileReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            judges: Vec::new(),
        }
    }

    pub fn with_judge(mut self, name: impl Into<String>, id: JudgeId) -> Self {
        self.judges.push((name.into(), id));
        self
    }

    fn judge_key(&self, judge_model: &str) -> String {
        match self.judges.iter().find(|(name, _)| name == judge_model) {
            Some((_, id)) => id.as_str().to_string(),
            None => safe_model_name(judge_model).to_lowercase(),
        }
    }

    /// Write every report file with `now` as the run timestamp
    pub fn save_at(&self, job: &EvaluationJob, results: &JobResults, now: DateTime<Local>) -> Result<PathBuf> {
        let stamp = now.format("%Y%m%d_%H%M").to_string();
        let executed_at = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let folder = self
            .root
            .join(job.test_type().as_str())
            .join(format!("{}_{}", stamp, safe_title(&job.title)));

        fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create report directory: {}", folder.display()))?;

        write_file(&folder, &format!("{}_Input.md", stamp), &render_input(job, &executed_at))?;

        for result in &results.generations {
            let version_tag = result.version.map(|v| format!("_{}", v)).unwrap_or_default();
            let name = format!(
                "{}_{:02}{}_{}.md",
                stamp,
                result.repeat_index,
                version_tag,
                safe_model_name(&result.model)
            );
            write_file(&folder, &name, &render_generation(result, job.repeat_count, &executed_at))?;
        }

        let verdicts = &results.verdicts;
        for (key, group) in self.group_by_judge(&verdicts.consistency, |v| &v.judge_model) {
            write_file(&folder, &format!("analysis_{}.md", key), &render_consistency(&group))?;
        }
        for (key, group) in self.group_by_judge(&verdicts.performance, |v| &v.judge_model) {
            write_json(&folder, &format!("performance_{}.json", key), &group)?;
            write_file(&folder, &format!("performance_{}.md", key), &render_performance(&group))?;
        }
        for (key, group) in self.group_by_judge(&verdicts.comparative, |v| &v.judge_model) {
            write_json(&folder, &format!("comparative_{}.json", key), &group)?;
            write_file(&folder, &format!("comparative_{}.md", key), &render_comparative(&group))?;
        }

        write_file(
            &folder,
            &format!("{}_Summary.txt", stamp),
            &render_summary(job, results, &executed_at),
        )?;

        info!(path = %folder.display(), files = results.generations.len(), "report saved");
        Ok(folder)
    }

    fn group_by_judge<'a, T>(
        &self,
        verdicts: &'a [T],
        judge_model: impl Fn(&T) -> &String,
    ) -> BTreeMap<String, Vec<&'a T>> {
        let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
        for verdict in verdicts {
            groups.entry(self.judge_key(judge_model(verdict))).or_default().push(verdict);
        }
        groups
    }
}

impl ReportStore for FileReportStore {
    fn save(&self, job: &EvaluationJob, results: &JobResults) -> Result<String> {
        let folder = self.save_at(job, results, Local::now())?;
        Ok(folder.display().to_string())
    }
}

fn write_file(folder: &Path, name: &str, content: &str) -> Result<()> {
    let path = folder.join(name);
    fs::write(&path, content).with_context(|| format!("Failed to write report file: {}", path.display()))
}

fn write_json<T: Serialize>(folder: &Path, name: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize verdicts to JSON")?;
    write_file(folder, name, &json)
}

fn test_type_label(job: &EvaluationJob) -> &'static str {
    match job.prompt {
        PromptSpec::Single { .. } => "Model comparison",
        PromptSpec::Versioned { .. } => "Prompt A/B comparison",
        PromptSpec::Manual { .. } => "Manual response comparison",
    }
}

fn selected_models(job: &EvaluationJob) -> Vec<String> {
    match job.prompt {
        PromptSpec::Manual { .. } => vec!["Manual Input A".to_string(), "Manual Input B".to_string()],
        _ => job.providers.iter().map(|p| p.to_string()).collect(),
    }
}

fn render_input(job: &EvaluationJob, executed_at: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Test run\n");
    let _ = writeln!(out, "**Executed at**: {}", executed_at);
    let _ = writeln!(out, "**Title**: {}", job.title);
    let _ = writeln!(out, "**Question ID**: {}", job.question_id.as_deref().unwrap_or("(none)"));
    let _ = writeln!(out, "**Test type**: {}", test_type_label(job));
    let _ = writeln!(out, "**Repetitions**: {}\n", job.repeat_count);

    match &job.prompt {
        PromptSpec::Single {
            version,
            system_prompt,
        } => {
            let version = version.as_deref().map(|v| format!(" ({})", v)).unwrap_or_default();
            let _ = writeln!(out, "## System prompt{}", version);
            let _ = writeln!(out, "{}\n", system_prompt.as_deref().unwrap_or("(none)"));
        }
        PromptSpec::Versioned { a, b } => {
            let _ = writeln!(out, "## System prompts");
            let _ = writeln!(out, "Version A: {}\n{}\n", a.name, a.prompt);
            let _ = writeln!(out, "Version B: {}\n{}\n", b.name, b.prompt);
        }
        PromptSpec::Manual {
            common_env,
            service_type,
            a,
            b,
        } => {
            if let Some(env) = common_env {
                let _ = writeln!(out, "## Common test environment\n{}\n", env);
            }
            let _ = writeln!(out, "## Service type\n{}\n", service_type);
            let _ = writeln!(out, "## Environments");
            let _ = writeln!(out, "Version A Env:\n{}\n", a.env);
            let _ = writeln!(out, "Version B Env:\n{}\n", b.env);
        }
    }

    let _ = writeln!(out, "## User message\n{}\n", job.user_message);
    let _ = writeln!(out, "## Selected models");
    for model in selected_models(job) {
        let _ = writeln!(out, "- {}", model);
    }
    out
}

fn seconds(latency_ms: u64) -> String {
    format!("{:.2}s", latency_ms as f64 / 1000.0)
}

fn render_generation(result: &GenerationResult, repeat_count: u32, executed_at: &str) -> String {
    let version = result.version.map(|v| format!(" [{}]", v)).unwrap_or_default();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# {}{} response ({}/{})\n",
        result.model, version, result.repeat_index, repeat_count
    );
    let _ = writeln!(out, "## Response");
    let _ = writeln!(out, "{}\n", result.error.as_deref().unwrap_or(&result.response));
    let _ = writeln!(out, "## Metadata");
    let _ = writeln!(
        out,
        "- **Version**: {}",
        result.version.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
    );
    let _ = writeln!(out, "- **Repetition**: {} / {}", result.repeat_index, repeat_count);
    let _ = writeln!(out, "- **Input tokens**: {}", result.input_tokens);
    let _ = writeln!(out, "- **Output tokens**: {}", result.output_tokens);
    let _ = writeln!(out, "- **Total tokens**: {}", result.total_tokens);
    let _ = writeln!(out, "- **Latency**: {}", seconds(result.latency_ms));
    let _ = writeln!(out, "- **Executed at**: {}", executed_at);
    if let Some(error) = &result.error {
        let _ = writeln!(out, "- **Error**: {}", error);
    }
    out
}

fn render_consistency(verdicts: &[&ConsistencyVerdict]) -> String {
    let judge = verdicts.first().map_or("", |v| v.judge_model.as_str());
    let sections: Vec<String> = verdicts
        .iter()
        .map(|v| {
            format!(
                "## Target model: {}\n- **Score**: {}/10\n- **Verdict**: {:?}\n- **Analysis**:\n{}\n",
                v.target_model, v.score, v.verdict, v.analysis
            )
        })
        .collect();
    format!("# Consistency report - {}\n\n{}", judge, sections.join("\n---\n\n"))
}

fn render_performance(verdicts: &[&PerformanceVerdict]) -> String {
    let judge = verdicts.first().map_or("", |v| v.judge_model.as_str());
    let sections: Vec<String> = verdicts
        .iter()
        .map(|v| {
            let report = &v.report;
            let summary = &report.final_summary;
            let mut out = String::new();
            let _ = writeln!(out, "## Target model: {}", report.test_metadata.model);
            let _ = writeln!(out, "- **Average score**: {:.2}", summary.avg_score);
            let _ = writeln!(out, "- **Grade**: {:?}", summary.grade);
            let _ = writeln!(out, "- **Consistency (std dev)**: {}", summary.consistency_std_dev);
            let _ = writeln!(
                out,
                "- **Trials**: {} run / {} passed\n",
                report.test_metadata.total_trials, summary.pass_count
            );
            let _ = writeln!(out, "### Per-trial analysis");
            for trial in &report.results {
                let b = &trial.breakdown;
                let _ = writeln!(out, "#### Trial {} (total: {})", trial.id, trial.total_score);
                let _ = writeln!(out, "- **Accuracy**: {}/40", b.accuracy);
                let _ = writeln!(out, "- **Adherence**: {}/30", b.adherence);
                let _ = writeln!(out, "- **Logic**: {}/20", b.logic);
                let _ = writeln!(out, "- **Readability**: {}/10", b.readability);
                let _ = writeln!(out, "- **Reason**: {}\n", trial.reason);
            }
            out
        })
        .collect();
    format!("# Performance report - {}\n\n{}", judge, sections.join("\n---\n\n"))
}

fn render_comparative(verdicts: &[&ComparativeVerdict]) -> String {
    let judge = verdicts.first().map_or("", |v| v.judge_model.as_str());
    let sections: Vec<String> = verdicts
        .iter()
        .map(|v| {
            let report = &v.report;
            let mut out = String::new();
            let _ = writeln!(out, "## Target model: {}", v.target_model);
            let _ = writeln!(out, "- **Winner**: **{:?}**", report.winner);
            let _ = writeln!(out, "- **Deciding factor**: {}\n", report.win_factor);
            let _ = writeln!(out, "### Scores");
            let _ = writeln!(out, "| Criterion | A | B |\n| :--- | :---: | :---: |");
            for detail in &report.scores.details {
                let _ = writeln!(
                    out,
                    "| {} ({}) | {} | {} |",
                    detail.label, detail.max, detail.score.a, detail.score.b
                );
            }
            let _ = writeln!(
                out,
                "| **Total (100)** | **{}** | **{}** |\n",
                report.scores.total.a, report.scores.total.b
            );
            for (side, notes) in [("A", &report.analysis.a), ("B", &report.analysis.b)] {
                let _ = writeln!(out, "#### Version {}", side);
                let _ = writeln!(out, "- **Strengths**: {}", notes.strengths.join(", "));
                let _ = writeln!(out, "- **Weaknesses**: {}\n", notes.weaknesses.join(", "));
            }
            let _ = writeln!(out, "### Suggestion\n{}", report.suggestion);
            out
        })
        .collect();
    format!("# A/B comparison report - {}\n\n{}", judge, sections.join("\n---\n\n"))
}

fn render_summary(job: &EvaluationJob, results: &JobResults, executed_at: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Test run summary ===");
    let _ = writeln!(out, "Title: {}", job.title);
    let _ = writeln!(out, "Question ID: {}", job.question_id.as_deref().unwrap_or("N/A"));
    let _ = writeln!(out, "Test type: {}", job.test_type().as_str());
    let _ = writeln!(out, "Executed at: {}", executed_at);
    let _ = writeln!(out, "Repetitions: {}\n", job.repeat_count);

    for r in &results.generations {
        let version = r.version.map(|v| format!(" - {}", v)).unwrap_or_default();
        let _ = writeln!(out, "[{}{} - #{}]", r.model, version, r.repeat_index);
        let _ = writeln!(out, "- Input tokens: {}", r.input_tokens);
        let _ = writeln!(out, "- Output tokens: {}", r.output_tokens);
        let _ = writeln!(out, "- Total tokens: {}", r.total_tokens);
        let _ = writeln!(out, "- Latency: {}", seconds(r.latency_ms));
        let _ = writeln!(out, "- Status: {}", if r.is_success() { "ok" } else { "failed" });
        if let Some(error) = &r.error {
            let _ = writeln!(out, "- Error: {}", error);
        }
        out.push('\n');
    }

    let verdicts = &results.verdicts;
    if !verdicts.consistency.is_empty() {
        let _ = writeln!(out, "=== Consistency ===");
        for v in &verdicts.consistency {
            let _ = writeln!(
                out,
                "[{} - Judge: {}]\n  - Score: {}\n  - Verdict: {:?}",
                v.target_model, v.judge_model, v.score, v.verdict
            );
        }
        out.push('\n');
    }
    if !verdicts.performance.is_empty() {
        let _ = writeln!(out, "=== Performance ===");
        for v in &verdicts.performance {
            let _ = writeln!(
                out,
                "[{} - Judge: {}]\n  - Average score: {:.2}\n  - Grade: {:?}",
                v.report.test_metadata.model, v.judge_model, v.report.final_summary.avg_score, v.report.final_summary.grade
            );
        }
        out.push('\n');
    }
    if !verdicts.comparative.is_empty() {
        let _ = writeln!(out, "=== A/B comparison ===");
        for v in &verdicts.comparative {
            let _ = writeln!(
                out,
                "[{} - Judge: {}]\n  - Winner: {:?}\n  - Scores: A({}) vs B({})\n  - Factor: {}",
                v.target_model, v.judge_model, v.report.winner, v.report.scores.total.a, v.report.scores.total.b, v.report.win_factor
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "=== Token usage ===");
    let mut totals: Vec<(String, [u64; 3])> = Vec::new();
    for r in &results.generations {
        let key = match r.version {
            Some(v) => format!("{} ({})", r.model, v),
            None => r.model.clone(),
        };
        let index = match totals.iter().position(|(k, _)| *k == key) {
            Some(index) => index,
            None => {
                totals.push((key, [0; 3]));
                totals.len() - 1
            }
        };
        let sums = &mut totals[index].1;
        sums[0] += r.input_tokens;
        sums[1] += r.output_tokens;
        sums[2] += r.total_tokens;
    }
    for (model, [input, output, total]) in &totals {
        let _ = writeln!(
            out,
            "[{}]\n- Input tokens: {}\n- Output tokens: {}\n- Total: {}\n",
            model, input, output, total
        );
    }
    let _ = writeln!(out, "Generations: {}", results.generations.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComparativeReport, ComparativeScores, GenerationTask, ManualResponse, Provider, SideAnalysis,
        SidePair, TokenUsage, Verdict, Verdicts, Version, Winner,
    };
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 0).unwrap()
    }

    fn model_job() -> EvaluationJob {
        EvaluationJob {
            title: "Refund: policy/FAQ check".into(),
            question_id: Some("Q-17".into()),
            prompt: PromptSpec::Single {
                version: Some("v1".into()),
                system_prompt: Some("You are support.".into()),
            },
            user_message: "Can I get a refund?".into(),
            providers: vec![Provider::Gpt],
            repeat_count: 2,
        }
    }

    fn generation(repeat_index: u32, version: Option<Version>) -> GenerationResult {
        let task = GenerationTask {
            provider: Provider::Gpt,
            repeat_index,
            version,
        };
        let usage = TokenUsage {
            input: 10,
            output: 20,
            total: 30,
        };
        GenerationResult::success(&task, "GPT-5", "Yes, within 30 days.".into(), usage, 1500)
    }

    #[test]
    fn test_safe_names() {
        assert_eq!(safe_title("Refund: policy/FAQ check"), "Refund_ policy_");
        assert_eq!(safe_title("짧은 제목"), "짧은 제목");
        assert_eq!(safe_model_name("Claude 4.5 Sonnet"), "Claude_4_5_Sonnet");
        assert_eq!(safe_model_name("gemini-2.5-pro"), "gemini-2_5-pro");
    }

    #[test]
    fn test_save_model_eval_layout() {
        let dir = TempDir::new().unwrap();
        let store = FileReportStore::new(dir.path()).with_judge("Claude 4.5 Sonnet", JudgeId::Claude);
        let results = JobResults {
            generations: vec![generation(1, None), generation(2, None)],
            verdicts: Verdicts {
                consistency: vec![ConsistencyVerdict {
                    target_model: "GPT-5".into(),
                    judge_model: "Claude 4.5 Sonnet".into(),
                    analysis: "Same policy both times.".into(),
                    score: 9,
                    verdict: Verdict::Pass,
                }],
                ..Verdicts::default()
            },
        };

        let folder = store.save_at(&model_job(), &results, fixed_time()).unwrap();
        assert_eq!(folder, dir.path().join("model_eval").join("20250309_1405_Refund_ policy_"));

        for name in [
            "20250309_1405_Input.md",
            "20250309_1405_01_GPT-5.md",
            "20250309_1405_02_GPT-5.md",
            "analysis_claude.md",
            "20250309_1405_Summary.txt",
        ] {
            assert!(folder.join(name).exists(), "missing {}", name);
        }
        assert!(!folder.join("performance_claude.json").exists());

        let input = fs::read_to_string(folder.join("20250309_1405_Input.md")).unwrap();
        assert!(input.contains("## System prompt (v1)\nYou are support."));
        assert!(input.contains("**Question ID**: Q-17"));

        let generation_file = fs::read_to_string(folder.join("20250309_1405_01_GPT-5.md")).unwrap();
        assert!(generation_file.contains("- **Latency**: 1.50s"));

        let summary = fs::read_to_string(folder.join("20250309_1405_Summary.txt")).unwrap();
        assert!(summary.contains("=== Consistency ==="));
        assert!(summary.contains("[GPT-5]\n- Input tokens: 20\n- Output tokens: 40\n- Total: 60"));
        assert!(summary.contains("Generations: 2"));
    }

    #[test]
    fn test_save_manual_comparison_writes_json() {
        let dir = TempDir::new().unwrap();
        let store = FileReportStore::new(dir.path()).with_judge("GPT-5", JudgeId::Gpt);
        let job = EvaluationJob {
            title: "Manual".into(),
            question_id: None,
            prompt: PromptSpec::Manual {
                common_env: Some("Robotics SME".into()),
                service_type: "consulting_tech".into(),
                a: ManualResponse {
                    content: "A".into(),
                    env: "plain".into(),
                },
                b: ManualResponse {
                    content: "B".into(),
                    env: "RAG".into(),
                },
            },
            user_message: "What next?".into(),
            providers: vec![],
            repeat_count: 1,
        };
        let verdict = ComparativeVerdict {
            target_model: "Manual Comparison".into(),
            judge_model: "GPT-5".into(),
            report: ComparativeReport {
                winner: Winner::B,
                win_factor: "Grounded in context".into(),
                scores: ComparativeScores {
                    by_key: BTreeMap::new(),
                    details: vec![],
                    total: SidePair { a: 70.0, b: 88.0 },
                },
                analysis: SideAnalysis::default(),
                suggestion: "Cite the profile.".into(),
            },
        };
        let results = JobResults {
            generations: vec![
                GenerationResult::manual("Manual Input A", Version::A, "A".into()),
                GenerationResult::manual("Manual Input B", Version::B, "B".into()),
            ],
            verdicts: Verdicts {
                comparative: vec![verdict],
                ..Verdicts::default()
            },
        };

        let folder = store.save_at(&job, &results, fixed_time()).unwrap();
        assert!(folder.starts_with(dir.path().join("manual_eval")));
        assert!(folder.join("20250309_1405_01_A_Manual_Input_A.md").exists());
        assert!(folder.join("20250309_1405_01_B_Manual_Input_B.md").exists());

        let json = fs::read_to_string(folder.join("comparative_gpt.json")).unwrap();
        let parsed: Vec<ComparativeVerdict> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].report.winner, Winner::B);

        let report = fs::read_to_string(folder.join("comparative_gpt.md")).unwrap();
        assert!(report.contains("| **Total (100)** | **70** | **88** |"));

        let input = fs::read_to_string(folder.join("20250309_1405_Input.md")).unwrap();
        assert!(input.contains("## Common test environment\nRobotics SME"));
        assert!(input.contains("- Manual Input A"));
    }

    #[test]
    fn test_save_reports_unwritable_root() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = FileReportStore::new(&blocker);
        let results = JobResults {
            generations: vec![],
            verdicts: Verdicts::default(),
        };
        let err = store.save(&model_job(), &results).unwrap_err();
        assert!(err.to_string().contains("Failed to create report directory"));
    }
}
