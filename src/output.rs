use crate::events::JobEvent;
use crate::models::{ComparativeVerdict, ConsistencyVerdict, GenerationResult, PerformanceVerdict};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::sync::mpsc;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    /// One JSON event per line, identical to the HTTP stream
    Json,
}

/// Write a single job event to `out` in the requested format
pub fn write_event<W: Write>(out: &mut W, event: &JobEvent, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Plain => render_plain(event),
        OutputFormat::Json => event.to_ndjson().context("Error serializing event to JSON")?,
    };
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .context("Failed to write event")
}

/// Write every event of a job stream as it arrives.
/// Returns true when the stream ended with an error event.
pub async fn write_events<W: Write>(
    out: &mut W,
    mut events: mpsc::Receiver<JobEvent>,
    format: OutputFormat,
) -> Result<bool> {
    let mut failed = false;
    while let Some(event) = events.recv().await {
        write_event(out, &event, format)?;
        failed |= matches!(event, JobEvent::Error(_));
    }
    Ok(failed)
}

fn render_plain(event: &JobEvent) -> String {
    let mut out = String::new();
    match event {
        JobEvent::GenerationAll(results) => {
            out.push_str("📝 GENERATIONS\n");
            out.push_str("--------------\n");
            for result in results {
                out.push_str(&generation_line(result));
            }
        }
        JobEvent::ConsistencyUpdate(verdicts) => {
            for verdict in verdicts {
                out.push_str(&consistency_line(verdict));
            }
        }
        JobEvent::PerformanceUpdate(verdict) => out.push_str(&performance_line(verdict)),
        JobEvent::ComparativeUpdate(verdict) => out.push_str(&comparative_line(verdict)),
        JobEvent::Done { saved_path } => {
            out.push_str(&format!("✅ Report saved to {}\n", saved_path));
        }
        JobEvent::Error(message) => out.push_str(&format!("❌ {}\n", message)),
    }
    out
}

fn generation_line(result: &GenerationResult) -> String {
    let side = result
        .version
        .map(|v| format!(" [{}]", v))
        .unwrap_or_default();
    match &result.error {
        Some(error) => format!(
            "#{} {}{}: FAILED ({})\n",
            result.repeat_index, result.model, side, error
        ),
        None => format!(
            "#{} {}{}: {} tokens, {} ms\n{}\n\n",
            result.repeat_index,
            result.model,
            side,
            result.total_tokens,
            result.latency_ms,
            result.response.trim()
        ),
    }
}

fn consistency_line(verdict: &ConsistencyVerdict) -> String {
    format!(
        "🔁 Consistency {} by {}: {}/10 {:?}\n",
        verdict.target_model, verdict.judge_model, verdict.score, verdict.verdict
    )
}

fn performance_line(verdict: &PerformanceVerdict) -> String {
    let summary = &verdict.report.final_summary;
    format!(
        "📊 Performance {} by {}: avg {:.1}, grade {:?}, {} passed, std dev {}\n",
        verdict.report.test_metadata.model,
        verdict.judge_model,
        summary.avg_score,
        summary.grade,
        summary.pass_count,
        summary.consistency_std_dev
    )
}

fn comparative_line(verdict: &ComparativeVerdict) -> String {
    let total = &verdict.report.scores.total;
    format!(
        "⚖️  Comparison {} by {}: winner {:?} (A {} / B {})\n",
        verdict.target_model, verdict.judge_model, verdict.report.winner, total.a, total.b
    )
}
