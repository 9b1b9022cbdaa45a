//! Extraction of typed verdicts from judge replies.
//!
//! Judges do not reliably honor formatting instructions, so nothing here
//! fails hard: consistency replies always produce a reading (with fail-safe
//! defaults) and JSON replies produce either a typed report or
//! [`ParseOutcome::Malformed`] carrying the raw text.

use crate::models::{
    ACCURACY_MAX, ADHERENCE_MAX, Breakdown, ComparativeReport, ComparativeScores, FinalSummary,
    Grade, LOGIC_MAX, PerformanceReport, READABILITY_MAX, SideAnalysis, SideNotes, SidePair,
    TestMetadata, TrialScore, Verdict, Winner,
};
use crate::rubric::Rubric;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Result of parsing a structured judge reply
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Ok(T),
    /// The reply held no usable object; carries the raw text
    Malformed(String),
}

/// Fields scraped from a free-text consistency reply
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReading {
    pub analysis: String,
    pub score: u8,
    pub verdict: Verdict,
}

const ANALYSIS_FALLBACK_CHARS: usize = 200;

// Labels start a line and tolerate list/heading markers, markdown emphasis
// and whitespace around the colon. Prose like "score 9" is not a label.
static SCORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*[#>-]*[ \t]*\**[ \t]*(?:점수|score)[ \t]*\**[ \t]*:[ \t*]*(\d+)")
        .expect("valid score regex")
});
static VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*[#>-]*[ \t]*\**[ \t]*(?:판정|verdict)[ \t]*\**[ \t]*:[ \t*]*(pass|fail)")
        .expect("valid verdict regex")
});
static ANALYSIS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*[#>-]*[ \t]*\**[ \t]*(?:분석|analysis)[ \t]*\**[ \t]*:[ \t*]*")
        .expect("valid analysis regex")
});
/// Where the analysis paragraph ends
static NEXT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*[#>-]*[ \t]*\**[ \t]*(?:점수|score|판정|verdict)[ \t]*\**[ \t]*:")
        .expect("valid label regex")
});

/// Scrape analysis/score/verdict from a consistency reply.
///
/// Missing score reads as 0, missing verdict as Fail, and a missing analysis
/// label falls back to the first 200 characters of the reply.
pub fn parse_consistency(raw: &str) -> ConsistencyReading {
    let score = SCORE
        .captures(raw)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .map(|score| score.min(10) as u8)
        .unwrap_or(0);

    let verdict = match VERDICT.captures(raw) {
        Some(caps) if caps[1].eq_ignore_ascii_case("pass") => Verdict::Pass,
        _ => Verdict::Fail,
    };

    let analysis = match ANALYSIS_LABEL.find(raw) {
        Some(label) => {
            let rest = &raw[label.end()..];
            let end = NEXT_LABEL.find(rest).map_or(rest.len(), |m| m.start());
            rest[..end].trim().to_string()
        }
        None => raw.chars().take(ANALYSIS_FALLBACK_CHARS).collect(),
    };

    ConsistencyReading {
        analysis,
        score,
        verdict,
    }
}

/// The substring between the first `{` and the last `}`, inclusive
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse the JSON object embedded in a judge reply
fn parse_json_object(raw: &str) -> Option<Map<String, Value>> {
    let candidate = match extract_json_object(raw) {
        Some(candidate) => candidate,
        None => {
            debug!("no JSON object found in judge reply");
            return None;
        }
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "judge reply held malformed JSON");
            None
        }
    }
}

/// Read a number that may arrive as a JSON number or numeric string
fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn count(value: Option<&Value>) -> u32 {
    number(value).max(0.0).round() as u32
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// A list of strings; a lone string becomes a one-element list
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| text(Some(item)))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn side_pair(value: &Value) -> Option<SidePair> {
    let object = value.as_object()?;
    Some(SidePair {
        a: number(object.get("A").or_else(|| object.get("a"))),
        b: number(object.get("B").or_else(|| object.get("b"))),
    })
}

fn clamp_to(value: f64, max: f64) -> f64 {
    value.clamp(0.0, max)
}

fn parse_trial(index: usize, value: &Value) -> TrialScore {
    let breakdown = value.get("breakdown");
    let field = |name: &str| number(breakdown.and_then(|b| b.get(name)));

    TrialScore {
        id: match value.get("id") {
            Some(id) => count(Some(id)),
            None => index as u32 + 1,
        },
        breakdown: Breakdown {
            accuracy: clamp_to(field("accuracy"), ACCURACY_MAX),
            adherence: clamp_to(field("adherence"), ADHERENCE_MAX),
            logic: clamp_to(field("logic"), LOGIC_MAX),
            readability: clamp_to(field("readability"), READABILITY_MAX),
        },
        total_score: clamp_to(number(value.get("total_score")), 100.0),
        reason: text(value.get("reason")),
    }
}

/// Parse a performance reply.
///
/// Sub-scores are clamped to their maxima and the average is recomputed as
/// the mean of per-trial totals; everything else is passed through.
pub fn parse_performance(raw: &str) -> ParseOutcome<PerformanceReport> {
    let Some(parsed) = parse_json_object(raw) else {
        return ParseOutcome::Malformed(raw.to_string());
    };
    let Some(trials) = parsed.get("results").and_then(Value::as_array) else {
        debug!("performance reply has no results array");
        return ParseOutcome::Malformed(raw.to_string());
    };

    let results: Vec<TrialScore> = trials
        .iter()
        .enumerate()
        .map(|(i, trial)| parse_trial(i, trial))
        .collect();

    let summary = parsed.get("final_summary");
    let summary_field = |name: &str| summary.and_then(|s| s.get(name));

    let avg_score = if results.is_empty() {
        number(summary_field("avg_score"))
    } else {
        results.iter().map(|r| r.total_score).sum::<f64>() / results.len() as f64
    };

    let grade = summary_field("grade")
        .and_then(Value::as_str)
        .and_then(Grade::parse)
        .unwrap_or_else(|| Grade::from_score(avg_score));

    let metadata = parsed.get("test_metadata");
    let report = PerformanceReport {
        test_metadata: TestMetadata {
            model: text(metadata.and_then(|m| m.get("model"))),
            total_trials: match metadata.and_then(|m| m.get("total_trials")) {
                Some(total) => count(Some(total)),
                None => results.len() as u32,
            },
        },
        final_summary: FinalSummary {
            avg_score,
            pass_count: count(summary_field("pass_count")),
            consistency_std_dev: text(summary_field("consistency_std_dev")),
            grade,
        },
        results,
    };

    ParseOutcome::Ok(report)
}

fn side_notes(value: Option<&Value>) -> SideNotes {
    SideNotes {
        strengths: string_list(value.and_then(|v| v.get("strengths"))),
        weaknesses: string_list(value.and_then(|v| v.get("weaknesses"))),
    }
}

/// Parse a head-to-head reply against `rubric`.
///
/// The judge's winner and totals are taken as given; `details` pairs each
/// rubric criterion with whatever the judge scored for its key.
pub fn parse_comparative(raw: &str, rubric: &Rubric) -> ParseOutcome<ComparativeReport> {
    let Some(parsed) = parse_json_object(raw) else {
        return ParseOutcome::Malformed(raw.to_string());
    };
    let Some(winner) = parsed.get("winner").and_then(Value::as_str).and_then(Winner::parse) else {
        debug!("comparative reply has no recognizable winner");
        return ParseOutcome::Malformed(raw.to_string());
    };

    let mut by_key = BTreeMap::new();
    let mut total = SidePair::default();
    if let Some(scores) = parsed.get("scores").and_then(Value::as_object) {
        for (key, value) in scores {
            let Some(pair) = side_pair(value) else {
                continue;
            };
            if key == "total" {
                total = pair;
            } else if key != "details" {
                by_key.insert(key.clone(), pair);
            }
        }
    }

    let analysis = parsed.get("analysis");
    let report = ComparativeReport {
        winner,
        win_factor: text(parsed.get("winFactor")),
        scores: ComparativeScores {
            details: rubric.details(&by_key),
            by_key,
            total,
        },
        analysis: SideAnalysis {
            a: side_notes(analysis.and_then(|a| a.get("A"))),
            b: side_notes(analysis.and_then(|a| a.get("B"))),
        },
        suggestion: text(parsed.get("suggestion")),
    };

    ParseOutcome::Ok(report)
}
