//! Judge prompt templates.

use crate::rubric::Rubric;
use std::fmt::Write;

/// What the two compared responses were produced from
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonContext {
    /// Same user query answered under two system prompts
    Prompts {
        system_a: String,
        system_b: String,
        user_query: String,
    },
    /// Two supplied answers to one question, with optional shared and per-side environments
    Service {
        common_env: Option<String>,
        env_a: String,
        env_b: String,
        user_query: String,
    },
}

pub fn consistency_prompt(reference: &str, compares: &[String]) -> String {
    let compare_text = compares
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Response {}]:\n{}", i + 2, r))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "### Role: Senior quality reviewer
### Task: Judge the semantic consistency of several LLM answers to the same question

Compare the [Reference Response] with every numbered response below and decide whether \
they carry the same information with the same logic.

[Reference Response (trial 1)]:
{reference}

{compare_text}

### Criteria
1. Information integrity (5 points): are all key facts and hard requirements of the \
reference present, and does nothing added blur its substance?
2. Format and constraints (3 points): are the requested layout (bullets, tables, JSON) \
and the length comparable?
3. Tone and logic (2 points): is the register consistent, and is nothing in conflict \
with the reference?

### Scoring
- 10: identical meaning and format, only sentence structure differs
- 8-9: all key information present, minor wording or added explanation
- 6-7: main information present, some details missing or format slightly off
- 4-5: part of the key information missing, or clearly different tone
- 1-3: distorted or contradicting information, or an entirely different format

### Output format (follow exactly)
Analysis: (common ground, differences and level of consistency in under 150 characters)
Score: (integer from 1 to 10)
Verdict: (Pass if every answer agrees on the essentials, otherwise Fail)
"
    )
}

pub fn performance_prompt(target: &str, responses: &[String]) -> String {
    let total = responses.len();
    let responses_text = responses
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Trial {}]:\n{}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "### Role: Hyper-critical AI model auditor
### Task: Strictly grade the {total} answers of [Target Model] below on a 100-point scale.

Award more than 80 only to answers without noticeable flaws and more than 95 only to \
flawless ones. Find and deduct for every small defect: typos, vague wording, padding.

[Target Model]: {target}

[Answers]:
{responses_text}

### 1. Rubric (100 points)
A. Accuracy (40): factual error or distortion -10 each; unmet hard requirement -10 each; \
important omission -10 each; vague statement -5 each.
B. Adherence (30): persona or tone ignored -5; required output format violated -10; \
required content missing -5 each; length constraint violated -3.
C. Logic (20): gap in step-by-step reasoning -5; internal contradiction -5; \
unsupported claim -3.
D. Readability (10): padding or repetition -2; poor word choice -2; awkward sentences -1.

### 2. Grades
S (90-100), A (80-89), B (70-79), C (50-69), F (below 50)

### 3. Output format (JSON only, no code fences)
{{
  \"test_metadata\": {{ \"model\": \"{target}\", \"total_trials\": {total} }},
  \"results\": [
    {{
      \"id\": 1,
      \"breakdown\": {{ \"accuracy\": 40, \"adherence\": 30, \"logic\": 20, \"readability\": 10 }},
      \"total_score\": 100,
      \"reason\": \"deductions with their causes\"
    }}
  ],
  \"final_summary\": {{
    \"avg_score\": 0.0,
    \"pass_count\": 0,
    \"consistency_std_dev\": \"0.0\",
    \"grade\": \"S\"
  }}
}}
"
    )
}

pub fn comparative_prompt(
    rubric: &Rubric,
    context: &ComparisonContext,
    response_a: &str,
    response_b: &str,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "### Role: {}", rubric.role);
    let _ = writeln!(
        prompt,
        "### Task: Compare responses A and B and decide which one is better.\n"
    );

    prompt.push_str("## 1. Context\n");
    match context {
        ComparisonContext::Prompts {
            system_a,
            system_b,
            user_query,
        } => {
            let _ = writeln!(prompt, "* System prompt A: {}", system_a);
            let _ = writeln!(prompt, "* System prompt B: {}", system_b);
            let _ = writeln!(prompt, "* User query: {}", user_query);
        }
        ComparisonContext::Service {
            common_env,
            env_a,
            env_b,
            user_query,
        } => {
            if let Some(env) = common_env.as_deref().filter(|e| !e.trim().is_empty()) {
                let _ = writeln!(prompt, "* Client profile (common environment):\n{}", env);
            }
            if !env_a.trim().is_empty() {
                let _ = writeln!(prompt, "* Environment of A:\n{}", env_a);
            }
            if !env_b.trim().is_empty() {
                let _ = writeln!(prompt, "* Environment of B:\n{}", env_b);
            }
            let _ = writeln!(prompt, "* User query:\n{}", user_query);
        }
    }

    prompt.push_str("\n## 2. Criteria (each response starts from the maximum and loses points per defect)\n");
    for c in &rubric.criteria {
        let _ = writeln!(prompt, "- {} (`{}`): {} points", c.label, c.key, c.max);
    }
    let _ = writeln!(prompt, "{}\n", rubric.guide);

    let score_lines = rubric
        .keys()
        .chain(["total"])
        .map(|key| format!("    \"{}\": {{ \"A\": 0, \"B\": 0 }}", key))
        .collect::<Vec<_>>()
        .join(",\n");

    let _ = write!(
        prompt,
        "## 3. Output format (JSON only)
{{
  \"winner\": \"A\" or \"B\" or \"Tie\",
  \"winFactor\": \"one-line summary of the deciding factor\",
  \"scores\": {{
{score_lines}
  }},
  \"analysis\": {{
    \"A\": {{ \"strengths\": [\"...\"], \"weaknesses\": [\"...\"] }},
    \"B\": {{ \"strengths\": [\"...\"], \"weaknesses\": [\"...\"] }}
  }},
  \"suggestion\": \"one-sentence improvement suggestion\"
}}

---
## Response A:
{response_a}

## Response B:
{response_b}
"
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{PROMPT_AB, Rubric};

    #[test]
    fn test_consistency_prompt_numbers_compares_from_two() {
        let prompt = consistency_prompt("ref", &["one".to_string(), "two".to_string()]);
        assert!(prompt.contains("[Response 2]:\none"));
        assert!(prompt.contains("[Response 3]:\ntwo"));
        assert!(prompt.contains("Score:"));
    }

    #[test]
    fn test_performance_prompt_mentions_trial_count() {
        let prompt = performance_prompt("GPT-5", &["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(prompt.contains("\"total_trials\": 3"));
        assert!(prompt.contains("[Trial 3]:\nc"));
    }

    #[test]
    fn test_comparative_prompt_requests_rubric_keys() {
        let context = ComparisonContext::Service {
            common_env: Some("Mid-size robotics firm".into()),
            env_a: String::new(),
            env_b: "RAG over internal wiki".into(),
            user_query: "How do we cut lead time?".into(),
        };
        let prompt = comparative_prompt(Rubric::for_service("project_space"), &context, "resp a", "resp b");

        assert!(prompt.starts_with("### Role: Technical project manager"));
        assert!(prompt.contains("\"actionability\": { \"A\": 0, \"B\": 0 }"));
        assert!(prompt.contains("\"total\": { \"A\": 0, \"B\": 0 }"));
        assert!(prompt.contains("Mid-size robotics firm"));
        assert!(!prompt.contains("Environment of A"));
        assert!(prompt.contains("Environment of B:\nRAG over internal wiki"));
    }

    #[test]
    fn test_comparative_prompt_for_prompt_versions() {
        let context = ComparisonContext::Prompts {
            system_a: "be formal".into(),
            system_b: "be casual".into(),
            user_query: "greet me".into(),
        };
        let prompt = comparative_prompt(&PROMPT_AB, &context, "Good day.", "Hey!");
        assert!(prompt.contains("System prompt A: be formal"));
        assert!(prompt.contains("Adherence (`adherence`): 45 points"));
        assert!(prompt.ends_with("## Response B:\nHey!\n"));
    }
}
