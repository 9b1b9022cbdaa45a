//! Weighted comparison rubrics.
//!
//! A rubric names the judge's role, the deduction guide shown to the judge,
//! and the criteria whose per-side scores the judge must return. Every
//! rubric's maxima sum to 100.

use crate::models::{ScoreDetail, SidePair};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criterion {
    /// Key the judge uses inside `scores`
    pub key: &'static str,
    pub label: &'static str,
    pub max: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Rubric {
    /// Service-type tag, or `prompt_ab` / `general`
    pub tag: &'static str,
    pub role: &'static str,
    pub guide: &'static str,
    pub criteria: [Criterion; 4],
}

pub const DEFAULT_SERVICE_TYPE: &str = "consulting_tech";

const fn criterion(key: &'static str, label: &'static str, max: u32) -> Criterion {
    Criterion { key, label, max }
}

/// Rubric for comparing the outputs of two system prompts
pub static PROMPT_AB: Rubric = Rubric {
    tag: "prompt_ab",
    role: "Hyper-critical prompt auditor",
    guide: "\
- Adherence: how exactly each response follows the persona, tone, output format and \
constraints of its own system prompt. Penalize even minor violations.
- Accuracy: factual grounding and completeness of the content.
- Logic: soundness of the reasoning and smoothness of the structure.
- Readability: layout and terminology that make the answer easy to consume.
Do not penalize missing citations or references unless the system prompt or the \
user query explicitly asked for them.",
    criteria: [
        criterion("adherence", "Adherence", 45),
        criterion("accuracy", "Accuracy", 20),
        criterion("logic", "Logic & Structure", 20),
        criterion("readability", "Readability", 15),
    ],
};

/// Fallback for unknown service-type tags
pub static GENERAL: Rubric = Rubric {
    tag: "general",
    role: "Business strategy consultant",
    guide: "Apply general consulting quality standards.",
    criteria: [
        criterion("accuracy", "Accuracy", 40),
        criterion("adherence", "Adherence", 30),
        criterion("logic", "Logic", 20),
        criterion("readability", "Readability", 10),
    ],
};

static SERVICE_RUBRICS: [Rubric; 5] = [
    Rubric {
        tag: "consulting_tech",
        role: "Leading authority in the field (principal consultant)",
        guide: "\
- Diagnosis: root cause misidentified or superficial (-10 each); generic advice \
without concrete actions (-5 each); inaccurate domain terminology or process (-5 each).
- Feasibility: impractical solution or logical leaps (-10); no consideration of \
risks or side effects (-5).
- Contextual fit: ignores the size, industry or constraints in the company \
profile (-5 each); ignores the supplied context and hallucinates (-10).
- Format: not a professional business report (-5).",
        criteria: [
            criterion("diagnosis", "Diagnosis & Prescription", 40),
            criterion("feasibility", "Feasibility & Logic", 30),
            criterion("contextual_fit", "Contextual Fit", 20),
            criterion("format", "Format", 10),
        ],
    },
    Rubric {
        tag: "expert_recommendation",
        role: "Domain expert matching coordinator",
        guide: "\
- Relevance: recommending an expert or company unrelated to the problem scores 0; \
expertise below requirements (-10 each).
- Justification: weak link between need and recommendation (-5); merely \
subjective praise (-5).
- Data usage: recommending people absent from the profile, knowledge base or \
search results (-20); missing the best candidate in the supplied data (-5).
- Completeness: missing contact, affiliation or career metadata (-2 each).",
        criteria: [
            criterion("relevance", "Relevance", 40),
            criterion("justification", "Justification", 30),
            criterion("data_usage", "Data Usage", 20),
            criterion("completeness", "Completeness", 10),
        ],
    },
    Rubric {
        tag: "venture_combination",
        role: "Open-innovation and collaboration coordinator",
        guide: "\
- Collaboration structure: vague collaboration model (-10); unclear roles and \
responsibilities (-5).
- Synergy: expected effect of the pairing not argued (-10); weak case for why \
they should collaborate (-5).
- Business viability: unrealistic from a market or revenue standpoint (-5).
- Clarity: not immediately understandable by both parties (-2).",
        criteria: [
            criterion("structure", "Collaboration Structure", 40),
            criterion("synergy", "Logic & Synergy", 30),
            criterion("viability", "Business Viability", 20),
            criterion("clarity", "Clarity", 10),
        ],
    },
    Rubric {
        tag: "work_support",
        role: "Chief of staff",
        guide: "\
- Organizational context: advice conflicting with mission, vision or KPIs (-10); \
instructions beyond the user's role or authority (-5).
- Internal knowledge: violates internal rules or processes in the common \
environment (-10); presents uncertain outside information as fact (-5).
- Task efficiency: abstract answer that cannot be used at work right away (-5).
- Tone: inappropriate register for internal communication (-2).",
        criteria: [
            criterion("org_context", "Organizational Context", 40),
            criterion("internal_knowledge", "Internal Knowledge", 30),
            criterion("efficiency", "Task Efficiency", 20),
            criterion("tone", "Tone", 10),
        ],
    },
    Rubric {
        tag: "project_space",
        role: "Technical project manager",
        guide: "\
- Project context: misreads the phase, schedule or open issues (-10); misses the \
content of attached material (-5).
- Actionability: no concrete next steps or action items (-10); no owners or \
deadlines proposed (-5).
- Risk management: fails to point out likely delays or problems (-5).
- Communication: summary too hard to share with the team (-2).",
        criteria: [
            criterion("project_context", "Project Context", 40),
            criterion("actionability", "Actionability", 30),
            criterion("risk", "Risk Management", 20),
            criterion("communication", "Communication", 10),
        ],
    },
];

impl Rubric {
    /// Rubric for a service-type tag; unknown tags fall back to [`GENERAL`]
    pub fn for_service(tag: &str) -> &'static Rubric {
        SERVICE_RUBRICS
            .iter()
            .find(|rubric| rubric.tag == tag.trim())
            .unwrap_or(&GENERAL)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.criteria.iter().map(|c| c.key)
    }

    /// Pair each declared criterion with the judge's scores; a criterion the
    /// judge left out scores 0 on both sides.
    pub fn details(&self, scores: &BTreeMap<String, SidePair>) -> Vec<ScoreDetail> {
        self.criteria
            .iter()
            .map(|c| ScoreDetail {
                key: c.key.to_string(),
                label: c.label.to_string(),
                max: c.max,
                score: scores.get(c.key).copied().unwrap_or_default(),
            })
            .collect()
    }
}
