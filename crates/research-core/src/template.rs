//! Placeholder rendering for artifact templates.
//!
//! Templates contain `{{ key }}` or `{{ key.nested.path }}` placeholders that
//! resolve against a JSON context. Unresolved placeholders render empty;
//! required keys are checked before rendering by the generator.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").unwrap())
}

/// Resolve a dot path such as `decisions.CP_METHODOLOGY_APPROVAL`.
/// Numeric segments index into arrays.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = context;
    for segment in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// A key is present when it resolves to something other than null or an empty string.
pub fn is_present(context: &Value, path: &str) -> bool {
    match lookup(context, path) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Every required key that is not present, in declaration order.
pub fn missing_keys(context: &Value, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|k| !is_present(context, k))
        .cloned()
        .collect()
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(|i| format!("- {}", to_text(i)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => serde_json::to_string_pretty(value).unwrap_or_default(),
    }
}

pub fn render(template: &str, context: &Value) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup(context, &caps[1]).map(to_text).unwrap_or_default()
        })
        .into_owned()
}

/// Placeholder names used by `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(template) {
        let key = caps[1].to_string();
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Built-in skeletons
// ---------------------------------------------------------------------------

const RESEARCH_QUESTION: &str = "# Research Question\n\n{{ research_question }}\n\n## Paradigm\n\n{{ paradigm }}\n";

const LITERATURE_REVIEW: &str = "# Literature Review\n\nQuestion: {{ research_question }}\n\n## Search Strategy\n\n## Synthesis\n";

const THEORETICAL_FRAMEWORK: &str = "# Theoretical Framework\n\nParadigm: {{ paradigm }}\n\n## Constructs\n\n## Propositions\n";

const METHODOLOGY: &str = "# Methodology\n\nQuestion: {{ research_question }}\nParadigm: {{ paradigm }}\nApproach: {{ decisions.CP_METHODOLOGY_APPROVAL }}\n\n## Design\n\n## Sampling\n";

const DATA_COLLECTION_PLAN: &str = "# Data Collection Plan\n\nApproach: {{ decisions.CP_METHODOLOGY_APPROVAL }}\n\n## Instruments\n\n## Procedure\n";

const ANALYSIS_PLAN: &str = "# Analysis Plan\n\nQuestion: {{ research_question }}\n\n## Analytic Strategy\n\n## Robustness\n";

const QUALITY_REPORT: &str = "# Quality Report\n\nProject: {{ project_id }}\n\n## Checklist\n\n## Threats to Validity\n";

const MANUSCRIPT_OUTLINE: &str = "# Manuscript Outline\n\nWorking title: {{ project_id }}\n\n## Introduction\n\n## Methods\n\n## Results\n\n## Discussion\n";

pub fn builtin(name: &str) -> Option<&'static str> {
    let body = match name {
        "research_question" => RESEARCH_QUESTION,
        "literature_review" => LITERATURE_REVIEW,
        "theoretical_framework" => THEORETICAL_FRAMEWORK,
        "methodology" => METHODOLOGY,
        "data_collection_plan" => DATA_COLLECTION_PLAN,
        "analysis_plan" => ANALYSIS_PLAN,
        "quality_report" => QUALITY_REPORT,
        "manuscript_outline" => MANUSCRIPT_OUTLINE,
        _ => return None,
    };
    Some(body)
}
