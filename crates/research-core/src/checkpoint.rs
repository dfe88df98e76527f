//! Checkpoint definitions from `.research/checkpoints.yaml`.
//!
//! A checkpoint is a named decision gate tied to a stage and an agent. Older
//! layouts expressed triggers as bare strings (`trigger: "..."` or
//! `triggers: ["..."]`); [`normalize_triggers`] rewrites those into the
//! structured form the current schema reads.

use crate::error::{ResearchError, Result};
use crate::paths;
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// CheckpointLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointLevel {
    #[default]
    Required,
    Recommended,
    Optional,
}

impl fmt::Display for CheckpointLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointLevel::Required => "required",
            CheckpointLevel::Recommended => "recommended",
            CheckpointLevel::Optional => "optional",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Keyword { patterns: Vec<String> },
    StageEnter { stage: Stage },
    ArtifactGenerated { artifact: String },
}

// ---------------------------------------------------------------------------
// CheckpointDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDefinition {
    pub stage: Stage,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub level: CheckpointLevel,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointFile {
    #[serde(default)]
    pub checkpoints: BTreeMap<String, CheckpointDefinition>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse `checkpoints.yaml`. Absent file yields an empty map.
pub fn load_strict(root: &Path) -> Result<BTreeMap<String, CheckpointDefinition>> {
    let path = paths::checkpoints_path(root);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = std::fs::read_to_string(&path)?;
    if data.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let file: CheckpointFile = serde_yaml::from_str(&data).map_err(|e| ResearchError::Corrupt {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    Ok(file.checkpoints)
}

/// Like [`load_strict`] but an unreadable file reads as empty.
pub fn load(root: &Path) -> BTreeMap<String, CheckpointDefinition> {
    load_strict(root).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "checkpoint definitions unreadable, ignoring");
        BTreeMap::new()
    })
}

pub fn save(root: &Path, checkpoints: &BTreeMap<String, CheckpointDefinition>) -> Result<()> {
    let file = CheckpointFile {
        checkpoints: checkpoints.clone(),
    };
    let data = serde_yaml::to_string(&file)?;
    crate::io::atomic_write(&paths::checkpoints_path(root), data.as_bytes())
}

/// Ids of `required` checkpoints defined for `stage`, sorted.
pub fn required_for(root: &Path, stage: Stage) -> Vec<String> {
    load(root)
        .into_iter()
        .filter(|(_, def)| def.stage == stage && def.level == CheckpointLevel::Required)
        .map(|(id, _)| id)
        .collect()
}

// ---------------------------------------------------------------------------
// Legacy normalization
// ---------------------------------------------------------------------------

/// Rewrite legacy trigger representations in one checkpoint mapping.
///
/// - `trigger: "text"` becomes one keyword trigger.
/// - `keywords: [..]` becomes one keyword trigger.
/// - string items inside `triggers` are gathered into one keyword trigger;
///   structured items are kept as they are.
///
/// Returns true if the mapping changed.
pub fn normalize_triggers(def: &mut Mapping) -> bool {
    let mut patterns: Vec<String> = Vec::new();
    let mut structured: Vec<Value> = Vec::new();
    let mut changed = false;

    if let Some(v) = def.remove("trigger") {
        changed = true;
        collect_patterns(&v, &mut patterns);
    }
    if let Some(v) = def.remove("keywords") {
        changed = true;
        collect_patterns(&v, &mut patterns);
    }
    match def.remove("triggers") {
        Some(Value::Sequence(items)) => {
            for item in items {
                match item {
                    Value::String(s) => {
                        changed = true;
                        patterns.push(s);
                    }
                    Value::Mapping(_) => structured.push(item),
                    other => {
                        changed = true;
                        tracing::warn!(value = ?other, "dropping unrecognized trigger");
                    }
                }
            }
        }
        Some(Value::String(s)) => {
            changed = true;
            patterns.push(s);
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            changed = true;
            tracing::warn!(value = ?other, "dropping unrecognized triggers value");
        }
    }

    let mut triggers = Vec::new();
    if !patterns.is_empty() {
        let mut keyword = Mapping::new();
        keyword.insert("type".into(), "keyword".into());
        keyword.insert(
            "patterns".into(),
            Value::Sequence(patterns.into_iter().map(Value::String).collect()),
        );
        triggers.push(Value::Mapping(keyword));
    }
    triggers.extend(structured);
    def.insert("triggers".into(), Value::Sequence(triggers));
    changed
}

fn collect_patterns(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        ),
        Value::Sequence(items) => {
            for item in items {
                collect_patterns(item, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
