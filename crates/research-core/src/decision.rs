//! Append-only decision ledger stored in `.research/decision-log.yaml`.
//!
//! Entries are never mutated or removed. An amendment is a new entry whose
//! `amends` names the original. Ids are `dec-NNN`, computed from the highest
//! id on disk rather than a stored counter so hand edits cannot cause reuse.
//!
//! Appends add the new entry's text after the existing bytes, so earlier
//! entries keep their exact on-disk form (legacy stage letters, unknown keys).
//! When the layout does not allow a plain text append, the log is re-emitted
//! from its raw YAML values instead of the typed entries. Either way the file
//! is re-read and rewritten whole, which is O(n) per append.

use crate::error::{ResearchError, Result};
use crate::lock::ProjectLock;
use crate::paths;
use crate::types::Stage;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub checkpoint: String,
    pub stage: Stage,
    pub agent: String,
    pub selected: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub amends: Option<String>,
    #[serde(default)]
    pub metadata: DecisionMetadata,
}

/// Input to [`DecisionLog::add`]. Required fields are validated once, here.
#[derive(Debug, Clone, Default)]
pub struct NewDecision {
    pub checkpoint: String,
    pub stage: Option<Stage>,
    pub agent: String,
    pub selected: String,
    pub alternatives: Vec<String>,
    pub rationale: String,
    pub session_id: Option<String>,
    pub confirmed: bool,
}

impl NewDecision {
    pub fn new(
        checkpoint: impl Into<String>,
        stage: Stage,
        agent: impl Into<String>,
        selected: impl Into<String>,
    ) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            stage: Some(stage),
            agent: agent.into(),
            selected: selected.into(),
            confirmed: true,
            ..Self::default()
        }
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Every missing required field, not just the first.
    fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.checkpoint.trim().is_empty() {
            missing.push("checkpoint".to_string());
        }
        if self.stage.is_none() {
            missing.push("stage".to_string());
        }
        if self.agent.trim().is_empty() {
            missing.push("agent".to_string());
        }
        if self.selected.trim().is_empty() {
            missing.push("selected".to_string());
        }
        missing
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionFile {
    #[serde(default)]
    pub decisions: Vec<DecisionEntry>,
}

// ---------------------------------------------------------------------------
// Id helpers
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^dec-(\d+)$").unwrap())
}

pub fn parse_id(id: &str) -> Option<u64> {
    id_re().captures(id)?.get(1)?.as_str().parse().ok()
}

pub fn format_id(n: u64) -> String {
    format!("dec-{n:03}")
}

/// Timestamp order, ties broken by id number.
fn chronological(a: &DecisionEntry, b: &DecisionEntry) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| parse_id(&a.id).cmp(&parse_id(&b.id)))
}

fn next_id(entries: &[DecisionEntry]) -> Result<String> {
    let max = entries.iter().filter_map(|e| parse_id(&e.id)).max().unwrap_or(0);
    let next = max.checked_add(1).ok_or_else(|| ResearchError::InvalidField {
        field: "id".to_string(),
        reason: format!("{} is the largest representable decision id", format_id(max)),
    })?;
    Ok(format_id(next))
}

// ---------------------------------------------------------------------------
// DecisionLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DecisionLog {
    root: PathBuf,
}

impl DecisionLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> PathBuf {
        paths::decision_log_path(&self.root)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Parse the log. `Corrupt` when the file exists but cannot be read as a log.
    pub fn load_strict(&self) -> Result<Vec<DecisionEntry>> {
        read_log(&self.path())
    }

    /// All entries in file order. Absent or corrupt logs read as empty.
    pub fn entries(&self) -> Vec<DecisionEntry> {
        match self.load_strict() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    path = %self.path().display(),
                    error = %e,
                    "decision log unreadable, treating as empty"
                );
                Vec::new()
            }
        }
    }

    fn persist(&self, existing: usize, entry: &DecisionEntry) -> Result<()> {
        append_entry(&self.path(), existing, entry)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Validate and append a decision. Returns the new id.
    pub fn add(&self, decision: NewDecision) -> Result<String> {
        let missing = decision.missing_fields();
        if !missing.is_empty() {
            return Err(ResearchError::MissingFields(missing));
        }
        let Some(stage) = decision.stage else {
            return Err(ResearchError::MissingFields(vec!["stage".to_string()]));
        };

        let _lock = ProjectLock::acquire(&self.root)?;
        let entries = self.load_strict()?;
        let id = next_id(&entries)?;
        let entry = DecisionEntry {
            id: id.clone(),
            timestamp: Utc::now(),
            checkpoint: decision.checkpoint,
            stage,
            agent: decision.agent,
            selected: decision.selected,
            alternatives: decision.alternatives,
            rationale: decision.rationale,
            amends: None,
            metadata: DecisionMetadata {
                session_id: decision.session_id,
                confirmed: decision.confirmed,
            },
        };
        self.persist(entries.len(), &entry)?;
        tracing::info!(id = %id, "recorded decision");
        Ok(id)
    }

    /// Record a new entry superseding `id`. The original is left as-is.
    pub fn amend(&self, id: &str, new_selected: &str, new_rationale: &str) -> Result<String> {
        if new_selected.trim().is_empty() {
            return Err(ResearchError::MissingFields(vec!["selected".to_string()]));
        }

        let _lock = ProjectLock::acquire(&self.root)?;
        let entries = self.load_strict()?;
        let original = entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| ResearchError::DecisionNotFound(id.to_string()))?;

        let new_id = next_id(&entries)?;
        let entry = DecisionEntry {
            id: new_id.clone(),
            timestamp: Utc::now(),
            checkpoint: original.checkpoint,
            stage: original.stage,
            agent: original.agent,
            selected: new_selected.to_string(),
            alternatives: original.alternatives,
            rationale: new_rationale.to_string(),
            amends: Some(original.id),
            metadata: DecisionMetadata {
                session_id: original.metadata.session_id,
                confirmed: true,
            },
        };
        self.persist(entries.len(), &entry)?;
        tracing::info!(id = %new_id, amends = %id, "amended decision");
        Ok(new_id)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<DecisionEntry> {
        self.entries().into_iter().find(|e| e.id == id)
    }

    /// Re-read the file and confirm `id` was durably written.
    pub fn verify_persisted(&self, id: &str) -> bool {
        self.load_strict()
            .map(|entries| entries.iter().any(|e| e.id == id))
            .unwrap_or(false)
    }

    /// Entries for one checkpoint, oldest first.
    pub fn history_for_checkpoint(&self, checkpoint: &str) -> Vec<DecisionEntry> {
        let mut out: Vec<DecisionEntry> = self
            .entries()
            .into_iter()
            .filter(|e| e.checkpoint == checkpoint)
            .collect();
        out.sort_by(chronological);
        out
    }

    /// Most recent `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<DecisionEntry> {
        let mut out = self.entries();
        out.sort_by(|a, b| chronological(b, a));
        out.truncate(limit);
        out
    }

    /// Originals that at least one later entry amends, in log order.
    pub fn amended_entries(&self) -> Vec<DecisionEntry> {
        let entries = self.entries();
        let amended: std::collections::HashSet<&str> =
            entries.iter().filter_map(|e| e.amends.as_deref()).collect();
        entries
            .iter()
            .filter(|e| amended.contains(e.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn amendments_of(&self, id: &str) -> Vec<DecisionEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.amends.as_deref() == Some(id))
            .collect()
    }

    pub fn for_stage(&self, stage: Stage) -> Vec<DecisionEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.stage == stage)
            .collect()
    }

    /// The latest entry for a checkpoint, amendments included.
    pub fn effective_selection(&self, checkpoint: &str) -> Option<DecisionEntry> {
        self.history_for_checkpoint(checkpoint).pop()
    }

    pub fn has_checkpoint(&self, checkpoint: &str) -> bool {
        self.entries().iter().any(|e| e.checkpoint == checkpoint)
    }
}

// ---------------------------------------------------------------------------
// File helpers (shared with archive snapshots)
// ---------------------------------------------------------------------------

pub(crate) fn read_log(path: &Path) -> Result<Vec<DecisionEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: DecisionFile = serde_yaml::from_str(&data).map_err(|e| ResearchError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(file.decisions)
}

pub(crate) fn write_log(path: &Path, decisions: Vec<DecisionEntry>) -> Result<()> {
    let data = serde_yaml::to_string(&DecisionFile { decisions })?;
    crate::io::atomic_write(path, data.as_bytes())
}

/// Append `entry` to a log that currently holds `existing` parsed entries.
fn append_entry(path: &Path, existing: usize, entry: &DecisionEntry) -> Result<()> {
    let text = if path.exists() {
        std::fs::read_to_string(path)?
    } else {
        String::new()
    };
    if text.trim().is_empty() {
        return write_log(path, vec![entry.clone()]);
    }

    let item = serde_yaml::to_string(&[entry])?;
    if let Some(appended) = append_as_text(&text, &item) {
        if appended_cleanly(&appended, existing + 1, &entry.id) {
            return crate::io::atomic_write(path, appended.as_bytes());
        }
    }
    tracing::debug!(
        path = %path.display(),
        "decision log layout does not allow a text append, re-emitting raw entries"
    );
    append_as_value(path, &text, entry)
}

/// The log with `item` (a one-element YAML sequence) appended to the
/// `decisions` list. `None` unless `decisions:` is the last top-level key
/// and its items are in block style.
fn append_as_text(text: &str, item: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let key = lines.iter().position(|l| l.trim_end() == "decisions:")?;
    let rest = &lines[key + 1..];

    let first = rest
        .iter()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))?;
    let body = first.trim_start();
    if !(body.starts_with("- ") || body == "-") {
        return None;
    }
    let indent = first.len() - body.len();

    let another_key = rest.iter().any(|l| {
        !l.trim().is_empty() && !l.starts_with(' ') && !l.starts_with('-') && !l.starts_with('#')
    });
    if another_key {
        return None;
    }

    let pad = " ".repeat(indent);
    let mut out = text.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    for line in item.lines() {
        out.push_str(&pad);
        out.push_str(line);
        out.push('\n');
    }
    Some(out)
}

fn appended_cleanly(text: &str, expected: usize, id: &str) -> bool {
    match serde_yaml::from_str::<DecisionFile>(text) {
        Ok(file) => {
            file.decisions.len() == expected
                && file.decisions.last().is_some_and(|e| e.id == id)
        }
        Err(_) => false,
    }
}

/// Push `entry` onto the raw `decisions` sequence so existing entries keep
/// every key and value they were written with.
fn append_as_value(path: &Path, text: &str, entry: &DecisionEntry) -> Result<()> {
    let corrupt = |reason: String| ResearchError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let mut doc: serde_yaml::Mapping =
        serde_yaml::from_str(text).map_err(|e| corrupt(e.to_string()))?;
    let decisions = doc
        .entry("decisions".into())
        .or_insert_with(|| serde_yaml::Value::Sequence(Vec::new()));
    if decisions.is_null() {
        *decisions = serde_yaml::Value::Sequence(Vec::new());
    }
    let Some(items) = decisions.as_sequence_mut() else {
        return Err(corrupt("decisions is not a list".to_string()));
    };
    items.push(serde_yaml::to_value(entry)?);
    let data = serde_yaml::to_string(&doc)?;
    crate::io::atomic_write(path, data.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
