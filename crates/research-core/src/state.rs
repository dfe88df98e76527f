//! Project state: a single YAML document under `.research/project-state.yaml`.
//!
//! Reads degrade gracefully (absent or corrupt file yields the default
//! state) so an interactive workflow keeps working after partial damage.
//! Writes are locked, atomic, and never lower the stored schema version.

use crate::error::{ResearchError, Result};
use crate::lock::ProjectLock;
use crate::migration::{compare_versions, version_string, CURRENT_VERSION, OLDEST_VERSION};
use crate::paths;
use crate::types::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// SessionSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// ProjectState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub research_question: String,
    #[serde(default)]
    pub paradigm: String,
    #[serde(default)]
    pub current_stage: Stage,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default = "stored_version_default",
        deserialize_with = "deserialize_version"
    )]
    pub schema_version: String,
    #[serde(default)]
    pub session_summaries: Vec<SessionSummary>,
    /// Keys this version does not model, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_schema_version() -> String {
    CURRENT_VERSION.to_string()
}

/// A stored document without a version predates versioning, so it is the
/// oldest layout. Only new states start at the current version.
fn stored_version_default() -> String {
    OLDEST_VERSION.to_string()
}

// Older layouts wrote the version as a bare YAML number (`schema_version: 6.8`).
fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(stored_version_default());
    }
    version_string(&value)
        .ok_or_else(|| serde::de::Error::custom("schema_version must be a string or number"))
}

impl Default for ProjectState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            project_id: String::new(),
            research_question: String::new(),
            paradigm: String::new(),
            current_stage: Stage::Foundation,
            created_at: now,
            updated_at: now,
            schema_version: default_schema_version(),
            session_summaries: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl ProjectState {
    pub fn new(
        project_id: impl Into<String>,
        research_question: impl Into<String>,
        paradigm: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            research_question: research_question.into(),
            paradigm: paradigm.into(),
            ..Self::default()
        }
    }

    /// Push a summary, keeping only the most recent `limit`.
    pub fn push_session_summary(&mut self, summary: SessionSummary, limit: usize) {
        self.session_summaries.push(summary);
        if self.session_summaries.len() > limit {
            let excess = self.session_summaries.len() - limit;
            self.session_summaries.drain(..excess);
        }
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    max_summaries: usize,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>, max_summaries: usize) -> Self {
        Self {
            root: root.into(),
            max_summaries,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        paths::state_path(&self.root)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current state, or the default state when the file is absent or unreadable.
    pub fn load(&self) -> ProjectState {
        match self.load_strict() {
            Ok(Some(state)) => state,
            Ok(None) => ProjectState::default(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path().display(),
                    error = %e,
                    "project state unreadable, using default state"
                );
                ProjectState::default()
            }
        }
    }

    /// `Ok(None)` when absent; `Corrupt` when present but unparseable.
    pub fn load_strict(&self) -> Result<Option<ProjectState>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        let state: ProjectState =
            serde_yaml::from_str(&data).map_err(|e| ResearchError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(state))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn save(&self, state: &ProjectState) -> Result<()> {
        let _lock = ProjectLock::acquire(&self.root)?;
        self.save_unlocked(state)
    }

    fn save_unlocked(&self, state: &ProjectState) -> Result<()> {
        self.check_version_monotonic(&state.schema_version)?;
        let data = serde_yaml::to_string(state)?;
        crate::io::atomic_write(&self.path(), data.as_bytes())?;
        tracing::debug!(path = %self.path().display(), "saved project state");
        Ok(())
    }

    fn check_version_monotonic(&self, attempted: &str) -> Result<()> {
        let path = self.path();
        if !path.exists() {
            return Ok(());
        }
        let Ok(data) = std::fs::read_to_string(&path) else {
            return Ok(());
        };
        let Ok(doc) = serde_yaml::from_str::<Value>(&data) else {
            return Ok(());
        };
        let Some(current) = doc.get("schema_version").and_then(version_string) else {
            return Ok(());
        };
        if compare_versions(attempted, &current) == Some(Ordering::Less) {
            return Err(ResearchError::VersionRegression {
                current,
                attempted: attempted.to_string(),
            });
        }
        Ok(())
    }

    /// Deep-merge `patch` into the stored state and refresh `updated_at`.
    ///
    /// Returns `Ok(false)` without creating anything when no state file exists.
    pub fn update(&self, patch: &Mapping) -> Result<bool> {
        let _lock = ProjectLock::acquire(&self.root)?;
        let Some(existing) = self.load_strict()? else {
            tracing::warn!(path = %self.path().display(), "update skipped: no project state");
            return Ok(false);
        };

        let mut merged = serde_yaml::to_value(&existing)?;
        deep_merge(&mut merged, &Value::Mapping(patch.clone()));
        let mut state: ProjectState =
            serde_yaml::from_value(merged).map_err(|e| ResearchError::InvalidField {
                field: "patch".to_string(),
                reason: e.to_string(),
            })?;
        state.updated_at = Utc::now();
        self.save_unlocked(&state)?;
        Ok(true)
    }

    /// Create the state document for a new project.
    pub fn initialize(
        &self,
        project_id: &str,
        research_question: &str,
        paradigm: &str,
    ) -> Result<ProjectState> {
        let _lock = ProjectLock::acquire(&self.root)?;
        if self.exists() {
            return Err(ResearchError::AlreadyInitialized(self.root.clone()));
        }
        let state = ProjectState::new(project_id, research_question, paradigm);
        self.save_unlocked(&state)?;
        tracing::info!(project = %project_id, "initialized project state");
        Ok(state)
    }

    /// Append a session summary, trimming to the configured limit.
    pub fn record_session(&self, session_id: &str, summary: &str) -> Result<bool> {
        let _lock = ProjectLock::acquire(&self.root)?;
        let Some(mut state) = self.load_strict()? else {
            return Ok(false);
        };
        state.push_session_summary(
            SessionSummary {
                session_id: session_id.to_string(),
                timestamp: Utc::now(),
                summary: summary.to_string(),
            },
            self.max_summaries,
        );
        self.save_unlocked(&state)?;
        Ok(true)
    }

    /// Move to the next stage. `Ok(None)` if already at the final stage.
    pub fn advance_stage(&self) -> Result<Option<Stage>> {
        let _lock = ProjectLock::acquire(&self.root)?;
        let Some(mut state) = self.load_strict()? else {
            return Ok(None);
        };
        let Some(next) = state.current_stage.next() else {
            return Ok(None);
        };
        tracing::info!(from = %state.current_stage, to = %next, "advancing stage");
        state.current_stage = next;
        state.updated_at = Utc::now();
        self.save_unlocked(&state)?;
        Ok(Some(next))
    }
}

// ---------------------------------------------------------------------------
// Merge helper
// ---------------------------------------------------------------------------

/// Recursively merge `patch` into `base`. Mappings merge key by key; any
/// other value in `patch` replaces the one in `base`.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Mapping(base_map), Value::Mapping(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, patch_val),
                    None => {
                        base_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path(), 3)
    }

    fn patch(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = TempDir::new().unwrap();
        let state = store(&dir).load();
        assert_eq!(state.current_stage, Stage::Foundation);
        assert!(state.project_id.is_empty());
        assert!(!store(&dir).exists());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut state = ProjectState::new("p1", "Does X cause Y?", "quantitative");
        state.current_stage = Stage::Design;
        state
            .extra
            .insert("custom_note".to_string(), Value::String("kept".into()));
        store(&dir).save(&state).unwrap();

        let loaded = store(&dir).load();
        assert_eq!(loaded, state);
    }

    #[test]
    fn malformed_file_degrades_to_default() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".research")).unwrap();
        std::fs::write(
            dir.path().join(".research/project-state.yaml"),
            "current_stage: [unterminated",
        )
        .unwrap();

        let state = store(&dir).load();
        assert_eq!(state, ProjectState {
            created_at: state.created_at,
            updated_at: state.updated_at,
            ..ProjectState::default()
        });
        assert!(matches!(
            store(&dir).load_strict(),
            Err(ResearchError::Corrupt { .. })
        ));
    }

    #[test]
    fn update_without_state_returns_false() {
        let dir = TempDir::new().unwrap();
        let updated = store(&dir).update(&patch("paradigm: mixed")).unwrap();
        assert!(!updated);
        assert!(!store(&dir).exists());
    }

    #[test]
    fn update_deep_merges_and_bumps_timestamp() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let initial = s.initialize("p1", "Q?", "qualitative").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let updated = s
            .update(&patch("paradigm: mixed\nnotes:\n  lead: ana\n"))
            .unwrap();
        assert!(updated);

        let loaded = s.load();
        assert_eq!(loaded.paradigm, "mixed");
        assert_eq!(loaded.research_question, "Q?");
        assert!(loaded.updated_at > initial.updated_at);
        assert!(loaded.extra.contains_key("notes"));

        s.update(&patch("notes:\n  reviewer: bo\n")).unwrap();
        let notes = s.load().extra["notes"].clone();
        assert_eq!(notes.get("lead").and_then(Value::as_str), Some("ana"));
        assert_eq!(notes.get("reviewer").and_then(Value::as_str), Some("bo"));
    }

    #[test]
    fn update_rejects_unknown_stage() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.initialize("p1", "Q?", "qualitative").unwrap();
        let err = s.update(&patch("current_stage: publishing")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
        assert_eq!(s.load().current_stage, Stage::Foundation);
    }

    #[test]
    fn schema_version_never_decreases() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.initialize("p1", "Q?", "qualitative").unwrap();
        let mut state = s.load();
        state.schema_version = "6.8".to_string();
        assert!(matches!(
            s.save(&state),
            Err(ResearchError::VersionRegression { .. })
        ));
        assert!(s.update(&patch("schema_version: '6.8'")).is_err());
        assert_eq!(s.load().schema_version, CURRENT_VERSION);
    }

    #[test]
    fn unversioned_state_keeps_legacy_version_through_update() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".research")).unwrap();
        std::fs::write(
            dir.path().join(".research/project-state.yaml"),
            "project_id: legacy\nresearch_question: q\ncurrent_stage: B\n",
        )
        .unwrap();

        let s = store(&dir);
        assert_eq!(s.load().schema_version, OLDEST_VERSION);
        assert!(s.update(&patch("paradigm: mixed")).unwrap());
        assert_eq!(s.load().schema_version, OLDEST_VERSION);
        assert_eq!(s.load().paradigm, "mixed");
        assert!(crate::migration::MigrationEngine::new(dir.path()).needs_migration());
    }

    #[test]
    fn initialize_twice_conflicts() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.initialize("p1", "Q?", "qualitative").unwrap();
        let err = s.initialize("p1", "Q?", "qualitative").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn session_summaries_are_bounded() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.initialize("p1", "Q?", "qualitative").unwrap();
        for i in 1..=5 {
            s.record_session(&format!("s{i}"), &format!("summary {i}"))
                .unwrap();
        }
        let ids: Vec<String> = s
            .load()
            .session_summaries
            .into_iter()
            .map(|x| x.session_id)
            .collect();
        assert_eq!(ids, vec!["s3", "s4", "s5"]);
    }

    #[test]
    fn advance_stage_walks_sequence() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.initialize("p1", "Q?", "qualitative").unwrap();
        assert_eq!(s.advance_stage().unwrap(), Some(Stage::Evidence));
        assert_eq!(s.load().current_stage, Stage::Evidence);

        let mut state = s.load();
        state.current_stage = Stage::Communication;
        s.save(&state).unwrap();
        assert_eq!(s.advance_stage().unwrap(), None);
    }

    #[test]
    fn deep_merge_replaces_scalars_and_merges_maps() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let patch: Value = serde_yaml::from_str("a: 9\nb:\n  d: 4\ne: x\n").unwrap();
        deep_merge(&mut base, &patch);
        let expected: Value =
            serde_yaml::from_str("a: 9\nb:\n  c: 2\n  d: 4\ne: x\n").unwrap();
        assert_eq!(base, expected);
    }
}
