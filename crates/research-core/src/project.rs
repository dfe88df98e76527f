//! Entry point for callers: one handle per project root.
//!
//! `Project` loads `.research/config.yaml` once and hands out component
//! handles bound to the same root and configuration.

use crate::archive::ArchiveManager;
use crate::config::{Config, WarnLevel};
use crate::decision::DecisionLog;
use crate::dual_tree::DualTreeManager;
use crate::error::Result;
use crate::generator::ArtifactGenerator;
use crate::io;
use crate::migration::MigrationEngine;
use crate::paths;
use crate::session::{self, SessionRecord};
use crate::state::{ProjectState, StateStore};
use crate::types::BaselineCategory;
use std::path::{Path, PathBuf};

/// Directories every initialized project has.
fn layout(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = BaselineCategory::all()
        .iter()
        .map(|c| paths::baseline_dir(root, *c))
        .collect();
    dirs.push(paths::current_dir(root));
    dirs.push(paths::archive_dir(root));
    dirs.push(paths::sessions_dir(root));
    dirs
}

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: Config,
}

impl Project {
    /// Open an existing or uninitialized project. Fails only on a malformed config.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Config::load(&root)?;
        for w in config.validate() {
            match w.level {
                WarnLevel::Error => tracing::error!(message = %w.message, "config"),
                WarnLevel::Warning => tracing::warn!(message = %w.message, "config"),
            }
        }
        Ok(Self { root, config })
    }

    /// Create the directory layout and the initial state document.
    pub fn init(
        root: impl Into<PathBuf>,
        project_id: &str,
        research_question: &str,
        paradigm: &str,
    ) -> Result<(Self, ProjectState)> {
        let project = Self::open(root)?;
        for dir in layout(&project.root) {
            io::ensure_dir(&dir)?;
        }
        let state = project
            .state()
            .initialize(project_id, research_question, paradigm)?;
        Ok((project, state))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        paths::state_path(&self.root).exists()
    }

    pub fn state(&self) -> StateStore {
        StateStore::new(&self.root, self.config.sessions.max_summaries)
    }

    pub fn decisions(&self) -> DecisionLog {
        DecisionLog::new(&self.root)
    }

    pub fn dual_tree(&self) -> DualTreeManager {
        DualTreeManager::new(&self.root)
    }

    pub fn archives(&self) -> ArchiveManager {
        ArchiveManager::new(&self.root, self.config.stages.clone())
    }

    pub fn artifacts(&self) -> ArtifactGenerator {
        ArtifactGenerator::new(&self.root)
    }

    pub fn migrations(&self) -> MigrationEngine {
        MigrationEngine::new(&self.root)
    }

    pub fn sessions(&self) -> Result<Vec<SessionRecord>> {
        session::list_sessions(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Stage;
    use tempfile::TempDir;

    #[test]
    fn init_creates_layout_and_state() {
        let dir = TempDir::new().unwrap();
        let (project, state) =
            Project::init(dir.path(), "sleep-study", "Does sleep affect recall?", "positivist")
                .unwrap();
        assert_eq!(state.current_stage, Stage::Foundation);
        assert!(project.is_initialized());
        for d in layout(dir.path()) {
            assert!(d.is_dir(), "missing {}", d.display());
        }
        assert!(project.migrations().detect_version().is_current());
        assert!(!project.dual_tree().has_unsaved_changes());
    }

    #[test]
    fn init_twice_conflicts() {
        let dir = TempDir::new().unwrap();
        Project::init(dir.path(), "p", "q", "x").unwrap();
        let err = Project::init(dir.path(), "p", "q", "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn config_flows_into_components() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".research")).unwrap();
        std::fs::write(
            dir.path().join(".research/config.yaml"),
            "sessions:\n  max_summaries: 2\n",
        )
        .unwrap();
        let (project, _) = Project::init(dir.path(), "p", "q", "x").unwrap();
        assert_eq!(project.config().sessions.max_summaries, 2);

        let store = project.state();
        for i in 0..4 {
            store.record_session(&format!("s{i}"), "work").unwrap();
        }
        let summaries = store.load().session_summaries;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].session_id, "s2");
    }

    #[test]
    fn malformed_config_is_invalid() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".research")).unwrap();
        std::fs::write(dir.path().join(".research/config.yaml"), "sessions: [").unwrap();
        let err = Project::open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}
