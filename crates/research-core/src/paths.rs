use crate::error::{ResearchError, Result};
use crate::types::BaselineCategory;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RESEARCH_DIR: &str = ".research";
pub const BASELINES_DIR: &str = ".research/baselines";
pub const CHANGES_DIR: &str = ".research/changes";
pub const CURRENT_DIR: &str = ".research/changes/current";
pub const ARCHIVE_DIR: &str = ".research/changes/archive";
pub const PROMOTED_DIR: &str = ".research/changes/archive/promoted";
pub const SESSIONS_DIR: &str = ".research/sessions";
pub const TEMPLATES_DIR: &str = ".research/templates";

pub const STATE_FILE: &str = ".research/project-state.yaml";
pub const DECISION_LOG_FILE: &str = ".research/decision-log.yaml";
pub const CHECKPOINTS_FILE: &str = ".research/checkpoints.yaml";
pub const ARTIFACTS_FILE: &str = ".research/artifacts.yaml";
pub const CONFIG_FILE: &str = ".research/config.yaml";
pub const LOCK_FILE: &str = ".research/.lock";

pub const SUMMARY_MD: &str = "SUMMARY.md";
pub const ARCHIVE_DECISIONS_FILE: &str = "decisions.yaml";
pub const SIDECAR_SUFFIX: &str = ".meta.json";
pub const BACKUP_PREFIX: &str = ".research-backup-";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn research_dir(root: &Path) -> PathBuf {
    root.join(RESEARCH_DIR)
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn decision_log_path(root: &Path) -> PathBuf {
    root.join(DECISION_LOG_FILE)
}

pub fn checkpoints_path(root: &Path) -> PathBuf {
    root.join(CHECKPOINTS_FILE)
}

pub fn artifacts_path(root: &Path) -> PathBuf {
    root.join(ARTIFACTS_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn baselines_dir(root: &Path) -> PathBuf {
    root.join(BASELINES_DIR)
}

pub fn baseline_dir(root: &Path, category: BaselineCategory) -> PathBuf {
    baselines_dir(root).join(category.as_str())
}

pub fn current_dir(root: &Path) -> PathBuf {
    root.join(CURRENT_DIR)
}

pub fn archive_dir(root: &Path) -> PathBuf {
    root.join(ARCHIVE_DIR)
}

pub fn promoted_dir(root: &Path) -> PathBuf {
    root.join(PROMOTED_DIR)
}

pub fn sessions_dir(root: &Path) -> PathBuf {
    root.join(SESSIONS_DIR)
}

pub fn templates_dir(root: &Path) -> PathBuf {
    root.join(TEMPLATES_DIR)
}

/// Sidecar path for a document: `<dir>/<filename>.meta.json`.
pub fn sidecar_path(doc: &Path) -> PathBuf {
    let mut name = doc
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    doc.with_file_name(name)
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(SIDECAR_SUFFIX))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Filename validation
// ---------------------------------------------------------------------------

/// Reject filenames that could escape their directory.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.contains('\0')
    {
        return Err(ResearchError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            state_path(root),
            PathBuf::from("/tmp/proj/.research/project-state.yaml")
        );
        assert_eq!(
            baseline_dir(root, BaselineCategory::Methodology),
            PathBuf::from("/tmp/proj/.research/baselines/methodology")
        );
        assert_eq!(
            current_dir(root),
            PathBuf::from("/tmp/proj/.research/changes/current")
        );
    }

    #[test]
    fn sidecar_naming() {
        let doc = Path::new("/tmp/proj/.research/changes/current/notes.md");
        let meta = sidecar_path(doc);
        assert_eq!(
            meta,
            PathBuf::from("/tmp/proj/.research/changes/current/notes.md.meta.json")
        );
        assert!(is_sidecar(&meta));
        assert!(!is_sidecar(doc));
    }

    #[test]
    fn invalid_filenames() {
        for name in ["", "../escape.md", "a/b.md", "a\\b.md", "nul\0.md"] {
            assert!(validate_filename(name).is_err(), "expected invalid: {name:?}");
        }
        validate_filename("research-question.md").unwrap();
    }
}
