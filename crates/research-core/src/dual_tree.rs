//! Baselines vs. working changes.
//!
//! Baselines live under `.research/baselines/<category>/` and are only ever
//! written by creation, promotion or archive merge. Working documents live
//! under `.research/changes/current/`. Every document has a JSON sidecar
//! `<filename>.meta.json`; sidecars never count as documents.

use crate::error::{ResearchError, Result};
use crate::paths;
use crate::types::{BaselineCategory, DocumentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Sidecar metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<BaselineCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
}

impl DocumentMeta {
    pub fn baseline(category: BaselineCategory) -> Self {
        let now = Utc::now();
        Self {
            status: DocumentStatus::Stable,
            created_at: now,
            updated_at: now,
            category: Some(category),
            verified: None,
            promoted_from: None,
            promoted_at: None,
        }
    }

    pub fn change() -> Self {
        let now = Utc::now();
        Self {
            status: DocumentStatus::InProgress,
            created_at: now,
            updated_at: now,
            category: None,
            verified: Some(false),
            promoted_from: None,
            promoted_at: None,
        }
    }
}

pub fn write_meta(doc: &Path, meta: &DocumentMeta) -> Result<()> {
    let data = serde_json::to_string_pretty(meta)?;
    crate::io::atomic_write(&paths::sidecar_path(doc), data.as_bytes())
}

/// Sidecar for `doc`, or `None` if absent or unreadable.
pub fn read_meta(doc: &Path) -> Option<DocumentMeta> {
    let path = paths::sidecar_path(doc);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable sidecar");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Status summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DualTreeStatus {
    pub baselines: BTreeMap<BaselineCategory, usize>,
    pub total_baselines: usize,
    pub current_changes: usize,
    pub current_files: Vec<String>,
    pub has_unsaved_changes: bool,
}

// ---------------------------------------------------------------------------
// DualTreeManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DualTreeManager {
    root: PathBuf,
}

impl DualTreeManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn current_dir(&self) -> PathBuf {
        paths::current_dir(&self.root)
    }

    pub fn baseline_dir(&self, category: BaselineCategory) -> PathBuf {
        paths::baseline_dir(&self.root, category)
    }

    /// Write a new baseline document. Existing baselines are never overwritten here.
    pub fn create_baseline(
        &self,
        category: BaselineCategory,
        filename: &str,
        content: &str,
    ) -> Result<PathBuf> {
        paths::validate_filename(filename)?;
        let path = self.baseline_dir(category).join(filename);
        if path.exists() {
            return Err(ResearchError::BaselineExists(path));
        }
        crate::io::atomic_write(&path, content.as_bytes())?;
        write_meta(&path, &DocumentMeta::baseline(category))?;
        tracing::info!(category = %category, file = %filename, "created baseline");
        Ok(path)
    }

    /// Write (or replace) a working document.
    pub fn create_change(&self, filename: &str, content: &str) -> Result<PathBuf> {
        paths::validate_filename(filename)?;
        let path = self.current_dir().join(filename);
        crate::io::atomic_write(&path, content.as_bytes())?;
        let meta = match read_meta(&path) {
            Some(mut existing) => {
                existing.updated_at = Utc::now();
                existing
            }
            None => DocumentMeta::change(),
        };
        write_meta(&path, &meta)?;
        tracing::debug!(file = %filename, "wrote working change");
        Ok(path)
    }

    /// Copy a working document into baselines and retire the working copy.
    ///
    /// The working file and its sidecar move to
    /// `changes/archive/promoted/<YYYYMMDD-HHMMSS>/`.
    pub fn promote_to_baseline(
        &self,
        change_path: &Path,
        category: BaselineCategory,
    ) -> Result<PathBuf> {
        let change_path = if change_path.is_absolute() {
            change_path.to_path_buf()
        } else {
            self.current_dir().join(change_path)
        };
        if !change_path.is_file() {
            return Err(ResearchError::ChangeNotFound(change_path));
        }
        let filename = change_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ResearchError::InvalidFilename(change_path.display().to_string()))?;

        let content = std::fs::read_to_string(&change_path)?;
        let baseline = self.baseline_dir(category).join(&filename);
        let now = Utc::now();
        let created_at = read_meta(&baseline).map(|m| m.created_at).unwrap_or(now);
        crate::io::atomic_write(&baseline, content.as_bytes())?;
        write_meta(
            &baseline,
            &DocumentMeta {
                status: DocumentStatus::Stable,
                created_at,
                updated_at: now,
                category: Some(category),
                verified: None,
                promoted_from: Some(filename.clone()),
                promoted_at: Some(now),
            },
        )?;

        let stamp_dir = crate::io::first_free(
            &paths::promoted_dir(&self.root).join(now.format("%Y%m%d-%H%M%S").to_string()),
            |dir| {
                let retired = dir.join(&filename);
                retired.exists() || paths::sidecar_path(&retired).exists()
            },
        );
        std::fs::create_dir_all(&stamp_dir)?;
        std::fs::rename(&change_path, stamp_dir.join(&filename))?;
        let sidecar = paths::sidecar_path(&change_path);
        if sidecar.exists() {
            let moved = stamp_dir.join(&filename);
            std::fs::rename(&sidecar, paths::sidecar_path(&moved))?;
            if let Some(mut meta) = read_meta(&moved) {
                meta.status = DocumentStatus::Promoted;
                meta.promoted_at = Some(now);
                write_meta(&moved, &meta)?;
            }
        }

        tracing::info!(file = %filename, category = %category, "promoted change to baseline");
        Ok(baseline)
    }

    /// Baseline content followed by a delimited delta block.
    ///
    /// This is a textual append, not a merge: the result is returned, not
    /// written, and no attempt is made to reconcile overlapping edits.
    pub fn apply_delta(&self, baseline_path: &Path, delta_content: &str) -> Result<String> {
        if !baseline_path.is_file() {
            return Err(ResearchError::BaselineNotFound(baseline_path.to_path_buf()));
        }
        let base = std::fs::read_to_string(baseline_path)?;
        let stamp = Utc::now().to_rfc3339();
        let mut out = String::with_capacity(base.len() + delta_content.len() + 96);
        out.push_str(base.trim_end());
        out.push_str("\n\n---\n");
        out.push_str(&format!("<!-- DELTA START {stamp} -->\n"));
        out.push_str(delta_content.trim_end());
        out.push_str("\n<!-- DELTA END -->\n");
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn list_baselines(&self, category: BaselineCategory) -> Result<Vec<String>> {
        list_documents(&self.baseline_dir(category))
    }

    pub fn list_changes(&self) -> Result<Vec<String>> {
        list_documents(&self.current_dir())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.list_changes().map(|c| !c.is_empty()).unwrap_or(false)
    }

    pub fn get_status_summary(&self) -> Result<DualTreeStatus> {
        let mut status = DualTreeStatus::default();
        for &category in BaselineCategory::all() {
            let n = self.list_baselines(category)?.len();
            status.baselines.insert(category, n);
            status.total_baselines += n;
        }
        status.current_files = self.list_changes()?;
        status.current_changes = status.current_files.len();
        status.has_unsaved_changes = status.current_changes > 0;
        Ok(status)
    }
}

/// Non-sidecar files directly or transitively under `dir`, sorted.
pub fn list_documents(dir: &Path) -> Result<Vec<String>> {
    Ok(crate::io::list_files(dir)?
        .into_iter()
        .filter(|f| !f.ends_with(paths::SIDECAR_SUFFIX))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn create_baseline_writes_sidecar() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        let path = tree
            .create_baseline(BaselineCategory::Literature, "review.md", "# Review")
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Review");
        let meta = read_meta(&path).unwrap();
        assert_eq!(meta.status, DocumentStatus::Stable);
        assert_eq!(meta.category, Some(BaselineCategory::Literature));
    }

    #[test]
    fn create_baseline_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        tree.create_baseline(BaselineCategory::Framework, "tf.md", "v1")
            .unwrap();
        let err = tree
            .create_baseline(BaselineCategory::Framework, "tf.md", "v2")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn create_change_marks_in_progress() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        let path = tree.create_change("draft.md", "draft").unwrap();
        let meta = read_meta(&path).unwrap();
        assert_eq!(meta.status, DocumentStatus::InProgress);
        assert_eq!(meta.verified, Some(false));
        assert!(tree.has_unsaved_changes());
    }

    #[test]
    fn promote_moves_working_copy() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        let change = tree.create_change("methods.md", "mixed methods").unwrap();

        let baseline = tree
            .promote_to_baseline(&change, BaselineCategory::Methodology)
            .unwrap();
        assert_eq!(std::fs::read_to_string(&baseline).unwrap(), "mixed methods");
        assert_eq!(
            read_meta(&baseline).unwrap().promoted_from.as_deref(),
            Some("methods.md")
        );
        assert!(!change.exists());
        assert!(!paths::sidecar_path(&change).exists());
        assert!(!tree.has_unsaved_changes());

        let promoted = crate::io::list_files(&paths::promoted_dir(dir.path())).unwrap();
        assert_eq!(promoted.len(), 2);
        assert!(promoted.iter().any(|p| p.ends_with("/methods.md")));
    }

    #[test]
    fn repeated_promotion_keeps_every_retired_copy() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        tree.create_change("methods.md", "v1").unwrap();
        tree.promote_to_baseline(Path::new("methods.md"), BaselineCategory::Methodology)
            .unwrap();
        tree.create_change("methods.md", "v2").unwrap();
        let baseline = tree
            .promote_to_baseline(Path::new("methods.md"), BaselineCategory::Methodology)
            .unwrap();
        assert_eq!(std::fs::read_to_string(baseline).unwrap(), "v2");

        let promoted = paths::promoted_dir(dir.path());
        let retired: Vec<String> = crate::io::list_files(&promoted)
            .unwrap()
            .into_iter()
            .filter(|f| f.ends_with("/methods.md"))
            .collect();
        assert_eq!(retired.len(), 2, "retired copies: {retired:?}");
        let mut bodies: Vec<String> = retired
            .iter()
            .map(|f| std::fs::read_to_string(promoted.join(f)).unwrap())
            .collect();
        bodies.sort();
        assert_eq!(bodies, vec!["v1", "v2"]);
    }

    #[test]
    fn promote_missing_change_is_not_found() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        let err = tree
            .promote_to_baseline(Path::new("ghost.md"), BaselineCategory::Literature)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn apply_delta_appends_delimited_block() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        let path = tree
            .create_baseline(BaselineCategory::Literature, "lit.md", "base text\n")
            .unwrap();
        let out = tree.apply_delta(&path, "new finding").unwrap();
        assert!(out.starts_with("base text\n\n---\n<!-- DELTA START "));
        assert!(out.contains("new finding\n<!-- DELTA END -->"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "base text\n");
    }

    #[test]
    fn status_summary_excludes_sidecars() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        tree.create_baseline(BaselineCategory::Literature, "a.md", "a")
            .unwrap();
        tree.create_baseline(BaselineCategory::Literature, "b.md", "b")
            .unwrap();
        tree.create_change("c.md", "c").unwrap();

        let status = tree.get_status_summary().unwrap();
        assert_eq!(status.baselines[&BaselineCategory::Literature], 2);
        assert_eq!(status.baselines[&BaselineCategory::Framework], 0);
        assert_eq!(status.total_baselines, 2);
        assert_eq!(status.current_files, vec!["c.md"]);
        assert!(status.has_unsaved_changes);
    }

    #[test]
    fn invalid_filename_rejected() {
        let dir = TempDir::new().unwrap();
        let tree = DualTreeManager::new(dir.path());
        let err = tree.create_change("../escape.md", "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}
