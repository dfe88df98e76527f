//! Stage archives under `.research/changes/archive/{YYYY-MM-DD}-{stage}/`.
//!
//! Archiving validates first and touches nothing when the stage is
//! incomplete. The snapshot is assembled in a staging directory, renamed
//! into place, and only then is the working tree cleared.

use crate::checkpoint;
use crate::config::StageConfig;
use crate::decision::{self, DecisionEntry, DecisionLog};
use crate::dual_tree::{self, DocumentMeta};
use crate::error::{ResearchError, Result};
use crate::lock::ProjectLock;
use crate::paths;
use crate::state::StateStore;
use crate::types::{BaselineCategory, Stage};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub name: String,
    pub stage: Stage,
    pub date: NaiveDate,
    pub path: PathBuf,
    /// Copied working files, excluding sidecars and generated archive files.
    pub files: Vec<String>,
    pub decision_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub stage: Stage,
    pub archived_on: NaiveDate,
    pub archive: String,
    pub file_count: usize,
    pub decision_count: usize,
    pub next_stage: Option<Stage>,
}

static ARCHIVE_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn archive_name_re() -> &'static Regex {
    ARCHIVE_NAME_RE.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})-([a-z_]+)$").unwrap())
}

/// Split `2026-03-01-design` into its date and stage.
pub fn parse_archive_name(name: &str) -> Option<(NaiveDate, Stage)> {
    let caps = archive_name_re().captures(name)?;
    let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
    let stage = caps[2].parse::<Stage>().ok()?;
    Some((date, stage))
}

fn is_generated_file(rel: &str) -> bool {
    rel == paths::SUMMARY_MD || rel == paths::ARCHIVE_DECISIONS_FILE
}

// ---------------------------------------------------------------------------
// ArchiveManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArchiveManager {
    root: PathBuf,
    stages: StageConfig,
}

impl ArchiveManager {
    pub fn new(root: impl Into<PathBuf>, stages: StageConfig) -> Self {
        Self {
            root: root.into(),
            stages,
        }
    }

    fn decisions(&self) -> DecisionLog {
        DecisionLog::new(&self.root)
    }

    fn required_checkpoints(&self, stage: Stage) -> Vec<String> {
        let mut ids: Vec<String> = self.stages.checkpoints_for(stage).to_vec();
        for id in checkpoint::required_for(&self.root, stage) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check every completion requirement and report all that fail.
    pub fn validate_stage_completion(&self, stage: Stage) -> (bool, Vec<String>) {
        let mut missing = Vec::new();

        let state = StateStore::new(&self.root, usize::MAX).load();
        if state.current_stage != stage {
            missing.push(format!(
                "Current stage is {}, not {}",
                state.current_stage, stage
            ));
        }

        let current = paths::current_dir(&self.root);
        for artifact in self.stages.artifacts_for(stage) {
            if !current.join(artifact).is_file() {
                missing.push(format!("Required artifact: {artifact}"));
            }
        }

        let log = self.decisions();
        for cp in self.required_checkpoints(stage) {
            if !log.has_checkpoint(&cp) {
                missing.push(format!("Required checkpoint: {cp}"));
            }
        }

        (missing.is_empty(), missing)
    }

    // -----------------------------------------------------------------------
    // Archiving
    // -----------------------------------------------------------------------

    /// Snapshot the working tree for a completed stage, then clear it.
    pub fn archive_stage(&self, stage: Stage, summary: Option<&str>) -> Result<PathBuf> {
        let _lock = ProjectLock::acquire(&self.root)?;

        let (complete, missing) = self.validate_stage_completion(stage);
        if !complete {
            tracing::warn!(stage = %stage, missing = missing.len(), "refusing to archive incomplete stage");
            return Err(ResearchError::StageIncomplete {
                stage: stage.to_string(),
                missing,
            });
        }

        let archive_root = paths::archive_dir(&self.root);
        let name = format!("{}-{}", Utc::now().date_naive().format("%Y-%m-%d"), stage);
        let target = archive_root.join(&name);
        if target.exists() {
            return Err(ResearchError::ArchiveExists(target));
        }

        let staging = archive_root.join(format!(".staging-{name}"));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        if let Err(e) = self.build_snapshot(stage, summary, &staging) {
            if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                tracing::warn!(error = %cleanup, "failed to remove staging directory");
            }
            return Err(e);
        }
        std::fs::rename(&staging, &target)?;

        crate::io::clear_dir(&paths::current_dir(&self.root))?;
        tracing::info!(stage = %stage, archive = %name, "archived stage");
        Ok(target)
    }

    fn build_snapshot(&self, stage: Stage, summary: Option<&str>, dest: &Path) -> Result<()> {
        let current = paths::current_dir(&self.root);
        if current.exists() {
            crate::io::copy_dir_all(&current, dest, &|_| false)?;
        } else {
            std::fs::create_dir_all(dest)?;
        }
        let files: Vec<String> = dual_tree::list_documents(dest)?
            .into_iter()
            .filter(|f| !is_generated_file(f))
            .collect();

        let scoped = self.decisions().for_stage(stage);
        decision::write_log(&dest.join(paths::ARCHIVE_DECISIONS_FILE), scoped.clone())?;

        let body = render_summary(stage, summary, &scoped, &files);
        crate::io::atomic_write(&dest.join(paths::SUMMARY_MD), body.as_bytes())?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Stage archives sorted by the date in their name, then by name.
    pub fn list_archives(&self) -> Result<Vec<ArchiveInfo>> {
        let dir = paths::archive_dir(&self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((date, stage)) = parse_archive_name(&name) else {
                continue;
            };
            out.push(self.describe(&entry.path(), name, date, stage)?);
        }
        out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    fn describe(&self, path: &Path, name: String, date: NaiveDate, stage: Stage) -> Result<ArchiveInfo> {
        let files = dual_tree::list_documents(path)?
            .into_iter()
            .filter(|f| !is_generated_file(f))
            .collect();
        let decision_count = decision::read_log(&path.join(paths::ARCHIVE_DECISIONS_FILE))
            .map(|d| d.len())
            .unwrap_or_else(|e| {
                tracing::warn!(archive = %name, error = %e, "archived decisions unreadable");
                0
            });
        Ok(ArchiveInfo {
            name,
            stage,
            date,
            path: path.to_path_buf(),
            files,
            decision_count,
        })
    }

    /// Find an archive by exact directory name or by stage (latest wins).
    pub fn get_archive(&self, name_or_stage: &str) -> Result<ArchiveInfo> {
        let archives = self.list_archives()?;
        if let Some(found) = archives.iter().find(|a| a.name == name_or_stage) {
            return Ok(found.clone());
        }
        let suffix = match name_or_stage.parse::<Stage>() {
            Ok(stage) => format!("-{stage}"),
            Err(_) => format!("-{name_or_stage}"),
        };
        archives
            .into_iter()
            .rev()
            .find(|a| a.name.ends_with(&suffix))
            .ok_or_else(|| ResearchError::ArchiveNotFound(name_or_stage.to_string()))
    }

    /// Copy archived outputs into a baseline category.
    ///
    /// Existing baselines win: a file that already exists is skipped and the
    /// result is `false`. Conflicts are never an error.
    pub fn merge_to_baselines(&self, archive_path: &Path, category: BaselineCategory) -> Result<bool> {
        let _lock = ProjectLock::acquire(&self.root)?;
        if !archive_path.is_dir() {
            return Err(ResearchError::ArchiveNotFound(
                archive_path.display().to_string(),
            ));
        }
        let archive_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target_dir = paths::baseline_dir(&self.root, category);

        let mut all_merged = true;
        for rel in dual_tree::list_documents(archive_path)? {
            if is_generated_file(&rel) {
                continue;
            }
            let target = target_dir.join(&rel);
            if target.exists() {
                tracing::warn!(file = %rel, category = %category, "baseline exists, skipping merge");
                all_merged = false;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(archive_path.join(&rel), &target)?;
            let mut meta = DocumentMeta::baseline(category);
            meta.promoted_from = Some(format!("{archive_name}/{rel}"));
            meta.promoted_at = Some(Utc::now());
            dual_tree::write_meta(&target, &meta)?;
        }
        Ok(all_merged)
    }

    pub fn get_stage_timeline(&self) -> Result<Vec<TimelineEntry>> {
        Ok(self
            .list_archives()?
            .into_iter()
            .map(|a| TimelineEntry {
                stage: a.stage,
                archived_on: a.date,
                archive: a.name,
                file_count: a.files.len(),
                decision_count: a.decision_count,
                next_stage: a.stage.next(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SUMMARY.md
// ---------------------------------------------------------------------------

fn render_summary(
    stage: Stage,
    summary: Option<&str>,
    decisions: &[DecisionEntry],
    files: &[String],
) -> String {
    let mut out = format!("# Stage Archive: {}\n\n", stage.title());
    out.push_str(&format!("- **Stage**: {} ({})\n", stage, stage.code()));
    out.push_str(&format!("- **Archived**: {}\n", Utc::now().format("%Y-%m-%d")));
    match stage.next() {
        Some(next) => out.push_str(&format!("- **Next stage**: {} ({})\n", next.title(), next)),
        None => out.push_str("- **Next stage**: none (final stage)\n"),
    }

    if let Some(text) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str(&format!("\n## Summary\n\n{text}\n"));
    }

    out.push_str("\n## Key Decisions\n\n");
    if decisions.is_empty() {
        out.push_str("_No decisions recorded for this stage._\n");
    }
    for d in decisions {
        out.push_str(&format!("- **{}** ({}): {}", d.checkpoint, d.id, d.selected));
        if let Some(orig) = &d.amends {
            out.push_str(&format!(" (amends {orig})"));
        }
        if !d.rationale.is_empty() {
            out.push_str(&format!(": {}", d.rationale));
        }
        out.push('\n');
    }

    out.push_str("\n## Outputs\n\n");
    if files.is_empty() {
        out.push_str("_No files._\n");
    }
    for f in files {
        out.push_str(&format!("- {f}\n"));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::NewDecision;
    use crate::dual_tree::DualTreeManager;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> ArchiveManager {
        StateStore::new(dir.path(), 10)
            .initialize("p1", "Q?", "qualitative")
            .unwrap();
        ArchiveManager::new(dir.path(), StageConfig::default())
    }

    fn complete_foundation(dir: &TempDir) {
        let tree = DualTreeManager::new(dir.path());
        tree.create_change("research-question.md", "# RQ").unwrap();
        tree.create_change("notes.md", "scratch").unwrap();
        DecisionLog::new(dir.path())
            .add(
                NewDecision::new("CP_RESEARCH_DIRECTION", Stage::Foundation, "refiner", "sleep")
                    .with_rationale("clear gap"),
            )
            .unwrap();
        DecisionLog::new(dir.path())
            .add(NewDecision::new("CP_METHODOLOGY_APPROVAL", Stage::Design, "advisor", "rct"))
            .unwrap();
    }

    #[test]
    fn validation_reports_everything_missing() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        let (ok, missing) = mgr.validate_stage_completion(Stage::Evidence);
        assert!(!ok);
        assert_eq!(
            missing,
            vec![
                "Current stage is foundation, not evidence".to_string(),
                "Required artifact: literature-review.md".to_string(),
            ]
        );

        let (ok, missing) = mgr.validate_stage_completion(Stage::Foundation);
        assert!(!ok);
        assert!(missing.contains(&"Required artifact: research-question.md".to_string()));
        assert!(missing.contains(&"Required checkpoint: CP_RESEARCH_DIRECTION".to_string()));
    }

    #[test]
    fn incomplete_archive_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        DualTreeManager::new(dir.path())
            .create_change("draft.md", "x")
            .unwrap();

        let err = mgr.archive_stage(Stage::Foundation, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(DualTreeManager::new(dir.path()).has_unsaved_changes());
        assert!(mgr.list_archives().unwrap().is_empty());
    }

    #[test]
    fn archive_copies_then_clears() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        complete_foundation(&dir);
        let before = crate::io::list_files(&paths::current_dir(dir.path())).unwrap();

        let path = mgr
            .archive_stage(Stage::Foundation, Some("Question settled."))
            .unwrap();

        let after = crate::io::list_files(&path).unwrap();
        for f in &before {
            assert!(after.contains(f), "archive missing {f}");
        }
        assert!(dual_tree::list_documents(&paths::current_dir(dir.path()))
            .unwrap()
            .is_empty());

        let scoped = decision::read_log(&path.join("decisions.yaml")).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].checkpoint, "CP_RESEARCH_DIRECTION");

        let summary = std::fs::read_to_string(path.join("SUMMARY.md")).unwrap();
        assert!(summary.contains("Research Foundation"));
        assert!(summary.contains("Question settled."));
        assert!(summary.contains("CP_RESEARCH_DIRECTION"));
        assert!(summary.contains("- research-question.md"));
        assert!(summary.contains("Evidence Synthesis"));
    }

    #[test]
    fn archive_conflict_leaves_working_tree() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        complete_foundation(&dir);
        let name = format!("{}-foundation", Utc::now().date_naive().format("%Y-%m-%d"));
        std::fs::create_dir_all(paths::archive_dir(dir.path()).join(&name)).unwrap();

        let err = mgr.archive_stage(Stage::Foundation, None).unwrap_err();
        assert!(matches!(err, ResearchError::ArchiveExists(_)));
        assert!(paths::current_dir(dir.path())
            .join("research-question.md")
            .exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_snapshot_leaves_working_tree_and_no_archive() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        complete_foundation(&dir);
        let current = paths::current_dir(dir.path());
        std::os::unix::fs::symlink(dir.path().join("gone.md"), current.join("linked.md")).unwrap();

        assert!(mgr.validate_stage_completion(Stage::Foundation).0);
        let err = mgr.archive_stage(Stage::Foundation, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        assert!(mgr.list_archives().unwrap().is_empty());
        let leftovers: Vec<String> = std::fs::read_dir(paths::archive_dir(dir.path()))
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|n| n.starts_with(".staging-"))
                    .collect()
            })
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "staging left behind: {leftovers:?}");
        assert!(current.join("research-question.md").is_file());
        assert!(current.join("notes.md").is_file());
    }

    #[test]
    fn list_get_and_timeline() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        let archive = paths::archive_dir(dir.path());
        for name in ["2026-02-01-evidence", "2026-01-15-foundation", "2026-03-01-evidence"] {
            std::fs::create_dir_all(archive.join(name)).unwrap();
            std::fs::write(archive.join(name).join("SUMMARY.md"), "#").unwrap();
        }
        std::fs::create_dir_all(archive.join("promoted/20260101-000000")).unwrap();
        std::fs::create_dir_all(archive.join(".staging-2026-04-01-design")).unwrap();

        let names: Vec<String> = mgr.list_archives().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(
            names,
            vec!["2026-01-15-foundation", "2026-02-01-evidence", "2026-03-01-evidence"]
        );

        assert_eq!(mgr.get_archive("2026-02-01-evidence").unwrap().name, "2026-02-01-evidence");
        assert_eq!(mgr.get_archive("evidence").unwrap().name, "2026-03-01-evidence");
        assert_eq!(mgr.get_archive("A").unwrap().name, "2026-01-15-foundation");
        assert_eq!(
            mgr.get_archive("design").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let timeline = mgr.get_stage_timeline().unwrap();
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].next_stage, Some(Stage::Evidence));
        assert_eq!(timeline[0].file_count, 0);
    }

    #[test]
    fn merge_is_first_write_wins() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        complete_foundation(&dir);
        let path = mgr.archive_stage(Stage::Foundation, None).unwrap();

        let tree = DualTreeManager::new(dir.path());
        tree.create_baseline(BaselineCategory::Framework, "notes.md", "original")
            .unwrap();

        let merged = mgr
            .merge_to_baselines(&path, BaselineCategory::Framework)
            .unwrap();
        assert!(!merged);
        let baseline_dir = paths::baseline_dir(dir.path(), BaselineCategory::Framework);
        assert_eq!(
            std::fs::read_to_string(baseline_dir.join("notes.md")).unwrap(),
            "original"
        );
        assert_eq!(
            std::fs::read_to_string(baseline_dir.join("research-question.md")).unwrap(),
            "# RQ"
        );
        assert!(!baseline_dir.join("SUMMARY.md").exists());
        assert!(!baseline_dir.join("decisions.yaml").exists());

        assert!(mgr
            .merge_to_baselines(&path, BaselineCategory::Literature)
            .unwrap());
    }

    #[test]
    fn checkpoint_file_adds_required_gates() {
        let dir = TempDir::new().unwrap();
        let mgr = setup(&dir);
        std::fs::write(
            paths::checkpoints_path(dir.path()),
            "checkpoints:\n  CP_SCOPE:\n    stage: foundation\n    level: required\n  CP_NICE:\n    stage: foundation\n    level: optional\n",
        )
        .unwrap();
        let (_, missing) = mgr.validate_stage_completion(Stage::Foundation);
        assert!(missing.contains(&"Required checkpoint: CP_SCOPE".to_string()));
        assert!(!missing.iter().any(|m| m.contains("CP_NICE")));
    }

    #[test]
    fn parses_archive_names() {
        let (date, stage) = parse_archive_name("2026-03-01-design").unwrap();
        assert_eq!(date.to_string(), "2026-03-01");
        assert_eq!(stage, Stage::Design);
        assert!(parse_archive_name("promoted").is_none());
        assert!(parse_archive_name("2026-03-01-nonsense").is_none());
    }
}
