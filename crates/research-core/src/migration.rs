//! On-disk schema detection and upgrade.
//!
//! A project records its layout version in `project-state.yaml`. Projects
//! written before the field existed are treated as the oldest known layout.
//! [`MigrationEngine::migrate`] runs a fixed pipeline (backup, directories,
//! state fields, decision log, checkpoints, version bump) that only adds
//! what is missing, so running it again after success changes nothing.

use crate::checkpoint;
use crate::error::{ResearchError, Result};
use crate::io;
use crate::lock::ProjectLock;
use crate::paths;
use crate::types::BaselineCategory;
use chrono::Utc;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

pub const CURRENT_VERSION: &str = "7.0";
pub const OLDEST_VERSION: &str = "6.8";
pub const KNOWN_VERSIONS: &[&str] = &["6.8", "7.0"];

// ---------------------------------------------------------------------------
// Version helpers
// ---------------------------------------------------------------------------

/// Normalize a stored version. Older files wrote it as a bare YAML number.
pub fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                Some(format!("{i}.0"))
            } else {
                n.as_f64().map(|f| format!("{f:?}"))
            }
        }
        _ => None,
    }
}

fn parse_version(v: &str) -> Option<(u32, u32)> {
    let mut parts = v.trim().splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    Some((major, minor))
}

/// Compare `major.minor` versions. `None` if either side does not parse.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_version(a)?.cmp(&parse_version(b)?))
}

pub fn is_known(version: &str) -> bool {
    KNOWN_VERSIONS.contains(&version)
}

// ---------------------------------------------------------------------------
// DetectedVersion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedVersion {
    /// No `.research/` directory.
    None,
    /// State file missing or unreadable, or a version this build does not know.
    Unknown,
    Known(String),
}

impl DetectedVersion {
    pub fn as_str(&self) -> &str {
        match self {
            DetectedVersion::None => "none",
            DetectedVersion::Unknown => "unknown",
            DetectedVersion::Known(v) => v,
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, DetectedVersion::Known(v) if v == CURRENT_VERSION)
    }
}

impl fmt::Display for DetectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStep {
    pub name: String,
    pub detail: String,
    /// Files, directories, fields or entries touched (or that would be).
    pub changes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: DetectedVersion,
    pub to: String,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub steps: Vec<MigrationStep>,
}

impl MigrationReport {
    fn noop(from: DetectedVersion, dry_run: bool) -> Self {
        Self {
            to: from.as_str().to_string(),
            from,
            dry_run,
            backup_path: None,
            steps: Vec::new(),
        }
    }

    pub fn total_changes(&self) -> usize {
        self.steps.iter().map(|s| s.changes).sum()
    }

    fn step(&mut self, name: &str, detail: String, changes: usize) {
        tracing::info!(
            step = name,
            changes,
            dry_run = self.dry_run,
            "{detail}"
        );
        self.steps.push(MigrationStep {
            name: name.to_string(),
            detail,
            changes,
        });
    }
}

// ---------------------------------------------------------------------------
// MigrationEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MigrationEngine {
    root: PathBuf,
}

impl MigrationEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn detect_version(&self) -> DetectedVersion {
        if !paths::research_dir(&self.root).is_dir() {
            return DetectedVersion::None;
        }
        let Some(doc) = read_yaml(&paths::state_path(&self.root)).ok().flatten() else {
            return DetectedVersion::Unknown;
        };
        let Value::Mapping(map) = doc else {
            return DetectedVersion::Unknown;
        };
        match map.get("schema_version") {
            None | Some(Value::Null) => DetectedVersion::Known(OLDEST_VERSION.to_string()),
            Some(v) => match version_string(v) {
                Some(v) if is_known(&v) => DetectedVersion::Known(v),
                _ => DetectedVersion::Unknown,
            },
        }
    }

    /// True only for a known version below the current one.
    pub fn needs_migration(&self) -> bool {
        match self.detect_version() {
            DetectedVersion::Known(v) => {
                compare_versions(&v, CURRENT_VERSION) == Some(Ordering::Less)
            }
            DetectedVersion::None | DetectedVersion::Unknown => false,
        }
    }

    /// Upgrade the project to [`CURRENT_VERSION`].
    ///
    /// A dry run walks the same steps and reports what each would change
    /// without touching the filesystem (no backup, no lock file).
    pub fn migrate(&self, dry_run: bool) -> Result<MigrationReport> {
        let detected = self.detect_version();
        if !self.needs_migration() {
            tracing::info!(version = %detected, "no migration needed");
            return Ok(MigrationReport::noop(detected, dry_run));
        }

        let _lock = if dry_run {
            None
        } else {
            Some(ProjectLock::acquire(&self.root)?)
        };
        // Another process may have finished the upgrade while we waited.
        if !dry_run && !self.needs_migration() {
            return Ok(MigrationReport::noop(self.detect_version(), dry_run));
        }

        tracing::info!(from = %detected, to = CURRENT_VERSION, dry_run, "starting migration");
        let mut report = MigrationReport {
            from: detected,
            to: CURRENT_VERSION.to_string(),
            dry_run,
            backup_path: None,
            steps: Vec::new(),
        };
        if let Err(e) = self.run_steps(&mut report) {
            tracing::error!(
                error = %e,
                completed = report.steps.len(),
                backup = ?report.backup_path,
                "migration aborted; restore with rollback"
            );
            return Err(e);
        }
        tracing::info!(
            changes = report.total_changes(),
            dry_run,
            "migration finished"
        );
        Ok(report)
    }

    fn run_steps(&self, report: &mut MigrationReport) -> Result<()> {
        self.backup(report)?;
        self.migrate_directories(report)?;
        let mut state = self.migrate_state_fields(report)?;
        self.migrate_decision_log(report)?;
        self.migrate_checkpoints(report)?;
        self.bump_version(&mut state, report)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn backup(&self, report: &mut MigrationReport) -> Result<()> {
        let src = paths::research_dir(&self.root);
        let dst = self.backup_target();
        let skip = |p: &Path| p.file_name().is_some_and(|n| n == ".lock");
        if report.dry_run {
            let files = io::list_files(&src)?
                .into_iter()
                .filter(|f| f != ".lock")
                .count();
            report.step(
                "backup",
                format!("would copy {files} files to {}", dst.display()),
                files,
            );
            return Ok(());
        }
        let files = io::copy_dir_all(&src, &dst, &skip)?;
        report.backup_path = Some(dst.clone());
        report.step(
            "backup",
            format!("copied {files} files to {}", dst.display()),
            files,
        );
        Ok(())
    }

    fn backup_target(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let base = self.root.join(format!("{}{stamp}", paths::BACKUP_PREFIX));
        io::first_free(&base, |p| p.exists())
    }

    fn migrate_directories(&self, report: &mut MigrationReport) -> Result<()> {
        let mut required: Vec<PathBuf> = BaselineCategory::all()
            .iter()
            .map(|c| paths::baseline_dir(&self.root, *c))
            .collect();
        required.push(paths::current_dir(&self.root));
        required.push(paths::archive_dir(&self.root));
        required.push(paths::sessions_dir(&self.root));

        let missing: Vec<&PathBuf> = required.iter().filter(|d| !d.is_dir()).collect();
        if !report.dry_run {
            for dir in &missing {
                io::ensure_dir(dir)?;
            }
        }
        let names: Vec<String> = missing
            .iter()
            .map(|d| {
                d.strip_prefix(&self.root)
                    .unwrap_or(d.as_path())
                    .display()
                    .to_string()
            })
            .collect();
        let detail = if names.is_empty() {
            "directory layout already current".to_string()
        } else {
            format!("created {}", names.join(", "))
        };
        report.step("directories", detail, missing.len());
        Ok(())
    }

    /// Add state fields introduced since the oldest layout. Existing values
    /// are never replaced. Returns the migrated document for the version bump.
    fn migrate_state_fields(&self, report: &mut MigrationReport) -> Result<Mapping> {
        let path = paths::state_path(&self.root);
        let mut state = match read_yaml(&path)? {
            Some(Value::Mapping(map)) => map,
            _ => {
                return Err(ResearchError::Corrupt {
                    path,
                    reason: "project state is not a mapping".to_string(),
                })
            }
        };

        let now = Value::String(Utc::now().to_rfc3339());
        let defaults: [(&str, Value); 7] = [
            ("project_id", Value::String(String::new())),
            ("research_question", Value::String(String::new())),
            ("paradigm", Value::String(String::new())),
            ("current_stage", Value::String("foundation".to_string())),
            ("created_at", now.clone()),
            ("updated_at", now),
            ("session_summaries", Value::Sequence(Vec::new())),
        ];
        let added = add_missing(&mut state, &defaults);

        if !report.dry_run && !added.is_empty() {
            write_yaml(&path, &Value::Mapping(state.clone()))?;
        }
        let detail = if added.is_empty() {
            "project state fields already present".to_string()
        } else {
            format!("added {}", added.join(", "))
        };
        report.step("project_state", detail, added.len());
        Ok(state)
    }

    fn migrate_decision_log(&self, report: &mut MigrationReport) -> Result<()> {
        let path = paths::decision_log_path(&self.root);
        let Some(doc) = read_yaml(&path)? else {
            report.step("decision_log", "no decision log".to_string(), 0);
            return Ok(());
        };

        // The oldest layout stored a bare list of entries.
        let (mut entries, wrapped) = match doc {
            Value::Sequence(items) => (items, true),
            Value::Mapping(mut map) => match map.remove("decisions") {
                Some(Value::Sequence(items)) => (items, false),
                None | Some(Value::Null) => (Vec::new(), false),
                Some(_) => {
                    return Err(ResearchError::Corrupt {
                        path,
                        reason: "decisions is not a list".to_string(),
                    })
                }
            },
            Value::Null => (Vec::new(), false),
            _ => {
                return Err(ResearchError::Corrupt {
                    path,
                    reason: "unrecognized decision log layout".to_string(),
                })
            }
        };

        let mut metadata = Mapping::new();
        metadata.insert("session_id".into(), Value::Null);
        metadata.insert("confirmed".into(), Value::Bool(true));
        let defaults: [(&str, Value); 4] = [
            ("alternatives", Value::Sequence(Vec::new())),
            ("rationale", Value::String(String::new())),
            ("amends", Value::Null),
            ("metadata", Value::Mapping(metadata)),
        ];

        let mut touched = 0;
        for entry in entries.iter_mut() {
            if let Value::Mapping(map) = entry {
                if !add_missing(map, &defaults).is_empty() {
                    touched += 1;
                }
            }
        }

        if !report.dry_run && (touched > 0 || wrapped) {
            let mut out = Mapping::new();
            out.insert("decisions".into(), Value::Sequence(entries));
            write_yaml(&path, &Value::Mapping(out))?;
        }
        let mut detail = format!("updated {touched} entries");
        if wrapped {
            detail.push_str(" and wrapped the list under `decisions`");
        }
        report.step("decision_log", detail, touched);
        Ok(())
    }

    fn migrate_checkpoints(&self, report: &mut MigrationReport) -> Result<()> {
        let path = paths::checkpoints_path(&self.root);
        let Some(Value::Mapping(mut doc)) = read_yaml(&path)? else {
            report.step("checkpoints", "no checkpoint definitions".to_string(), 0);
            return Ok(());
        };

        let mut normalized = 0;
        if let Some(Value::Mapping(defs)) = doc.get_mut("checkpoints") {
            for (id, def) in defs.iter_mut() {
                if let Value::Mapping(def) = def {
                    if checkpoint::normalize_triggers(def) {
                        tracing::debug!(checkpoint = ?id, "normalized triggers");
                        normalized += 1;
                    }
                }
            }
        }

        if !report.dry_run && normalized > 0 {
            write_yaml(&path, &Value::Mapping(doc))?;
        }
        report.step(
            "checkpoints",
            format!("normalized triggers on {normalized} checkpoints"),
            normalized,
        );
        Ok(())
    }

    fn bump_version(&self, state: &mut Mapping, report: &mut MigrationReport) -> Result<()> {
        state.insert(
            "schema_version".into(),
            Value::String(CURRENT_VERSION.to_string()),
        );
        if !report.dry_run {
            write_yaml(&paths::state_path(&self.root), &Value::Mapping(state.clone()))?;
        }
        report.step(
            "version",
            format!("schema_version {} -> {CURRENT_VERSION}", report.from),
            1,
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rollback
    // -----------------------------------------------------------------------

    /// Replace `.research/` with the contents of `backup`. Returns files restored.
    pub fn rollback(&self, backup: &Path) -> Result<usize> {
        if !backup.is_dir() {
            return Err(ResearchError::BackupNotFound(backup.to_path_buf()));
        }
        let target = paths::research_dir(&self.root);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        let restored = io::copy_dir_all(backup, &target, &|_| false)?;
        tracing::info!(
            backup = %backup.display(),
            files = restored,
            "restored project from backup"
        );
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// YAML helpers
// ---------------------------------------------------------------------------

/// `Ok(None)` when absent or empty; `Corrupt` when present but unparseable.
fn read_yaml(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&data)
        .map(Some)
        .map_err(|e| ResearchError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn write_yaml(path: &Path, value: &Value) -> Result<()> {
    let data = serde_yaml::to_string(value)?;
    io::atomic_write(path, data.as_bytes())
}

/// Insert each default whose key is absent. Returns the keys added.
fn add_missing(map: &mut Mapping, defaults: &[(&str, Value)]) -> Vec<String> {
    let mut added = Vec::new();
    for (key, value) in defaults {
        if !map.contains_key(*key) {
            map.insert((*key).into(), value.clone());
            added.push((*key).to_string());
        }
    }
    added
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
