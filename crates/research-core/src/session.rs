//! Read-only access to per-session records in `.research/sessions/*.yaml`.
//!
//! Session files are written by the agent-hook layer. The store only reads
//! them, skipping any file that does not parse.

use crate::error::Result;
use crate::paths;
use crate::types::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub summary: String,
    /// Decision ids recorded during the session.
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Every parseable session record, oldest first.
pub fn list_sessions(root: &Path) -> Result<Vec<SessionRecord>> {
    let dir = paths::sessions_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut records = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml || !entry.file_type()?.is_file() {
            continue;
        }
        let data = std::fs::read_to_string(&path)?;
        match serde_yaml::from_str::<SessionRecord>(&data) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "skipping unreadable session record"
            ),
        }
    }
    records.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    Ok(records)
}

/// The most recently started session, if any.
pub fn latest_session(root: &Path) -> Result<Option<SessionRecord>> {
    Ok(list_sessions(root)?.pop())
}

pub fn find_session(root: &Path, session_id: &str) -> Result<Option<SessionRecord>> {
    Ok(list_sessions(root)?
        .into_iter()
        .find(|s| s.session_id == session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) {
        let sdir = dir.path().join(".research/sessions");
        std::fs::create_dir_all(&sdir).unwrap();
        std::fs::write(sdir.join(name), body).unwrap();
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list_sessions(dir.path()).unwrap().is_empty());
        assert!(latest_session(dir.path()).unwrap().is_none());
    }

    #[test]
    fn lists_sorted_and_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "b.yaml",
            "session_id: s2\nstarted_at: 2024-03-02T09:00:00Z\nstage: B\nsummary: searched\n",
        );
        write(
            &dir,
            "a.yaml",
            "session_id: s1\nstarted_at: 2024-03-01T09:00:00Z\ndecisions: [dec-001]\ntool: hook\n",
        );
        write(&dir, "broken.yaml", "session_id: [");
        write(&dir, "notes.md", "# not a record");

        let list = list_sessions(dir.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].session_id, "s1");
        assert_eq!(list[0].decisions, vec!["dec-001"]);
        assert!(list[0].extra.contains_key("tool"));
        assert_eq!(list[1].stage, Some(Stage::Evidence));

        assert_eq!(latest_session(dir.path()).unwrap().unwrap().session_id, "s2");
        assert!(find_session(dir.path(), "s1").unwrap().is_some());
        assert!(find_session(dir.path(), "s9").unwrap().is_none());
    }
}
