use crate::error::Result;
use crate::paths;
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How many session summaries `ProjectState` retains.
    #[serde(default = "default_max_summaries")]
    pub max_summaries: usize,
}

fn default_max_summaries() -> usize {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_summaries: default_max_summaries(),
        }
    }
}

// ---------------------------------------------------------------------------
// StageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Working-tree files that must exist before a stage can be archived.
    #[serde(default = "default_required_artifacts")]
    pub required_artifacts: HashMap<String, Vec<String>>,
    /// Checkpoints that must have at least one recorded decision.
    #[serde(default = "default_required_checkpoints")]
    pub required_checkpoints: HashMap<String, Vec<String>>,
}

fn default_required_artifacts() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert("foundation".to_string(), vec!["research-question.md".to_string()]);
    m.insert("evidence".to_string(), vec!["literature-review.md".to_string()]);
    m.insert("design".to_string(), vec!["methodology.md".to_string()]);
    m.insert(
        "collection".to_string(),
        vec!["data-collection-plan.md".to_string()],
    );
    m.insert("analysis".to_string(), vec!["analysis-plan.md".to_string()]);
    m.insert("quality".to_string(), vec!["quality-report.md".to_string()]);
    m.insert(
        "communication".to_string(),
        vec!["manuscript-outline.md".to_string()],
    );
    m
}

fn default_required_checkpoints() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert(
        "foundation".to_string(),
        vec!["CP_RESEARCH_DIRECTION".to_string()],
    );
    m.insert(
        "design".to_string(),
        vec!["CP_METHODOLOGY_APPROVAL".to_string()],
    );
    m
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            required_artifacts: default_required_artifacts(),
            required_checkpoints: default_required_checkpoints(),
        }
    }
}

impl StageConfig {
    pub fn artifacts_for(&self, stage: Stage) -> &[String] {
        self.required_artifacts
            .get(stage.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn checkpoints_for(&self, stage: Stage) -> &[String] {
        self.required_checkpoints
            .get(stage.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub stages: StageConfig,
}

impl Config {
    /// Load `.research/config.yaml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.sessions.max_summaries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "sessions.max_summaries is 0: no session summaries will be kept"
                    .to_string(),
            });
        }

        let sections = [
            ("stages.required_artifacts", &self.stages.required_artifacts),
            (
                "stages.required_checkpoints",
                &self.stages.required_checkpoints,
            ),
        ];
        for (section, map) in sections {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if !Stage::all().iter().any(|s| s.as_str() == key) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("unknown stage '{key}' in {section}"),
                    });
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.sessions.max_summaries, 10);
        assert_eq!(
            cfg.stages.artifacts_for(Stage::Foundation),
            ["research-question.md".to_string()]
        );
        assert!(cfg.stages.checkpoints_for(Stage::Evidence).is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".research")).unwrap();
        std::fs::write(
            dir.path().join(".research/config.yaml"),
            "sessions:\n  max_summaries: 3\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.sessions.max_summaries, 3);
        assert_eq!(
            cfg.stages.artifacts_for(Stage::Design),
            ["methodology.md".to_string()]
        );
    }

    #[test]
    fn config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.sessions.max_summaries = 4;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.sessions.max_summaries, 4);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".research")).unwrap();
        std::fs::write(dir.path().join(".research/config.yaml"), "sessions: [oops").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn validate_default_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_unknown_stage() {
        let mut cfg = Config::default();
        cfg.stages
            .required_artifacts
            .insert("publishing".to_string(), vec!["x.md".to_string()]);
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("unknown stage 'publishing'")
                && w.level == WarnLevel::Error));
    }
}
