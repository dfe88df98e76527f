//! Dependency-aware artifact generation.
//!
//! Each artifact has a static definition: the template it renders, the
//! output filename pattern, the artifacts it depends on and the context keys
//! it requires. Generation records land in `.research/artifacts.yaml`; the
//! generated / pending / blocked view is recomputed from those records on
//! every call.

use crate::decision::DecisionLog;
use crate::error::{ResearchError, Result};
use crate::lock::ProjectLock;
use crate::paths;
use crate::state::StateStore;
use crate::template;
use crate::types::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ArtifactDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    pub id: String,
    pub template: String,
    /// Output filename; may contain `{{ key }}` placeholders.
    pub output_pattern: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_context: Vec<String>,
    pub stage: Stage,
}

impl ArtifactDefinition {
    pub fn new(id: &str, template: &str, output_pattern: &str, stage: Stage) -> Self {
        Self {
            id: id.to_string(),
            template: template.to_string(),
            output_pattern: output_pattern.to_string(),
            dependencies: Vec::new(),
            required_context: Vec::new(),
            stage,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn requires(mut self, keys: &[&str]) -> Self {
        self.required_context = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

/// The standard research pipeline artifacts.
pub fn default_catalog() -> Vec<ArtifactDefinition> {
    vec![
        ArtifactDefinition::new(
            "research-question",
            "research_question",
            "research-question.md",
            Stage::Foundation,
        )
        .requires(&["research_question"]),
        ArtifactDefinition::new(
            "literature-review",
            "literature_review",
            "literature-review.md",
            Stage::Evidence,
        )
        .depends_on(&["research-question"])
        .requires(&["research_question"]),
        ArtifactDefinition::new(
            "theoretical-framework",
            "theoretical_framework",
            "theoretical-framework.md",
            Stage::Evidence,
        )
        .depends_on(&["literature-review"])
        .requires(&["paradigm"]),
        ArtifactDefinition::new("methodology", "methodology", "methodology.md", Stage::Design)
            .depends_on(&["research-question", "theoretical-framework"])
            .requires(&[
                "research_question",
                "paradigm",
                "decisions.CP_METHODOLOGY_APPROVAL",
            ]),
        ArtifactDefinition::new(
            "data-collection-plan",
            "data_collection_plan",
            "data-collection-plan.md",
            Stage::Collection,
        )
        .depends_on(&["methodology"])
        .requires(&["decisions.CP_METHODOLOGY_APPROVAL"]),
        ArtifactDefinition::new(
            "analysis-plan",
            "analysis_plan",
            "analysis-plan.md",
            Stage::Analysis,
        )
        .depends_on(&["methodology", "data-collection-plan"])
        .requires(&["research_question"]),
        ArtifactDefinition::new(
            "quality-report",
            "quality_report",
            "quality-report.md",
            Stage::Quality,
        )
        .depends_on(&["analysis-plan"])
        .requires(&["project_id"]),
        ArtifactDefinition::new(
            "manuscript-outline",
            "manuscript_outline",
            "manuscript-outline.md",
            Stage::Communication,
        )
        .depends_on(&["quality-report"])
        .requires(&["project_id"]),
    ]
}

// ---------------------------------------------------------------------------
// ArtifactRecord / status file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_context: Vec<String>,
    /// Relative to the project root.
    pub output_path: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactStatusFile {
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub generated: Vec<String>,
    /// Not generated yet, every dependency satisfied.
    pub pending: Vec<String>,
    /// Not generated yet, mapped to the dependencies still missing.
    pub blocked: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// ArtifactGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    root: PathBuf,
    definitions: Vec<ArtifactDefinition>,
    templates: HashMap<String, String>,
}

impl ArtifactGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_definitions(root, default_catalog())
    }

    pub fn with_definitions(root: impl Into<PathBuf>, definitions: Vec<ArtifactDefinition>) -> Self {
        Self {
            root: root.into(),
            definitions,
            templates: HashMap::new(),
        }
    }

    /// Register an in-process template; takes precedence over disk and built-ins.
    pub fn register_template(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), body.into());
    }

    pub fn definitions(&self) -> &[ArtifactDefinition] {
        &self.definitions
    }

    pub fn definition(&self, artifact_id: &str) -> Result<&ArtifactDefinition> {
        self.definitions
            .iter()
            .find(|d| d.id == artifact_id)
            .ok_or_else(|| ResearchError::ArtifactNotFound(artifact_id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Status record
    // -----------------------------------------------------------------------

    fn status_path(&self) -> PathBuf {
        paths::artifacts_path(&self.root)
    }

    fn load_records_strict(&self) -> Result<BTreeMap<String, ArtifactRecord>> {
        let path = self.status_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let file: ArtifactStatusFile =
            serde_yaml::from_str(&data).map_err(|e| ResearchError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(file.artifacts)
    }

    /// Generation records; an unreadable status file reads as empty.
    pub fn records(&self) -> BTreeMap<String, ArtifactRecord> {
        self.load_records_strict().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "artifact status unreadable, treating as empty");
            BTreeMap::new()
        })
    }

    fn save_records(&self, artifacts: BTreeMap<String, ArtifactRecord>) -> Result<()> {
        let data = serde_yaml::to_string(&ArtifactStatusFile { artifacts })?;
        crate::io::atomic_write(&self.status_path(), data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Dependency views
    // -----------------------------------------------------------------------

    fn missing_dependencies(
        def: &ArtifactDefinition,
        records: &BTreeMap<String, ArtifactRecord>,
    ) -> Vec<String> {
        def.dependencies
            .iter()
            .filter(|d| !records.contains_key(d.as_str()))
            .cloned()
            .collect()
    }

    /// Dependencies of `artifact_id` that have not been generated.
    pub fn check_dependencies(&self, artifact_id: &str) -> Result<Vec<String>> {
        let def = self.definition(artifact_id)?;
        Ok(Self::missing_dependencies(def, &self.records()))
    }

    /// Artifacts not yet generated whose dependencies are all satisfied.
    pub fn get_unlocked_artifacts(&self) -> Vec<String> {
        self.get_generation_status().pending
    }

    pub fn get_generation_status(&self) -> GenerationStatus {
        let records = self.records();
        let mut status = GenerationStatus::default();
        for def in &self.definitions {
            if records.contains_key(&def.id) {
                status.generated.push(def.id.clone());
                continue;
            }
            let missing = Self::missing_dependencies(def, &records);
            if missing.is_empty() {
                status.pending.push(def.id.clone());
            } else {
                status.blocked.insert(def.id.clone(), missing);
            }
        }
        status
    }

    /// Definition ids in dependency order. Errors on cycles or unknown dependencies.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for def in &self.definitions {
            indegree.entry(def.id.as_str()).or_insert(0);
            for dep in &def.dependencies {
                if !self.definitions.iter().any(|d| &d.id == dep) {
                    return Err(ResearchError::InvalidField {
                        field: format!("{}.dependencies", def.id),
                        reason: format!("unknown artifact '{dep}'"),
                    });
                }
                *indegree.entry(def.id.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(def.id.as_str());
            }
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::new();
        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(n) = indegree.get_mut(next) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(*next);
                    }
                }
            }
        }

        if order.len() != self.definitions.len() {
            let stuck: Vec<String> = indegree
                .into_iter()
                .filter(|(_, n)| *n > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(ResearchError::InvalidField {
                field: "dependencies".to_string(),
                reason: format!("dependency cycle among: {}", stuck.join(", ")),
            });
        }
        Ok(order)
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    /// Context assembled from project state, the decision log and prior records.
    pub fn build_context(&self) -> Value {
        let state = StateStore::new(&self.root, usize::MAX).load();
        let log = DecisionLog::new(&self.root);
        let entries = log.entries();

        // Later entries (including amendments) win for a checkpoint.
        let mut decisions = Map::new();
        let mut ordered = entries.clone();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        for e in &ordered {
            decisions.insert(e.checkpoint.clone(), Value::String(e.selected.clone()));
        }

        let recent: Vec<Value> = log
            .recent(10)
            .into_iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "checkpoint": e.checkpoint,
                    "selected": e.selected,
                    "rationale": e.rationale,
                })
            })
            .collect();

        let artifacts: Map<String, Value> = self
            .records()
            .into_iter()
            .map(|(id, r)| (id, Value::String(r.output_path)))
            .collect();

        json!({
            "project_id": state.project_id,
            "research_question": state.research_question,
            "paradigm": state.paradigm,
            "current_stage": state.current_stage.as_str(),
            "schema_version": state.schema_version,
            "decisions": decisions,
            "recent_decisions": recent,
            "artifacts": artifacts,
            "session_summaries": state
                .session_summaries
                .iter()
                .map(|s| s.summary.clone())
                .collect::<Vec<_>>(),
        })
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    fn resolve_template(&self, name: &str) -> Result<String> {
        if let Some(body) = self.templates.get(name) {
            return Ok(body.clone());
        }
        let dir = paths::templates_dir(&self.root);
        for candidate in [dir.join(name), dir.join(format!("{name}.md"))] {
            if candidate.is_file() {
                return Ok(std::fs::read_to_string(candidate)?);
            }
        }
        template::builtin(name)
            .map(str::to_string)
            .ok_or_else(|| ResearchError::TemplateNotFound(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Render and write an artifact. Returns the output path.
    pub fn generate(&self, artifact_id: &str, context: Option<Value>) -> Result<PathBuf> {
        let _lock = ProjectLock::acquire(&self.root)?;
        self.generate_unlocked(artifact_id, context, true)
    }

    /// Re-run generation. Without `force`, dependencies are checked again.
    pub fn regenerate(&self, artifact_id: &str, force: bool) -> Result<PathBuf> {
        let _lock = ProjectLock::acquire(&self.root)?;
        if force {
            tracing::warn!(artifact = %artifact_id, "forced regeneration skips dependency check");
        }
        self.generate_unlocked(artifact_id, None, !force)
    }

    fn generate_unlocked(
        &self,
        artifact_id: &str,
        context: Option<Value>,
        check_deps: bool,
    ) -> Result<PathBuf> {
        let def = self.definition(artifact_id)?;
        let mut records = self.load_records_strict()?;

        if check_deps {
            let missing = Self::missing_dependencies(def, &records);
            if !missing.is_empty() {
                return Err(ResearchError::DependencyUnmet {
                    artifact: artifact_id.to_string(),
                    missing,
                });
            }
        }

        let context = context.unwrap_or_else(|| self.build_context());

        let mut missing = template::missing_keys(&context, &def.required_context);
        for key in template::placeholders(&def.output_pattern) {
            if !template::is_present(&context, &key) && !missing.contains(&key) {
                missing.push(key);
            }
        }
        if !missing.is_empty() {
            return Err(ResearchError::MissingContext {
                artifact: artifact_id.to_string(),
                keys: missing,
            });
        }

        let body = self.resolve_template(&def.template)?;
        let rendered = template::render(&body, &context);
        let filename = template::render(&def.output_pattern, &context);
        paths::validate_filename(&filename)?;

        let output = paths::current_dir(&self.root).join(&filename);
        crate::io::atomic_write(&output, rendered.as_bytes())?;

        records.insert(
            def.id.clone(),
            ArtifactRecord {
                artifact_id: def.id.clone(),
                dependencies: def.dependencies.clone(),
                required_context: def.required_context.clone(),
                output_path: relative_to(&self.root, &output),
                generated_at: Utc::now(),
            },
        );
        self.save_records(records)?;
        tracing::info!(artifact = %artifact_id, path = %output.display(), "generated artifact");
        Ok(output)
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
