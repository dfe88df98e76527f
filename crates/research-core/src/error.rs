use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable classification of every error the store can return.
///
/// Callers branch on this rather than on individual variants so that new
/// variants can be added without breaking retry / prompt / abort decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    DependencyUnmet,
    Conflict,
    Corruption,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Invalid => "invalid",
            ErrorKind::DependencyUnmet => "dependency_unmet",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Io => "io",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ResearchError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("project already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    #[error("unknown artifact: {0}")]
    ArtifactNotFound(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("working file not found: {}", .0.display())]
    ChangeNotFound(PathBuf),

    #[error("baseline not found: {}", .0.display())]
    BaselineNotFound(PathBuf),

    #[error("backup not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("invalid category '{0}': expected literature, methodology or framework")]
    InvalidCategory(String),

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("missing context for artifact '{artifact}': {}", .keys.join(", "))]
    MissingContext { artifact: String, keys: Vec<String> },

    #[error("schema version cannot decrease from {current} to {attempted}")]
    VersionRegression { current: String, attempted: String },

    #[error("artifact '{artifact}' blocked by unmet dependencies: {}", .missing.join(", "))]
    DependencyUnmet {
        artifact: String,
        missing: Vec<String>,
    },

    #[error("baseline already exists: {}", .0.display())]
    BaselineExists(PathBuf),

    #[error("archive already exists: {}", .0.display())]
    ArchiveExists(PathBuf),

    #[error("stage '{stage}' is incomplete: {}", .missing.join("; "))]
    StageIncomplete { stage: String, missing: Vec<String> },

    #[error("corrupt file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ResearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResearchError::DecisionNotFound(_)
            | ResearchError::ArtifactNotFound(_)
            | ResearchError::TemplateNotFound(_)
            | ResearchError::ArchiveNotFound(_)
            | ResearchError::ChangeNotFound(_)
            | ResearchError::BaselineNotFound(_)
            | ResearchError::BackupNotFound(_) => ErrorKind::NotFound,
            ResearchError::InvalidCategory(_)
            | ResearchError::InvalidStage(_)
            | ResearchError::InvalidFilename(_)
            | ResearchError::InvalidField { .. }
            | ResearchError::MissingFields(_)
            | ResearchError::MissingContext { .. }
            | ResearchError::VersionRegression { .. }
            | ResearchError::Yaml(_)
            | ResearchError::Json(_) => ErrorKind::Invalid,
            ResearchError::DependencyUnmet { .. } => ErrorKind::DependencyUnmet,
            ResearchError::AlreadyInitialized(_)
            | ResearchError::BaselineExists(_)
            | ResearchError::ArchiveExists(_)
            | ResearchError::StageIncomplete { .. } => ErrorKind::Conflict,
            ResearchError::Corrupt { .. } => ErrorKind::Corruption,
            ResearchError::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResearchError>;
