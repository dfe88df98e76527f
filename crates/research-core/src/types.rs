use crate::error::ResearchError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the research pipeline. Order is significant.
///
/// Each stage also answers to its single-letter code (`A`..`G`) both when
/// parsed and when deserialized.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    #[serde(alias = "A")]
    Foundation,
    #[serde(alias = "B")]
    Evidence,
    #[serde(alias = "C")]
    Design,
    #[serde(alias = "D")]
    Collection,
    #[serde(alias = "E")]
    Analysis,
    #[serde(alias = "F")]
    Quality,
    #[serde(alias = "G")]
    Communication,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Foundation,
            Stage::Evidence,
            Stage::Design,
            Stage::Collection,
            Stage::Analysis,
            Stage::Quality,
            Stage::Communication,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Stage> {
        Stage::all().get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Foundation => "foundation",
            Stage::Evidence => "evidence",
            Stage::Design => "design",
            Stage::Collection => "collection",
            Stage::Analysis => "analysis",
            Stage::Quality => "quality",
            Stage::Communication => "communication",
        }
    }

    pub fn code(self) -> char {
        (b'A' + self.index() as u8) as char
    }

    /// Human-readable title used in generated summaries.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Foundation => "Research Foundation",
            Stage::Evidence => "Evidence Synthesis",
            Stage::Design => "Research Design",
            Stage::Collection => "Data Collection",
            Stage::Analysis => "Analysis",
            Stage::Quality => "Quality Review",
            Stage::Communication => "Communication",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(stage) = Stage::all()
            .iter()
            .find(|st| st.as_str() == trimmed.to_ascii_lowercase())
        {
            return Ok(*stage);
        }
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some(stage) = Stage::all()
                .iter()
                .find(|st| st.code() == c.to_ascii_uppercase())
            {
                return Ok(*stage);
            }
        }
        Err(ResearchError::InvalidStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// BaselineCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineCategory {
    Literature,
    Methodology,
    Framework,
}

impl BaselineCategory {
    pub fn all() -> &'static [BaselineCategory] {
        &[
            BaselineCategory::Literature,
            BaselineCategory::Methodology,
            BaselineCategory::Framework,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BaselineCategory::Literature => "literature",
            BaselineCategory::Methodology => "methodology",
            BaselineCategory::Framework => "framework",
        }
    }
}

impl fmt::Display for BaselineCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BaselineCategory {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "literature" => Ok(BaselineCategory::Literature),
            "methodology" => Ok(BaselineCategory::Methodology),
            "framework" => Ok(BaselineCategory::Framework),
            _ => Err(ResearchError::InvalidCategory(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Stable,
    InProgress,
    Promoted,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Stable => "stable",
            DocumentStatus::InProgress => "in_progress",
            DocumentStatus::Promoted => "promoted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_ordering() {
        assert!(Stage::Foundation < Stage::Evidence);
        assert!(Stage::Communication > Stage::Quality);
    }

    #[test]
    fn stage_next() {
        assert_eq!(Stage::Foundation.next(), Some(Stage::Evidence));
        assert_eq!(Stage::Quality.next(), Some(Stage::Communication));
        assert_eq!(Stage::Communication.next(), None);
    }

    #[test]
    fn stage_parses_name_and_code() {
        assert_eq!(Stage::from_str("design").unwrap(), Stage::Design);
        assert_eq!(Stage::from_str("A").unwrap(), Stage::Foundation);
        assert_eq!(Stage::from_str("g").unwrap(), Stage::Communication);
        assert!(Stage::from_str("Z").is_err());
        assert!(Stage::from_str("nonsense").is_err());
    }

    #[test]
    fn stage_deserializes_from_code() {
        let stage: Stage = serde_yaml::from_str("B").unwrap();
        assert_eq!(stage, Stage::Evidence);
        let stage: Stage = serde_yaml::from_str("analysis").unwrap();
        assert_eq!(stage, Stage::Analysis);
        assert_eq!(serde_yaml::to_string(&Stage::Quality).unwrap().trim(), "quality");
    }

    #[test]
    fn category_rejects_unknown() {
        assert_eq!(
            BaselineCategory::from_str("framework").unwrap(),
            BaselineCategory::Framework
        );
        let err = BaselineCategory::from_str("results").unwrap_err();
        assert!(matches!(err, ResearchError::InvalidCategory(_)));
    }
}
