use serde::{Deserialize, Serialize};
use std::fmt;

/// Course type as labelled by the portal ("Embedded Theory", "Lab Only", ...).
///
/// Unknown labels are preserved verbatim in [`CourseType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CourseType {
    TheoryOnly,
    LabOnly,
    EmbeddedTheory,
    EmbeddedLab,
    EmbeddedProject,
    Project,
    Other(String),
}

impl CourseType {
    /// Parse a portal label. Matching ignores case and surrounding whitespace.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "theory only" | "theory" | "th" | "tho" => Self::TheoryOnly,
            "lab only" | "lab" | "lo" => Self::LabOnly,
            "embedded theory" | "eth" => Self::EmbeddedTheory,
            "embedded lab" | "ela" => Self::EmbeddedLab,
            "embedded project" | "epj" => Self::EmbeddedProject,
            "project" | "pjt" => Self::Project,
            _ => Self::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TheoryOnly => "Theory Only",
            Self::LabOnly => "Lab Only",
            Self::EmbeddedTheory => "Embedded Theory",
            Self::EmbeddedLab => "Embedded Lab",
            Self::EmbeddedProject => "Embedded Project",
            Self::Project => "Project",
            Self::Other(label) => label,
        }
    }

    /// Lab rows report attended/total in double-counted slots.
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::LabOnly | Self::EmbeddedLab)
    }
}

impl From<String> for CourseType {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<CourseType> for String {
    fn from(course_type: CourseType) -> Self {
        course_type.as_str().to_owned()
    }
}

impl fmt::Display for CourseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Course registration details shared by several record kinds.
///
/// Titles are not guaranteed to match across pages; join on `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub code: String,
    pub title: Option<String>,
    pub course_type: Option<CourseType>,
    pub faculty: Option<String>,
    pub slot: Option<String>,
}
