use serde::{Deserialize, Serialize};
use std::fmt;

/// Portal-assigned semester identifier (`semesterSubId`), e.g. `VL20252601`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(String);

impl TermId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A semester as listed by the portal.
///
/// `ordinal` is the position in the student's history, oldest first (0 = oldest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub label: String,
    pub ordinal: usize,
}

impl Term {
    pub fn new(id: impl Into<String>, label: impl Into<String>, ordinal: usize) -> Self {
        Self {
            id: TermId::new(id),
            label: label.into(),
            ordinal,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}
