//! The aggregate export document and its diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::records::{
    AttendanceRecord, CgpaSnapshot, ExamEvent, GradeSummary, MarksSummary, TimetableEntry,
};
use super::terms::Term;

/// Every kind of record the client can fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Terms,
    Marks,
    Attendance,
    Exams,
    Timetable,
    GradeHistory,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Terms => "terms",
            RecordKind::Marks => "marks",
            RecordKind::Attendance => "attendance",
            RecordKind::Exams => "exams",
            RecordKind::Timetable => "timetable",
            RecordKind::GradeHistory => "grade_history",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records of one kind plus the term they were taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice<T> {
    pub source_term: Option<Term>,
    pub records: Vec<T>,
}

impl<T> Default for Slice<T> {
    fn default() -> Self {
        Self {
            source_term: None,
            records: Vec::new(),
        }
    }
}

impl<T> Slice<T> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Why a candidate (or a whole kind) produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DiagnosticReason {
    NoData,
    SessionExpired,
    ReauthFailed { cause: String },
    Transport { cause: String },
    MarkupMismatch { detail: String },
    NoTerms,
    Exhausted { tried: usize },
}

impl DiagnosticReason {
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticReason::NoData => Severity::Info,
            DiagnosticReason::MarkupMismatch { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticReason::NoData => f.write_str("no data"),
            DiagnosticReason::SessionExpired => {
                f.write_str("session expired again after re-authentication")
            }
            DiagnosticReason::ReauthFailed { cause } => write!(f, "re-authentication failed: {cause}"),
            DiagnosticReason::Transport { cause } => write!(f, "request failed: {cause}"),
            DiagnosticReason::MarkupMismatch { detail } => write!(f, "markup mismatch: {detail}"),
            DiagnosticReason::NoTerms => f.write_str("no terms available to try"),
            DiagnosticReason::Exhausted { tried: 1 } => f.write_str("no data"),
            DiagnosticReason::Exhausted { tried } => {
                write!(f, "no data in any of {tried} candidate terms")
            }
        }
    }
}

/// A non-fatal note about one record kind, optionally tied to a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: RecordKind,
    pub term: Option<String>,
    pub severity: Severity,
    #[serde(flatten)]
    pub reason: DiagnosticReason,
}

impl Diagnostic {
    pub fn new(kind: RecordKind, term: Option<&Term>, reason: DiagnosticReason) -> Self {
        Self {
            kind,
            term: term.map(|t| t.label.clone()),
            severity: reason.severity(),
            reason,
        }
    }

    /// A diagnostic that marks the kind as failed regardless of the reason's
    /// own severity (e.g. "no data" on an endpoint with no fallback).
    pub fn failure(kind: RecordKind, term: Option<&Term>, reason: DiagnosticReason) -> Self {
        let mut diagnostic = Self::new(kind, term, reason);
        diagnostic.severity = diagnostic.severity.max(Severity::Warning);
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.term {
            Some(term) => write!(f, "{} [{}]: {}", self.kind, term, self.reason),
            None => write!(f, "{}: {}", self.kind, self.reason),
        }
    }
}

/// Everything gathered for one identity in one aggregation run.
///
/// Each slice carries its own source term; slices are not assumed to come from
/// the same semester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub identity: String,
    pub generated_at: DateTime<Utc>,
    pub current_term: Option<String>,
    pub marks: Slice<MarksSummary>,
    pub attendance: Slice<AttendanceRecord>,
    pub exams: Slice<ExamEvent>,
    pub timetable: Slice<TimetableEntry>,
    pub cgpa: Option<f64>,
    pub cgpa_trend: Vec<CgpaSnapshot>,
    pub grade_summary: Option<GradeSummary>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ExportDocument {
    /// True when no slice produced anything.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
            && self.attendance.is_empty()
            && self.exams.is_empty()
            && self.timetable.is_empty()
            && self.cgpa_trend.is_empty()
            && self.grade_summary.is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity >= Severity::Warning)
    }

    /// Human-readable join of everything that was skipped and why, or `None`
    /// when every kind was gathered cleanly.
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<String> = self.failures().map(ToString::to_string).collect();
        if parts.is_empty() {
            None
        } else {
            Some(format!("partial data collection: {}", parts.join("; ")))
        }
    }
}
