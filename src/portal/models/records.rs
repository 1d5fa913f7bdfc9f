//! Typed records produced by the HTML extractors.
//!
//! Numeric fields are `Option`s: a cell that fails to parse becomes `None` on
//! that record instead of a zero that would look like real data.

use chrono::{DateTime, FixedOffset, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::course::{CourseInfo, CourseType};

/// One assessment component of a course (CAT-1, Quiz, FAT, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarksComponent {
    pub label: String,
    pub max_marks: Option<f64>,
    /// Weight of the component in percent of the course total.
    pub weight: Option<f64>,
    pub status: Option<String>,
    pub scored: Option<f64>,
    /// Scored marks scaled to the component weight.
    pub weighted: Option<f64>,
}

/// Marks for one course. An empty component list means faculty has not
/// published anything yet, which is a valid state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarksSummary {
    pub course: CourseInfo,
    pub components: Vec<MarksComponent>,
    /// Sum of weighted contributions of components that parsed.
    pub total_weighted: f64,
    /// Sum of component weights that parsed.
    pub total_weight: f64,
    /// Components missing a weight or weighted mark. Non-zero means the
    /// totals are partial.
    pub unparsed_components: usize,
}

impl MarksSummary {
    pub fn new(course: CourseInfo, components: Vec<MarksComponent>) -> Self {
        let total_weighted = components.iter().filter_map(|c| c.weighted).sum();
        let total_weight = components.iter().filter_map(|c| c.weight).sum();
        let unparsed_components = components
            .iter()
            .filter(|c| c.weight.is_none() || c.weighted.is_none())
            .count();
        Self {
            course,
            components,
            total_weighted,
            total_weight,
            unparsed_components,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unparsed_components == 0
    }
}

/// Unit the attendance outlook is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionUnit {
    Class,
    Lab,
}

/// Distance from the attendance requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outlook", content = "sessions", rename_all = "snake_case")]
pub enum Outlook {
    /// Sessions that can be skipped while staying above the requirement.
    CanMiss(u32),
    /// Consecutive sessions needed to climb back to the requirement.
    MustAttend(u32),
}

/// Attendance threshold math for one course, computed on the effective
/// (lab-halved) counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceStanding {
    pub effective_attended: u32,
    pub effective_total: u32,
    pub unit: SessionUnit,
    #[serde(flatten)]
    pub outlook: Outlook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub course_code: String,
    pub course_name: Option<String>,
    pub course_type: Option<CourseType>,
    pub faculty: Option<String>,
    pub slot: Option<String>,
    pub attended: Option<u32>,
    pub total: Option<u32>,
    /// Percentage exactly as the portal reports it.
    pub percentage: Option<f64>,
    pub standing: Option<AttendanceStanding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamEvent {
    pub course_code: String,
    pub course_title: Option<String>,
    /// Exam the row belongs to (CAT1, CAT2, FAT, ...).
    pub exam: Option<String>,
    pub slot: Option<String>,
    pub date: Option<NaiveDate>,
    pub session: Option<String>,
    pub reporting_time: Option<String>,
    pub exam_time: Option<String>,
    /// Start of the exam in portal-local time, when date and time both parsed.
    pub starts_at: Option<DateTime<FixedOffset>>,
    pub venue: Option<String>,
    pub seat_location: Option<String>,
    pub seat_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub day: Weekday,
    pub slot: String,
    pub course_code: Option<String>,
    /// Course component code (TH, ETH, ELA, LO, ...).
    pub component: Option<String>,
    pub venue: Option<String>,
    /// Raw cell text, kept for callers that want the portal's own label.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgpaSnapshot {
    pub term: String,
    pub gpa: Option<f64>,
    pub cgpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeCount {
    pub grade: String,
    pub count: Option<u32>,
}

/// Credit and grade-distribution summary from the grade history page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub credits_registered: Option<f64>,
    pub credits_earned: Option<f64>,
    pub cgpa: Option<f64>,
    pub grades: Vec<GradeCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeHistory {
    pub summary: Option<GradeSummary>,
    /// Oldest first.
    pub trend: Vec<CgpaSnapshot>,
}

impl GradeHistory {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.trend.is_empty()
    }

    /// Cumulative CGPA: the summary figure when present, otherwise the newest
    /// snapshot that carries one.
    pub fn current_cgpa(&self) -> Option<f64> {
        self.summary
            .as_ref()
            .and_then(|s| s.cgpa)
            .or_else(|| self.trend.iter().rev().find_map(|s| s.cgpa))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(weight: Option<f64>, weighted: Option<f64>) -> MarksComponent {
        MarksComponent {
            label: "CAT-1".to_owned(),
            max_marks: Some(50.0),
            weight,
            status: Some("Present".to_owned()),
            scored: Some(40.0),
            weighted,
        }
    }

    fn course() -> CourseInfo {
        CourseInfo {
            code: "BCSE203L".to_owned(),
            title: Some("Database Systems".to_owned()),
            course_type: Some(CourseType::EmbeddedTheory),
            faculty: None,
            slot: None,
        }
    }

    #[test]
    fn test_marks_totals_skip_unparsed_cells() {
        let summary = MarksSummary::new(
            course(),
            vec![
                component(Some(15.0), Some(12.0)),
                component(None, Some(3.5)),
                component(Some(10.0), None),
            ],
        );
        assert_eq!(summary.total_weighted, 15.5);
        assert_eq!(summary.total_weight, 25.0);
        assert_eq!(summary.unparsed_components, 2);
        assert!(!summary.is_complete());
    }

    #[test]
    fn test_marks_without_components_is_valid() {
        let summary = MarksSummary::new(course(), Vec::new());
        assert!(summary.components.is_empty());
        assert_eq!(summary.total_weighted, 0.0);
        assert_eq!(summary.total_weight, 0.0);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_current_cgpa_prefers_summary() {
        let history = GradeHistory {
            summary: Some(GradeSummary {
                credits_registered: None,
                credits_earned: None,
                cgpa: Some(8.71),
                grades: Vec::new(),
            }),
            trend: vec![CgpaSnapshot {
                term: "Fall".to_owned(),
                gpa: Some(9.0),
                cgpa: Some(8.5),
            }],
        };
        assert_eq!(history.current_cgpa(), Some(8.71));
    }

    #[test]
    fn test_current_cgpa_falls_back_to_newest_snapshot() {
        let history = GradeHistory {
            summary: None,
            trend: vec![
                CgpaSnapshot {
                    term: "Fall 2023".to_owned(),
                    gpa: Some(9.1),
                    cgpa: Some(9.1),
                },
                CgpaSnapshot {
                    term: "Winter 2024".to_owned(),
                    gpa: Some(7.9),
                    cgpa: Some(8.4),
                },
                CgpaSnapshot {
                    term: "Fall 2024".to_owned(),
                    gpa: None,
                    cgpa: None,
                },
            ],
        };
        assert_eq!(history.current_cgpa(), Some(8.4));
    }

    #[test]
    fn test_outlook_serializes_tagged() {
        let standing = AttendanceStanding {
            effective_attended: 10,
            effective_total: 20,
            unit: SessionUnit::Lab,
            outlook: Outlook::MustAttend(19),
        };
        let value = serde_json::to_value(&standing).unwrap();
        assert_eq!(value["outlook"], "must_attend");
        assert_eq!(value["sessions"], 19);
        assert_eq!(value["unit"], "lab");
    }
}
