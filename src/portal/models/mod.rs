pub mod course;
pub mod export;
pub mod records;
pub mod terms;

pub use course::{CourseInfo, CourseType};
pub use export::{Diagnostic, DiagnosticReason, ExportDocument, RecordKind, Severity, Slice};
pub use records::{
    AttendanceRecord, AttendanceStanding, CgpaSnapshot, ExamEvent, GradeCount, GradeHistory,
    GradeSummary, MarksComponent, MarksSummary, Outlook, SessionUnit, TimetableEntry,
};
pub use terms::{Term, TermId};
