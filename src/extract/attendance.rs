//! Attendance page (`processViewStudentAttendance`).

use html_scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

use super::{ExtractError, cell_text, non_empty, parse_count, parse_decimal, row_cells, selector, title_case};
use crate::policy::AttendancePolicy;
use crate::portal::models::{AttendanceRecord, CourseType};

pub const CONTAINER: &str = "table#AttendanceDetailDataTable";

static CONTAINER_SEL: LazyLock<Selector> = LazyLock::new(|| selector(CONTAINER));
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| selector("tr"));

const COURSE: usize = 2;
const SLOT: usize = 3;
const FACULTY: usize = 4;
const ATTENDED: usize = 5;
const TOTAL: usize = 6;
const PERCENTAGE: usize = 7;

pub fn parse(body: &str, policy: &AttendancePolicy) -> Result<Vec<AttendanceRecord>, ExtractError> {
    let document = Html::parse_document(body);
    let table = document
        .select(&CONTAINER_SEL)
        .next()
        .ok_or(ExtractError::MarkupMismatch {
            page: "attendance",
            selector: CONTAINER,
        })?;

    Ok(table
        .select(&ROW_SEL)
        .filter_map(|row| parse_row(row, policy))
        .collect())
}

fn parse_row(row: ElementRef<'_>, policy: &AttendancePolicy) -> Option<AttendanceRecord> {
    let cells = row_cells(row);
    if cells.len() <= PERCENTAGE || cells.iter().any(|c| c.value().name() == "th") {
        return None;
    }
    let text: Vec<String> = cells.into_iter().map(cell_text).collect();

    let Some((code, name, course_type)) = split_course(&text[COURSE]) else {
        debug!(cell = %text[COURSE], "Skipping attendance row without a course code");
        return None;
    };

    let attended = parse_count(&text[ATTENDED]);
    let total = parse_count(&text[TOTAL]);
    let standing = attended
        .zip(total)
        .map(|(a, t)| policy.standing(a, t, course_type.as_ref()));

    Some(AttendanceRecord {
        course_code: code,
        course_name: name,
        course_type,
        faculty: faculty_name(&text[FACULTY]),
        slot: non_empty(&text[SLOT]),
        attended,
        total,
        percentage: parse_decimal(&text[PERCENTAGE]),
        standing,
    })
}

/// "BCSE203L - Database Systems - Embedded Theory" -> (code, name, type).
///
/// Course names may themselves contain " - ", so the code is the first part,
/// the type the last, and everything between is the name.
fn split_course(cell: &str) -> Option<(String, Option<String>, Option<CourseType>)> {
    let parts: Vec<&str> = cell.split(" - ").map(str::trim).collect();
    let code = non_empty(parts.first()?)?;
    match parts.len() {
        1 => Some((code, None, None)),
        2 => Some((code, non_empty(parts[1]), None)),
        n => {
            let name = parts[1..n - 1].join(" - ");
            let course_type = non_empty(parts[n - 1]).map(|t| CourseType::from_label(&t));
            Some((code, non_empty(&name), course_type))
        }
    }
}

/// "JANE DOE - SCOPE" -> "Jane Doe".
fn faculty_name(cell: &str) -> Option<String> {
    let name = cell.split(" - ").next().unwrap_or(cell);
    non_empty(name).map(|n| title_case(&n))
}
