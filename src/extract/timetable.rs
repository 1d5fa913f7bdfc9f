//! Timetable grid (`processViewTimeTable`).
//!
//! Each weekday spans two rows (THEORY then LAB); only the first carries the
//! day cell. Occupied cells read `SLOT-CODE-COMPONENT-VENUE-ALL`, free cells
//! hold just the slot name.

use chrono::Weekday;
use html_scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{ExtractError, cell_text, non_empty, row_cells, selector};
use crate::portal::models::TimetableEntry;

pub const CONTAINER: &str = "table#timeTableStyle";

static CONTAINER_SEL: LazyLock<Selector> = LazyLock::new(|| selector(CONTAINER));
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| selector("tr"));

pub fn parse(body: &str) -> Result<Vec<TimetableEntry>, ExtractError> {
    let document = Html::parse_document(body);
    let table = document
        .select(&CONTAINER_SEL)
        .next()
        .ok_or(ExtractError::MarkupMismatch {
            page: "timetable",
            selector: CONTAINER,
        })?;

    let mut day: Option<Weekday> = None;
    let mut entries = Vec::new();
    for row in table.select(&ROW_SEL) {
        let text: Vec<String> = row_cells(row).into_iter().map(cell_text).collect();
        let mut cells = text.iter().map(String::as_str).peekable();

        if let Some(parsed) = cells.peek().and_then(|c| parse_day(c)) {
            day = Some(parsed);
            cells.next();
        }
        let Some(day) = day else {
            continue;
        };

        for cell in cells {
            if matches!(cell, "THEORY" | "LAB" | "") || cell.eq_ignore_ascii_case("lunch") {
                continue;
            }
            if let Some(entry) = parse_cell(day, cell) {
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}

fn parse_day(cell: &str) -> Option<Weekday> {
    match cell.to_ascii_uppercase().as_str() {
        "MON" => Some(Weekday::Mon),
        "TUE" => Some(Weekday::Tue),
        "WED" => Some(Weekday::Wed),
        "THU" => Some(Weekday::Thu),
        "FRI" => Some(Weekday::Fri),
        "SAT" => Some(Weekday::Sat),
        "SUN" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Returns `None` for free slots (a cell without a course code).
fn parse_cell(day: Weekday, cell: &str) -> Option<TimetableEntry> {
    let mut parts: Vec<&str> = cell.split('-').map(str::trim).collect();
    if parts.last().is_some_and(|p| p.eq_ignore_ascii_case("ALL")) {
        parts.pop();
    }
    if parts.len() < 2 {
        return None;
    }
    let part = |i: usize| parts.get(i).and_then(|p| non_empty(p));
    let venue = (parts.len() > 3).then(|| parts[3..].join("-"));

    Some(TimetableEntry {
        day,
        slot: parts[0].to_owned(),
        course_code: part(1),
        component: part(2),
        venue: venue.and_then(|v| non_empty(&v)),
        label: cell.to_owned(),
    })
}
