//! Exam schedule page (`examinations/doSearchExamScheduleForStudent`).
//!
//! Rows are grouped under single-cell caption rows naming the exam (CAT1, FAT, ...).

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use html_scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

use super::{ExtractError, cell_text, non_empty, row_cells, selector};
use crate::portal::models::ExamEvent;

pub const CONTAINER: &str = "table.customTable";

static CONTAINER_SEL: LazyLock<Selector> = LazyLock::new(|| selector(CONTAINER));
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| selector("tr"));

const CODE: usize = 1;
const TITLE: usize = 2;
const SLOT: usize = 5;
const DATE: usize = 6;
const SESSION: usize = 7;
const REPORTING: usize = 8;
const EXAM_TIME: usize = 9;
const VENUE: usize = 10;
const SEAT_LOCATION: usize = 11;
const SEAT_NUMBER: usize = 12;

pub fn parse(body: &str, timezone: Tz) -> Result<Vec<ExamEvent>, ExtractError> {
    let document = Html::parse_document(body);
    let table = document
        .select(&CONTAINER_SEL)
        .next()
        .ok_or(ExtractError::MarkupMismatch {
            page: "exams",
            selector: CONTAINER,
        })?;

    let mut exam: Option<String> = None;
    let mut events = Vec::new();
    for row in table.select(&ROW_SEL) {
        let text: Vec<String> = row_cells(row).into_iter().map(cell_text).collect();
        match text.len() {
            0 => continue,
            1 => {
                exam = non_empty(&text[0]);
                continue;
            }
            n if n <= VENUE => {
                debug!(cells = n, "Skipping short exam schedule row");
                continue;
            }
            _ => {}
        }
        if text[0].eq_ignore_ascii_case("S.No.") {
            continue;
        }
        let Some(course_code) = non_empty(&text[CODE]) else {
            continue;
        };

        let cell = |i: usize| text.get(i).and_then(|c| non_empty(c));
        let date = cell(DATE).and_then(|d| parse_date(&d));
        let exam_time = cell(EXAM_TIME);
        let starts_at = date
            .zip(exam_time.as_deref().and_then(parse_start_time))
            .and_then(|(d, t)| localize(timezone, d, t));

        events.push(ExamEvent {
            course_code,
            course_title: cell(TITLE),
            exam: exam.clone(),
            slot: cell(SLOT),
            date,
            session: cell(SESSION),
            reporting_time: cell(REPORTING),
            exam_time,
            starts_at,
            venue: cell(VENUE),
            seat_location: cell(SEAT_LOCATION),
            seat_number: cell(SEAT_NUMBER),
        });
    }
    Ok(events)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%d-%b-%Y").ok()
}

/// "09:30 AM - 11:00 AM" -> 09:30.
fn parse_start_time(text: &str) -> Option<NaiveTime> {
    let start = text.split('-').next()?.trim();
    NaiveTime::parse_from_str(start, "%I:%M %p").ok()
}

fn localize(timezone: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<FixedOffset>> {
    timezone
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.fixed_offset())
}
