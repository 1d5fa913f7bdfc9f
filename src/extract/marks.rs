//! Marks page (`examinations/doStudentMarkView`).
//!
//! The page is one outer table whose `tr.tableContent` rows alternate between a
//! course row and a row holding that course's nested component table
//! (`table.customTable-level1`). A course with nothing published yet may have
//! no component row at all.

use html_scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{ExtractError, cell_text, non_empty, parse_decimal, row_cells, selector};
use crate::portal::models::{CourseInfo, CourseType, MarksComponent, MarksSummary};

pub const CONTAINER: &str = "div#fixedTableContainer";

static CONTAINER_SEL: LazyLock<Selector> = LazyLock::new(|| selector(CONTAINER));
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| selector("tr.tableContent"));
static COMPONENT_TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| selector("table.customTable-level1"));
static COMPONENT_ROW_SEL: LazyLock<Selector> = LazyLock::new(|| selector("tr"));

const CODE: usize = 2;
const TITLE: usize = 3;
const COURSE_TYPE: usize = 4;
const FACULTY: usize = 6;
const SLOT: usize = 7;

pub fn parse(body: &str) -> Result<Vec<MarksSummary>, ExtractError> {
    let document = Html::parse_document(body);
    let container = document
        .select(&CONTAINER_SEL)
        .next()
        .ok_or(ExtractError::MarkupMismatch {
            page: "marks",
            selector: CONTAINER,
        })?;

    let mut summaries: Vec<(CourseInfo, Vec<MarksComponent>)> = Vec::new();
    for row in container.select(&ROW_SEL) {
        if let Some(table) = row.select(&COMPONENT_TABLE_SEL).next() {
            match summaries.last_mut() {
                Some((_, components)) => components.extend(parse_components(table)),
                None => warn!("Component table before any course row, skipping"),
            }
            continue;
        }

        match parse_course(row) {
            Some(course) => summaries.push((course, Vec::new())),
            None => debug!(row = %cell_text(row), "Skipping marks row without a course code"),
        }
    }

    Ok(summaries
        .into_iter()
        .map(|(course, components)| MarksSummary::new(course, components))
        .collect())
}

fn parse_course(row: ElementRef<'_>) -> Option<CourseInfo> {
    let cells: Vec<String> = row_cells(row).into_iter().map(cell_text).collect();
    let text = |i: usize| cells.get(i).and_then(|c| non_empty(c));

    let code = text(CODE)?;
    Some(CourseInfo {
        code,
        title: text(TITLE),
        course_type: text(COURSE_TYPE).map(|t| CourseType::from_label(&t)),
        faculty: text(FACULTY),
        slot: text(SLOT),
    })
}

fn parse_components(table: ElementRef<'_>) -> Vec<MarksComponent> {
    table
        .select(&COMPONENT_ROW_SEL)
        .filter_map(|row| {
            let cells: Vec<String> = row_cells(row).into_iter().map(cell_text).collect();
            let first = cells.first().map(String::as_str).unwrap_or("");
            if matches!(first, "" | "Sl.No." | "Index") {
                return None;
            }
            let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");
            let label = non_empty(cell(1))?;
            Some(MarksComponent {
                label,
                max_marks: parse_decimal(cell(2)),
                weight: parse_decimal(cell(3)),
                status: non_empty(cell(4)),
                scored: parse_decimal(cell(5)),
                weighted: parse_decimal(cell(6)),
            })
        })
        .collect()
}
