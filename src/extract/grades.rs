//! Grade history page (`examinations/examGradeView/StudentGradeHistory`).
//!
//! Two tables matter: the credit/CGPA summary with grade distribution, and the
//! per-semester GPA/CGPA trend. Either may be absent for a first-year student;
//! only losing both is treated as a markup change.

use html_scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

use super::{ExtractError, cell_text, non_empty, parse_count, parse_decimal, row_cells, selector};
use crate::portal::models::{CgpaSnapshot, GradeCount, GradeHistory, GradeSummary};

pub const SUMMARY_TABLE: &str = "div.table-responsive table.table:not(.customTable)";
pub const TREND_TABLE: &str = "table.customTable";

static SUMMARY_SEL: LazyLock<Selector> = LazyLock::new(|| selector(SUMMARY_TABLE));
static TREND_SEL: LazyLock<Selector> = LazyLock::new(|| selector(TREND_TABLE));
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| selector("tr"));

/// Grade columns following credits registered, credits earned and CGPA.
const GRADES: [&str; 8] = ["S", "A", "B", "C", "D", "E", "F", "N"];

pub fn parse(body: &str) -> Result<GradeHistory, ExtractError> {
    let document = Html::parse_document(body);
    let summary_table = document.select(&SUMMARY_SEL).next();
    let trend_table = document.select(&TREND_SEL).next();

    if summary_table.is_none() && trend_table.is_none() {
        return Err(ExtractError::MarkupMismatch {
            page: "grade history",
            selector: SUMMARY_TABLE,
        });
    }

    Ok(GradeHistory {
        summary: summary_table.and_then(parse_summary),
        trend: trend_table.map(parse_trend).unwrap_or_default(),
    })
}

fn parse_summary(table: ElementRef<'_>) -> Option<GradeSummary> {
    table.select(&ROW_SEL).find_map(|row| {
        let text: Vec<String> = row_cells(row).into_iter().map(cell_text).collect();
        // Header rows carry labels, not numbers.
        if text.len() < 3 || text.iter().all(|c| parse_decimal(c).is_none()) {
            return None;
        }
        let credits_registered = parse_decimal(&text[0]);

        let grades = GRADES
            .iter()
            .enumerate()
            .filter_map(|(i, grade)| {
                text.get(3 + i).map(|c| GradeCount {
                    grade: (*grade).to_owned(),
                    count: parse_count(c),
                })
            })
            .collect();

        Some(GradeSummary {
            credits_registered,
            credits_earned: text.get(1).and_then(|c| parse_decimal(c)),
            cgpa: text.get(2).and_then(|c| parse_decimal(c)),
            grades,
        })
    })
}

fn parse_trend(table: ElementRef<'_>) -> Vec<CgpaSnapshot> {
    table
        .select(&ROW_SEL)
        .filter_map(|row| {
            let text: Vec<String> = row_cells(row).into_iter().map(cell_text).collect();
            if text.len() < 3 || text[0].to_ascii_lowercase().starts_with("semester") {
                return None;
            }
            Some(CgpaSnapshot {
                term: non_empty(&text[0])?,
                gpa: parse_decimal(&text[1]),
                cgpa: parse_decimal(&text[2]),
            })
        })
        .collect()
}
