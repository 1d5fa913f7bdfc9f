//! HTML extractors, one per record kind.
//!
//! Every extractor follows the same contract: locate a known container, walk
//! its rows, parse each column independently. A cell that does not parse
//! becomes `None` on that record; the row is kept. The only error is a missing
//! container, which means the portal markup no longer matches what we expect.

pub mod attendance;
pub mod exams;
pub mod grades;
pub mod marks;
pub mod semesters;
pub mod timetable;

use html_scraper::{ElementRef, Selector};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("{page} page has no `{selector}` element")]
    MarkupMismatch {
        page: &'static str,
        selector: &'static str,
    },
}

/// Parse a selector known at compile time.
pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

/// Text content of an element with runs of whitespace collapsed to one space.
pub(crate) fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Direct `<td>` children of a row. Nested tables are not descended into.
pub(crate) fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| matches!(child.value().name(), "td" | "th"))
        .collect()
}

pub(crate) fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty() && trimmed != "-").then(|| trimmed.to_owned())
}

/// Parse a decimal cell, tolerating a trailing `%`. Rejects NaN/inf.
pub(crate) fn parse_decimal(text: &str) -> Option<f64> {
    text.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub(crate) fn parse_count(text: &str) -> Option<u32> {
    text.trim().parse::<u32>().ok()
}

/// "SMITH JOHN" -> "Smith John".
pub(crate) fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use html_scraper::Html;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(" 12.5 "), Some(12.5));
        assert_eq!(parse_decimal("83%"), Some(83.0));
        assert_eq!(parse_decimal("83 %"), Some(83.0));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("AB"), None);
        assert_eq!(parse_decimal("NaN"), None);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("30"), Some(30));
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("3.5"), None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  x "), Some("x".to_owned()));
        assert_eq!(non_empty("   "), None);
        assert_eq!(non_empty("-"), None);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("SMITH  JOHN"), "Smith John");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_row_cells_skips_nested_tables() {
        let html = Html::parse_document(
            "<table><tr id=\"r\"><td>a</td><td><table><tr><td>inner</td></tr></table></td></tr></table>",
        );
        let row = html.select(&selector("tr#r")).next().unwrap();
        let cells = row_cells(row);
        assert_eq!(cells.len(), 2);
        assert_eq!(cell_text(cells[0]), "a");
    }
}
