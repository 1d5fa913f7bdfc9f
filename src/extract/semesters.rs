//! Semester dropdown shared by the term-scoped pages.

use html_scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{ExtractError, cell_text, non_empty, selector};
use crate::portal::models::Term;

pub const CONTAINER: &str = "select#semesterSubId";

static SELECT_SEL: LazyLock<Selector> = LazyLock::new(|| selector(CONTAINER));
static OPTION_SEL: LazyLock<Selector> = LazyLock::new(|| selector("option"));

/// Parse the semester list, oldest first.
///
/// The portal lists newest first and leads with a "Choose Semester"
/// placeholder that has an empty value.
pub fn parse(body: &str) -> Result<Vec<Term>, ExtractError> {
    let document = Html::parse_document(body);
    let select = document
        .select(&SELECT_SEL)
        .next()
        .ok_or(ExtractError::MarkupMismatch {
            page: "semester list",
            selector: CONTAINER,
        })?;

    let mut listed: Vec<(String, String)> = select
        .select(&OPTION_SEL)
        .filter_map(|option| {
            let id = non_empty(option.value().attr("value")?)?;
            let label = non_empty(&cell_text(option)).unwrap_or_else(|| id.clone());
            Some((id, label))
        })
        .collect();
    listed.reverse();

    Ok(listed
        .into_iter()
        .enumerate()
        .map(|(ordinal, (id, label))| Term::new(id, label, ordinal))
        .collect())
}
