use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::parse_duration;
use crate::portal::TermRequest;
use crate::portal::models::{RecordKind, TermId};

/// Fetch marks, attendance, exams, timetable and grade history from VTOP.
#[derive(Parser, Debug)]
#[command(
    name = "vtop",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_SHORT"), ")"),
    about
)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty, global = true)]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the session
    Login,
    /// Build the full export document
    Export {
        /// Ignore the cached document (still paced)
        #[arg(long)]
        force: bool,
        /// Serve a cached document only if younger than this (e.g. `10m`)
        #[arg(long, value_parser = parse_duration, conflicts_with = "force")]
        max_age: Option<Duration>,
        /// Write JSON here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Fetch a single record kind
    Get {
        #[arg(value_enum)]
        kind: KindArg,
        /// Exact term id (`semesterSubId`), no fallback
        #[arg(long, conflicts_with = "back")]
        term: Option<String>,
        /// Term this many steps behind the newest, no fallback
        #[arg(long)]
        back: Option<usize>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show stored session and cache state
    Status,
    /// Drop the cached export document
    Clear,
    /// Forget the stored session
    Logout,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Compact human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Terms,
    Marks,
    Attendance,
    Exams,
    Timetable,
    Grades,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Terms => RecordKind::Terms,
            KindArg::Marks => RecordKind::Marks,
            KindArg::Attendance => RecordKind::Attendance,
            KindArg::Exams => RecordKind::Exams,
            KindArg::Timetable => RecordKind::Timetable,
            KindArg::Grades => RecordKind::GradeHistory,
        }
    }
}

/// `--term` wins over `--back`; neither means the freshest term with data.
pub fn term_request(term: Option<String>, back: Option<usize>) -> TermRequest {
    match (term, back) {
        (Some(id), _) => TermRequest::Exact(TermId::new(id)),
        (None, Some(n)) => TermRequest::Back(n),
        (None, None) => TermRequest::Latest,
    }
}
