//! Builds the export document from every record endpoint.
//!
//! One fallback loop serves every term-scoped kind: candidates are tried newest
//! first, a session expiry triggers one shared re-authentication and a retry of
//! the same candidate, and the first candidate yielding records wins. Kinds run
//! concurrently; candidates within a kind run sequentially.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::extract::{self, ExtractError};
use crate::gate::ExportSource;
use crate::policy::AttendancePolicy;
use crate::portal::models::{
    AttendanceRecord, Diagnostic, DiagnosticReason, ExamEvent, ExportDocument, GradeHistory,
    MarksSummary, RecordKind, Slice, Term, TimetableEntry,
};
use crate::portal::{
    Endpoint, FetchOutcome, PortalPage, PortalTransport, SessionHandle, SessionManager, TermCatalog,
    TermRequest, TermResolver,
};
use crate::utils::{fmt_duration, log_if_slow};

const SLOW_BUILD: Duration = Duration::from_secs(30);

/// Result of one page fetch after session recovery.
enum Attempt {
    Page(PortalPage),
    NoData,
    Failed(DiagnosticReason),
}

/// Records of a single kind, for callers that want one slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordSet {
    Terms(Vec<Term>),
    Marks(Vec<MarksSummary>),
    Attendance(Vec<AttendanceRecord>),
    Exams(Vec<ExamEvent>),
    Timetable(Vec<TimetableEntry>),
    GradeHistory(GradeHistory),
}

impl RecordSet {
    pub fn len(&self) -> usize {
        match self {
            RecordSet::Terms(r) => r.len(),
            RecordSet::Marks(r) => r.len(),
            RecordSet::Attendance(r) => r.len(),
            RecordSet::Exams(r) => r.len(),
            RecordSet::Timetable(r) => r.len(),
            RecordSet::GradeHistory(h) => usize::from(h.summary.is_some()) + h.trend.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindReport {
    pub kind: RecordKind,
    pub source_term: Option<Term>,
    pub records: RecordSet,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Aggregator {
    transport: Arc<dyn PortalTransport>,
    sessions: Arc<SessionManager>,
    catalog: TermCatalog,
    policy: AttendancePolicy,
    fallback_depth: Option<usize>,
    timezone: Tz,
}

impl Aggregator {
    pub fn new(
        transport: Arc<dyn PortalTransport>,
        sessions: Arc<SessionManager>,
        policy: AttendancePolicy,
        fallback_depth: Option<usize>,
        timezone: Tz,
    ) -> Self {
        Self {
            transport,
            sessions,
            catalog: TermCatalog::default(),
            policy,
            fallback_depth,
            timezone,
        }
    }

    /// Collect every kind into one document. Never fails: whatever could not be
    /// gathered is left empty and explained in `diagnostics`.
    #[instrument(skip_all, fields(registration = %handle.registration))]
    pub async fn build(&self, handle: &SessionHandle) -> ExportDocument {
        let start = Instant::now();
        let mut lead = handle.clone();
        let mut diagnostics = Vec::new();

        let terms = match self.list_terms(&mut lead).await {
            Ok(terms) => terms,
            Err(reason) => {
                warn!(reason = %reason, "Could not list terms");
                diagnostics.push(Diagnostic::failure(RecordKind::Terms, None, reason));
                Arc::new(Vec::new())
            }
        };
        let resolver = TermResolver::new(terms, self.fallback_depth);
        let candidates = resolver.candidates_for(&TermRequest::Latest);

        let policy = self.policy;
        let timezone = self.timezone;
        let (marks, attendance, exams, timetable, (grades, grade_diagnostics)) = futures::join!(
            self.resolve(
                lead.clone(),
                RecordKind::Marks,
                Endpoint::Marks,
                &candidates,
                extract::marks::parse,
            ),
            self.resolve(
                lead.clone(),
                RecordKind::Attendance,
                Endpoint::Attendance,
                &candidates,
                |body| extract::attendance::parse(body, &policy),
            ),
            self.resolve(
                lead.clone(),
                RecordKind::Exams,
                Endpoint::ExamSchedule,
                &candidates,
                |body| extract::exams::parse(body, timezone),
            ),
            self.resolve(
                lead.clone(),
                RecordKind::Timetable,
                Endpoint::Timetable,
                &candidates,
                extract::timetable::parse,
            ),
            self.grade_history(lead.clone()),
        );

        let (marks, marks_diagnostics) = marks;
        let (attendance, attendance_diagnostics) = attendance;
        let (exams, exams_diagnostics) = exams;
        let (timetable, timetable_diagnostics) = timetable;
        diagnostics.extend(
            [
                marks_diagnostics,
                attendance_diagnostics,
                exams_diagnostics,
                timetable_diagnostics,
                grade_diagnostics,
            ]
            .into_iter()
            .flatten(),
        );

        let current_term = marks
            .source_term
            .as_ref()
            .or_else(|| resolver.newest())
            .map(|t| t.label.clone());

        let document = ExportDocument {
            identity: handle.registration.clone(),
            generated_at: Utc::now(),
            current_term,
            marks,
            attendance,
            exams,
            timetable,
            cgpa: grades.current_cgpa(),
            cgpa_trend: grades.trend,
            grade_summary: grades.summary,
            diagnostics,
        };

        info!(
            duration = fmt_duration(start.elapsed()),
            failures = document.failures().count(),
            "Export document built"
        );
        log_if_slow(start, SLOW_BUILD, "export build");
        document
    }

    /// Fetch one kind for the requested term(s).
    #[instrument(skip(self, handle), fields(registration = %handle.registration))]
    pub async fn fetch_kind(
        &self,
        handle: &SessionHandle,
        kind: RecordKind,
        request: &TermRequest,
    ) -> KindReport {
        let mut handle = handle.clone();
        let terms = match self.list_terms(&mut handle).await {
            Ok(terms) => terms,
            Err(reason) => {
                return KindReport {
                    kind,
                    source_term: None,
                    records: empty_set(kind),
                    diagnostics: vec![Diagnostic::failure(RecordKind::Terms, None, reason)],
                };
            }
        };
        let candidates = TermResolver::new(terms.clone(), self.fallback_depth).candidates_for(request);

        let policy = self.policy;
        let timezone = self.timezone;
        let (source_term, records, diagnostics) = match kind {
            RecordKind::Terms => (None, RecordSet::Terms(terms.as_ref().clone()), Vec::new()),
            RecordKind::Marks => {
                let (slice, d) = self
                    .resolve(handle, kind, Endpoint::Marks, &candidates, extract::marks::parse)
                    .await;
                (slice.source_term, RecordSet::Marks(slice.records), d)
            }
            RecordKind::Attendance => {
                let (slice, d) = self
                    .resolve(handle, kind, Endpoint::Attendance, &candidates, |body| {
                        extract::attendance::parse(body, &policy)
                    })
                    .await;
                (slice.source_term, RecordSet::Attendance(slice.records), d)
            }
            RecordKind::Exams => {
                let (slice, d) = self
                    .resolve(handle, kind, Endpoint::ExamSchedule, &candidates, |body| {
                        extract::exams::parse(body, timezone)
                    })
                    .await;
                (slice.source_term, RecordSet::Exams(slice.records), d)
            }
            RecordKind::Timetable => {
                let (slice, d) = self
                    .resolve(handle, kind, Endpoint::Timetable, &candidates, extract::timetable::parse)
                    .await;
                (slice.source_term, RecordSet::Timetable(slice.records), d)
            }
            RecordKind::GradeHistory => {
                let (history, d) = self.grade_history(handle).await;
                (None, RecordSet::GradeHistory(history), d)
            }
        };

        KindReport {
            kind,
            source_term,
            records,
            diagnostics,
        }
    }

    /// Terms oldest first, cached for the session generation once non-empty.
    async fn list_terms(&self, handle: &mut SessionHandle) -> Result<Arc<Vec<Term>>, DiagnosticReason> {
        *handle = self.sessions.latest(handle);
        if let Some(terms) = self.catalog.get(handle.generation) {
            return Ok(terms);
        }

        let terms = match self.fetch_page(handle, Endpoint::SemesterList, None).await {
            Attempt::Page(page) => extract::semesters::parse(&page.body).map_err(markup)?,
            Attempt::NoData => Vec::new(),
            Attempt::Failed(reason) => return Err(reason),
        };
        debug!(count = terms.len(), "Listed terms");

        let terms = Arc::new(terms);
        // An empty list is retried on the next call.
        if !terms.is_empty() {
            self.catalog.put(handle.generation, terms.clone());
        }
        Ok(terms)
    }

    /// The unified fallback loop.
    async fn resolve<T, F>(
        &self,
        mut handle: SessionHandle,
        kind: RecordKind,
        endpoint: Endpoint,
        candidates: &[Term],
        extract: F,
    ) -> (Slice<T>, Vec<Diagnostic>)
    where
        T: Send,
        F: Fn(&str) -> Result<Vec<T>, ExtractError> + Send + Sync,
    {
        let mut diagnostics = Vec::new();
        if candidates.is_empty() {
            diagnostics.push(Diagnostic::failure(kind, None, DiagnosticReason::NoTerms));
            return (Slice::default(), diagnostics);
        }

        for term in candidates {
            let reason = match self.fetch_page(&mut handle, endpoint, Some(term)).await {
                Attempt::Page(page) => match extract(&page.body) {
                    Ok(records) if !records.is_empty() => {
                        info!(kind = %kind, term = %term, records = records.len(), "Resolved");
                        return (
                            Slice {
                                source_term: Some(term.clone()),
                                records,
                            },
                            diagnostics,
                        );
                    }
                    Ok(_) => DiagnosticReason::NoData,
                    Err(e) => {
                        warn!(kind = %kind, term = %term, error = %e, "Markup mismatch");
                        markup(e)
                    }
                },
                Attempt::NoData => DiagnosticReason::NoData,
                Attempt::Failed(reason) => reason,
            };
            debug!(kind = %kind, term = %term, reason = %reason, "Candidate yielded nothing");
            diagnostics.push(Diagnostic::new(kind, Some(term), reason));
        }

        diagnostics.push(Diagnostic::failure(
            kind,
            None,
            DiagnosticReason::Exhausted {
                tried: candidates.len(),
            },
        ));
        (Slice::default(), diagnostics)
    }

    async fn grade_history(&self, mut handle: SessionHandle) -> (GradeHistory, Vec<Diagnostic>) {
        let kind = RecordKind::GradeHistory;
        let reason = match self.fetch_page(&mut handle, Endpoint::GradeHistory, None).await {
            Attempt::Page(page) => match extract::grades::parse(&page.body) {
                Ok(history) if !history.is_empty() => return (history, Vec::new()),
                Ok(_) => DiagnosticReason::NoData,
                Err(e) => markup(e),
            },
            Attempt::NoData => DiagnosticReason::NoData,
            Attempt::Failed(reason) => reason,
        };
        (
            GradeHistory::default(),
            vec![Diagnostic::failure(kind, None, reason)],
        )
    }

    /// Fetch a page, re-authenticating once if the session has expired.
    async fn fetch_page(
        &self,
        handle: &mut SessionHandle,
        endpoint: Endpoint,
        term: Option<&Term>,
    ) -> Attempt {
        *handle = self.sessions.latest(handle);
        match self.transport.fetch(handle, endpoint, term).await {
            FetchOutcome::SessionExpired => {}
            outcome => return Attempt::from_outcome(outcome, DiagnosticReason::SessionExpired),
        }

        info!(endpoint = ?endpoint, generation = handle.generation, "Session expired, re-authenticating");
        match self.sessions.refresh(handle).await {
            Ok(fresh) => *handle = fresh,
            Err(e) => {
                return Attempt::Failed(DiagnosticReason::ReauthFailed {
                    cause: e.to_string(),
                });
            }
        }
        let outcome = self.transport.fetch(handle, endpoint, term).await;
        Attempt::from_outcome(outcome, DiagnosticReason::SessionExpired)
    }
}

impl Attempt {
    fn from_outcome(outcome: FetchOutcome, on_expired: DiagnosticReason) -> Self {
        match outcome {
            FetchOutcome::Ok(page) => Attempt::Page(page),
            FetchOutcome::NoDataForTerm => Attempt::NoData,
            FetchOutcome::TransportError(cause) => Attempt::Failed(DiagnosticReason::Transport { cause }),
            FetchOutcome::SessionExpired => Attempt::Failed(on_expired),
        }
    }
}

fn markup(err: ExtractError) -> DiagnosticReason {
    DiagnosticReason::MarkupMismatch {
        detail: err.to_string(),
    }
}

fn empty_set(kind: RecordKind) -> RecordSet {
    match kind {
        RecordKind::Terms => RecordSet::Terms(Vec::new()),
        RecordKind::Marks => RecordSet::Marks(Vec::new()),
        RecordKind::Attendance => RecordSet::Attendance(Vec::new()),
        RecordKind::Exams => RecordSet::Exams(Vec::new()),
        RecordKind::Timetable => RecordSet::Timetable(Vec::new()),
        RecordKind::GradeHistory => RecordSet::GradeHistory(GradeHistory::default()),
    }
}

#[async_trait]
impl ExportSource for Aggregator {
    async fn build(&self, handle: &SessionHandle) -> ExportDocument {
        Aggregator::build(self, handle).await
    }
}
