//! Shared fixtures for integration tests: portal page builders and in-memory
//! stand-ins for the login flow and the record transport.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vtop::aggregate::Aggregator;
use vtop::policy::AttendancePolicy;
use vtop::portal::models::Term;
use vtop::portal::{
    AuthError, Cookies, Credentials, Endpoint, FetchOutcome, LoginFlow, LoginOutcome, PortalPage,
    PortalTransport, SessionHandle, SessionManager,
};
use vtop::store::{MemorySessionStore, SessionStore, StoredSession};

pub const REGISTRATION: &str = "22BCE1234";

/// Terms as the portal lists them: newest first.
pub const WINTER_24: (&str, &str) = ("VL20242505", "Winter Semester 2024-25");
pub const FALL_24: (&str, &str) = ("VL20242501", "Fall Semester 2024-25");
pub const FALL_23: (&str, &str) = ("VL20232401", "Fall Semester 2023-24");

pub fn cookies(session_id: &str) -> Cookies {
    Cookies {
        csrf: format!("csrf-{session_id}"),
        session_id: session_id.to_owned(),
        server_id: Some("s1".to_owned()),
    }
}

pub fn handle(generation: u64) -> SessionHandle {
    SessionHandle {
        registration: REGISTRATION.to_owned(),
        cookies: cookies(&format!("sess-{generation}")),
        generation,
    }
}

pub fn stored_session() -> StoredSession {
    StoredSession {
        account: REGISTRATION.to_owned(),
        registration: REGISTRATION.to_owned(),
        cookies: cookies("stored"),
        saved_at: Utc::now(),
    }
}

/// Login stand-in that counts calls and either succeeds or fails every time.
pub struct FakeLogin {
    pub calls: AtomicUsize,
    failure: Option<AuthError>,
}

impl FakeLogin {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failure: None,
        })
    }

    pub fn failing(err: AuthError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failure: Some(err),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginFlow for FakeLogin {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginOutcome, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(LoginOutcome {
            registration: REGISTRATION.to_owned(),
            cookies: cookies(&format!("fresh-{n}")),
        })
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Page(String),
    NoData,
    Expired,
    Transport(&'static str),
}

/// Transport answering from a script keyed by endpoint and term id.
///
/// Unscripted requests get "no data". Any handle older than `min_generation`
/// is answered with an expired session.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<HashMap<(Endpoint, Option<String>), Reply>>,
    min_generation: AtomicU64,
    calls: Mutex<Vec<(Endpoint, Option<String>, u64)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, endpoint: Endpoint, term: Option<&str>, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .insert((endpoint, term.map(str::to_owned)), reply);
        self
    }

    /// Treat every session below `generation` as expired.
    pub fn expire_below(&self, generation: u64) {
        self.min_generation.store(generation, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Endpoint, Option<String>, u64)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter(|(e, _, _)| *e == endpoint)
            .map(|(_, term, _)| term)
            .collect()
    }
}

#[async_trait]
impl PortalTransport for FakeTransport {
    async fn fetch(
        &self,
        handle: &SessionHandle,
        endpoint: Endpoint,
        term: Option<&Term>,
    ) -> FetchOutcome {
        let term_id = term.map(|t| t.id.as_str().to_owned());
        self.calls
            .lock()
            .unwrap()
            .push((endpoint, term_id.clone(), handle.generation));
        tokio::task::yield_now().await;

        if handle.generation < self.min_generation.load(Ordering::SeqCst) {
            return FetchOutcome::SessionExpired;
        }
        let reply = self.script.lock().unwrap().get(&(endpoint, term_id)).cloned();
        match reply {
            Some(Reply::Page(body)) => FetchOutcome::Ok(PortalPage {
                endpoint,
                term: term.cloned(),
                body,
            }),
            Some(Reply::Expired) => FetchOutcome::SessionExpired,
            Some(Reply::Transport(cause)) => FetchOutcome::TransportError(cause.to_owned()),
            Some(Reply::NoData) | None => FetchOutcome::NoDataForTerm,
        }
    }
}

pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub login: Arc<FakeLogin>,
    pub store: Arc<MemorySessionStore>,
    pub sessions: Arc<SessionManager>,
    pub aggregator: Aggregator,
}

impl Harness {
    /// Aggregator over the fake transport, with a stored (generation 1) session
    /// available to resume.
    pub async fn new(transport: Arc<FakeTransport>, login: Arc<FakeLogin>) -> Self {
        let store = Arc::new(MemorySessionStore::default());
        store.save(&stored_session()).await.unwrap();
        let sessions = Arc::new(SessionManager::new(
            login.clone(),
            store.clone(),
            REGISTRATION.to_lowercase(),
            Some("secret".to_owned()),
        ));
        let aggregator = Aggregator::new(
            transport.clone(),
            sessions.clone(),
            AttendancePolicy::default(),
            None,
            chrono_tz::Asia::Kolkata,
        );
        Self {
            transport,
            login,
            store,
            sessions,
            aggregator,
        }
    }
}

pub fn semesters_page(terms: &[(&str, &str)]) -> String {
    let options: String = terms
        .iter()
        .map(|(id, label)| format!("<option value=\"{id}\">{label}</option>"))
        .collect();
    format!(
        "<html><body><select id=\"semesterSubId\" name=\"semesterSubId\">\
         <option value=\"\">-- Choose Semester --</option>{options}</select></body></html>"
    )
}

pub fn marks_page(code: &str) -> String {
    format!(
        "<html><body><div id=\"fixedTableContainer\"><table class=\"customTable\">\
         <tr class=\"tableContent\"><td>1</td><td>VL2024</td><td>{code}</td><td>Database Systems</td>\
         <td>Embedded Theory</td><td>Regular</td><td>JANE DOE - SCOPE</td><td>A1+TA1</td></tr>\
         <tr class=\"tableContent\"><td colspan=\"9\"><table class=\"customTable-level1\">\
         <tr class=\"tableHeader-level1\"><td>Sl.No.</td><td>Mark Title</td><td>Max. Mark</td>\
         <td>Weightage %</td><td>Status</td><td>Scored Mark</td><td>Weightage Mark</td></tr>\
         <tr class=\"tableContent-level1\"><td>1</td><td>CAT-1</td><td>50</td><td>15</td>\
         <td>Present</td><td>40</td><td>12</td></tr></table></td></tr>\
         </table></div></body></html>"
    )
}

pub fn attendance_page(code: &str, attended: u32, total: u32) -> String {
    format!(
        "<html><body><table id=\"AttendanceDetailDataTable\"><thead><tr><th>Sl.No.</th>\
         <th>Class</th><th>Course</th><th>Slot</th><th>Faculty</th><th>Attended</th><th>Total</th>\
         <th>%</th><th>View</th></tr></thead><tbody><tr><td>1</td><td>VL2024</td>\
         <td>{code} - Database Systems - Embedded Theory</td><td>A1+TA1</td>\
         <td>JANE DOE - SCOPE</td><td>{attended}</td><td>{total}</td><td>83</td><td>View</td></tr>\
         </tbody></table></body></html>"
    )
}

pub fn exams_page(code: &str, date: &str) -> String {
    let cells = [
        "1", code, "Database Systems", "ETH", "VL2024250101", "A1+TA1", date, "FN", "09:15 AM",
        "09:30 AM - 11:00 AM", "SJT-401", "ROW-3", "17",
    ];
    let row: String = cells.iter().map(|c| format!("<td>{c}</td>")).collect();
    format!(
        "<html><body><table class=\"customTable\"><tr class=\"tableHeader\"><td>S.No.</td>\
         <td>Course Code</td><td>Course Title</td><td>Type</td><td>Class ID</td><td>Slot</td>\
         <td>Exam Date</td><td>Session</td><td>Reporting</td><td>Exam Time</td><td>Venue</td>\
         <td>Seat Location</td><td>Seat No.</td></tr><tr><td colspan=\"13\">FAT</td></tr>\
         <tr>{row}</tr></table></body></html>"
    )
}

pub fn timetable_page(code: &str) -> String {
    format!(
        "<html><body><table id=\"timeTableStyle\">\
         <tr><td>THEORY</td><td>Start</td><td>08:00</td></tr>\
         <tr><td>MON</td><td>THEORY</td><td>A1-{code}-ETH-SJT401-ALL</td></tr>\
         </table></body></html>"
    )
}

pub fn grades_page() -> String {
    "<html><body><table class=\"customTable\">\
     <tr><td>Semester</td><td>GPA</td><td>CGPA</td></tr>\
     <tr><td>Fall Semester 2023-24</td><td>8.90</td><td>8.90</td></tr>\
     <tr><td>Fall Semester 2024-25</td><td>8.52</td><td>8.71</td></tr>\
     </table></body></html>"
        .to_owned()
}

/// Script every kind to have data in `term_id`, and grades.
pub fn script_full_term(transport: &FakeTransport, term_id: &str) {
    transport
        .on(Endpoint::Marks, Some(term_id), Reply::Page(marks_page("BCSE203L")))
        .on(
            Endpoint::Attendance,
            Some(term_id),
            Reply::Page(attendance_page("BCSE203L", 30, 36)),
        )
        .on(
            Endpoint::ExamSchedule,
            Some(term_id),
            Reply::Page(exams_page("BCSE203L", "20-Nov-2024")),
        )
        .on(Endpoint::Timetable, Some(term_id), Reply::Page(timetable_page("BCSE203L")))
        .on(Endpoint::GradeHistory, None, Reply::Page(grades_page()));
}
