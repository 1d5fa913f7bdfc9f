//! The shared wire protocol of the record endpoints and response classification.

use async_trait::async_trait;
use html_scraper::{Html, Selector};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use super::login::{USER_AGENT, is_login_page};
use super::models::Term;
use super::session::SessionHandle;
use crate::extract::{self, selector};
use crate::utils::fmt_duration;

/// Boundary the portal's own browser client uses; some endpoints reject others.
pub const BOUNDARY: &str = "----WebKitFormBoundary9yjNZXu7BBjgQK7J";

const NO_DATA_MARKERS: [&str; 4] = [
    "no data found",
    "no records found",
    "no record found",
    "no data available",
];
const EXPIRED_MARKERS: [&str; 4] = [
    "session timed out",
    "session has expired",
    "session expired",
    "you are logged out",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Marks page opened from the menu; its dropdown lists the semesters.
    SemesterList,
    Marks,
    Attendance,
    ExamSchedule,
    Timetable,
    GradeHistory,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::SemesterList => "/vtop/examinations/StudentMarkView",
            Endpoint::Marks => "/vtop/examinations/doStudentMarkView",
            Endpoint::Attendance => "/vtop/processViewStudentAttendance",
            Endpoint::ExamSchedule => "/vtop/examinations/doSearchExamScheduleForStudent",
            Endpoint::Timetable => "/vtop/processViewTimeTable",
            Endpoint::GradeHistory => "/vtop/examinations/examGradeView/StudentGradeHistory",
        }
    }

    pub fn is_term_scoped(self) -> bool {
        matches!(
            self,
            Endpoint::Marks | Endpoint::Attendance | Endpoint::ExamSchedule | Endpoint::Timetable
        )
    }

    /// Element whose presence proves the page has real content, used to tell an
    /// empty-result notice apart from a populated page that merely mentions one.
    fn data_selector(self) -> &'static str {
        match self {
            Endpoint::SemesterList => extract::semesters::CONTAINER,
            Endpoint::Marks => extract::marks::CONTAINER,
            Endpoint::Attendance => extract::attendance::CONTAINER,
            Endpoint::ExamSchedule => extract::exams::CONTAINER,
            Endpoint::Timetable => extract::timetable::CONTAINER,
            Endpoint::GradeHistory => extract::grades::TREND_TABLE,
        }
    }
}

/// Multipart body with the fixed boundary, fields in the given order.
pub fn multipart_body(fields: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalPage {
    pub endpoint: Endpoint,
    pub term: Option<Term>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ok(PortalPage),
    SessionExpired,
    NoDataForTerm,
    TransportError(String),
}

#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn fetch(
        &self,
        handle: &SessionHandle,
        endpoint: Endpoint,
        term: Option<&Term>,
    ) -> FetchOutcome;
}

pub struct EndpointAdapter {
    http: reqwest::Client,
    base_url: Url,
}

impl EndpointAdapter {
    pub fn new(base_url: Url, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http, base_url })
    }

    fn body_for(handle: &SessionHandle, endpoint: Endpoint, term: Option<&Term>) -> String {
        let mut fields = vec![("authorizedID", handle.registration.as_str())];
        if endpoint.is_term_scoped()
            && let Some(term) = term
        {
            fields.push(("semesterSubId", term.id.as_str()));
        }
        if endpoint == Endpoint::SemesterList {
            fields.push(("verifyMenu", "true"));
        }
        fields.push(("_csrf", handle.cookies.csrf.as_str()));
        multipart_body(&fields)
    }
}

#[async_trait]
impl PortalTransport for EndpointAdapter {
    #[instrument(skip_all, fields(endpoint = ?endpoint, term = ?term.map(|t| t.id.as_str())))]
    async fn fetch(
        &self,
        handle: &SessionHandle,
        endpoint: Endpoint,
        term: Option<&Term>,
    ) -> FetchOutcome {
        let url = match self.base_url.join(endpoint.path()) {
            Ok(url) => url,
            Err(e) => return FetchOutcome::TransportError(format!("invalid portal URL: {e}")),
        };

        let start = Instant::now();
        let response = self
            .http
            .post(url)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(COOKIE, handle.cookies.header_value())
            .body(Self::body_for(handle, endpoint, term))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Portal request failed");
                return FetchOutcome::TransportError(e.to_string());
            }
        };
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return FetchOutcome::TransportError(format!("reading body: {e}")),
        };
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            duration = fmt_duration(start.elapsed()),
            "Portal responded"
        );

        classify(endpoint, term, status, location.as_deref(), body)
    }
}

/// Turn a raw response into a [`FetchOutcome`].
///
/// The portal answers an expired session with HTTP 200 and its login page, so
/// the document itself is inspected, not just the status.
pub fn classify(
    endpoint: Endpoint,
    term: Option<&Term>,
    status: StatusCode,
    location: Option<&str>,
    body: String,
) -> FetchOutcome {
    if status.is_server_error() {
        return FetchOutcome::TransportError(format!("portal returned {status}"));
    }
    if status.is_redirection() {
        return match location {
            Some(loc) if points_to_login(loc) => FetchOutcome::SessionExpired,
            Some(loc) => FetchOutcome::TransportError(format!("unexpected redirect to {loc}")),
            None => FetchOutcome::TransportError(format!("portal returned {status} without a location")),
        };
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return FetchOutcome::SessionExpired;
    }
    if !status.is_success() {
        return FetchOutcome::TransportError(format!("portal returned {status}"));
    }

    // Notice text only counts when the page has no real content.
    let lowered = body.to_lowercase();
    let mentions = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));
    if is_login_page(&body) || (mentions(&EXPIRED_MARKERS) && !has_data(endpoint, &body)) {
        return FetchOutcome::SessionExpired;
    }
    if mentions(&NO_DATA_MARKERS) && !has_data(endpoint, &body) {
        return FetchOutcome::NoDataForTerm;
    }

    FetchOutcome::Ok(PortalPage {
        endpoint,
        term: term.cloned(),
        body,
    })
}

fn points_to_login(location: &str) -> bool {
    let location = location.to_ascii_lowercase();
    location.contains("/login") || location.contains("/open/") || location.contains("sessiontimedout")
}

fn has_data(endpoint: Endpoint, body: &str) -> bool {
    let data_selector: Selector = selector(endpoint.data_selector());
    Html::parse_document(body)
        .select(&data_selector)
        .next()
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::session::Cookies;

    fn handle() -> SessionHandle {
        SessionHandle {
            registration: "22BCE1234".to_owned(),
            cookies: Cookies {
                csrf: "tok".to_owned(),
                session_id: "sid".to_owned(),
                server_id: None,
            },
            generation: 1,
        }
    }

    fn ok(body: &str) -> FetchOutcome {
        classify(Endpoint::Attendance, None, StatusCode::OK, None, body.to_owned())
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_body(&[("authorizedID", "22BCE1234"), ("_csrf", "tok")]);
        assert_eq!(
            body,
            "------WebKitFormBoundary9yjNZXu7BBjgQK7J\r\n\
             Content-Disposition: form-data; name=\"authorizedID\"\r\n\r\n22BCE1234\r\n\
             ------WebKitFormBoundary9yjNZXu7BBjgQK7J\r\n\
             Content-Disposition: form-data; name=\"_csrf\"\r\n\r\ntok\r\n\
             ------WebKitFormBoundary9yjNZXu7BBjgQK7J--\r\n"
        );
    }

    #[test]
    fn test_term_field_only_for_scoped_endpoints() {
        let term = Term::new("VL20242505", "Winter 2024-25", 3);
        let scoped = EndpointAdapter::body_for(&handle(), Endpoint::Marks, Some(&term));
        assert!(scoped.contains("name=\"semesterSubId\"\r\n\r\nVL20242505\r\n"));

        let unscoped = EndpointAdapter::body_for(&handle(), Endpoint::GradeHistory, Some(&term));
        assert!(!unscoped.contains("semesterSubId"));
        assert!(unscoped.contains("name=\"_csrf\"\r\n\r\ntok\r\n"));
    }

    #[test]
    fn test_login_page_with_200_is_session_expired() {
        let body = r#"<html><form id="vtopLoginForm"><input name="username"/></form></html>"#;
        assert_eq!(ok(body), FetchOutcome::SessionExpired);
        assert_eq!(
            ok("<html><body>Your session timed out. Please login again.</body></html>"),
            FetchOutcome::SessionExpired
        );
    }

    #[test]
    fn test_no_data_marker_without_table() {
        assert_eq!(
            ok("<html><body><span>No Records Found</span></body></html>"),
            FetchOutcome::NoDataForTerm
        );
    }

    #[test]
    fn test_no_data_marker_with_table_is_ok() {
        let body = r#"<html><table id="AttendanceDetailDataTable"><tr><td>No data found for debar</td></tr></table></html>"#;
        assert!(matches!(ok(body), FetchOutcome::Ok(_)));
    }

    #[test]
    fn test_expiry_notice_on_populated_page_is_ok() {
        let body = r#"<html>
            <div class="modal">Your session has expired. Please login again.</div>
            <table id="AttendanceDetailDataTable"><tr><td>BCSE203L</td><td>30</td><td>36</td></tr></table>
        </html>"#;
        assert!(matches!(ok(body), FetchOutcome::Ok(_)));
    }

    #[test]
    fn test_status_classification() {
        let classify_status = |status, location| {
            classify(Endpoint::Marks, None, status, location, String::new())
        };
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            FetchOutcome::TransportError(_)
        ));
        assert_eq!(
            classify_status(StatusCode::FOUND, Some("/vtop/login")),
            FetchOutcome::SessionExpired
        );
        assert!(matches!(
            classify_status(StatusCode::FOUND, Some("/vtop/content")),
            FetchOutcome::TransportError(_)
        ));
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, None),
            FetchOutcome::SessionExpired
        );
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None),
            FetchOutcome::TransportError(_)
        ));
    }

    #[test]
    fn test_ok_page_keeps_term() {
        let term = Term::new("VL1", "Fall", 0);
        let outcome = classify(
            Endpoint::Marks,
            Some(&term),
            StatusCode::OK,
            None,
            "<div id=\"fixedTableContainer\"></div>".to_owned(),
        );
        match outcome {
            FetchOutcome::Ok(page) => assert_eq!(page.term, Some(term)),
            other => panic!("expected Ok, got {other:?}"),
        }
    }
}
