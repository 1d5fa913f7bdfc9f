//! The portal's login handshake.
//!
//! landing page (`_csrf` + cookies) -> pre-login setup -> login page with an
//! optional captcha -> credential POST -> post-login page carrying the
//! registration number.

use async_trait::async_trait;
use base64::Engine;
use html_scraper::{Html, Selector};
use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::errors::AuthError;
use super::session::{AFFINITY_COOKIE, Cookies, Credentials, SESSION_COOKIE};
use crate::extract::selector;

pub const USER_AGENT: &str = concat!("vtop/", env!("CARGO_PKG_VERSION"));

static CSRF_SEL: LazyLock<Selector> = LazyLock::new(|| selector("input[name=_csrf]"));
static LOGIN_FORM_SEL: LazyLock<Selector> =
    LazyLock::new(|| selector("form#vtopLoginForm, input[name=captchaStr]"));
static CAPTCHA_SEL: LazyLock<Selector> = LazyLock::new(|| selector("#captchaBlock img"));
static REGISTRATION_SEL: LazyLock<Selector> =
    LazyLock::new(|| selector("input#authorizedIDX, input[name=authorizedID]"));

static BAD_CREDENTIALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)invalid\s+(?:user\s*name|login\s*id|password|credentials)|account\s+is\s+locked")
        .expect("valid regex")
});
static BAD_CAPTCHA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)invalid\s+captcha").expect("valid regex"));

/// A visual challenge shown on the login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub mime: String,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub registration: String,
    pub cookies: Cookies,
}

#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, challenge: &Challenge) -> Result<String, AuthError>;
}

/// Solver for non-interactive runs: any challenge fails the login.
pub struct RejectChallenges;

#[async_trait]
impl ChallengeSolver for RejectChallenges {
    async fn solve(&self, _challenge: &Challenge) -> Result<String, AuthError> {
        Err(AuthError::ChallengeFailed(
            "captcha required but no solver is available".to_owned(),
        ))
    }
}

#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, AuthError>;
}

pub struct PortalLogin {
    base_url: Url,
    timeout: Duration,
    solver: Arc<dyn ChallengeSolver>,
}

impl PortalLogin {
    pub fn new(base_url: Url, timeout: Duration, solver: Arc<dyn ChallengeSolver>) -> Self {
        Self {
            base_url,
            timeout,
            solver,
        }
    }

    fn url(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::Unreachable(format!("invalid portal URL: {e}")))
    }
}

#[async_trait]
impl LoginFlow for PortalLogin {
    #[instrument(skip_all, fields(username = %credentials.username))]
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, AuthError> {
        // Each login starts from an empty jar so no stale cookie leaks in.
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let landing = http
            .get(self.url("/vtop/open/page")?)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let csrf = form_csrf(&landing)
            .ok_or_else(|| AuthError::Unreachable("landing page has no _csrf token".to_owned()))?;

        let setup = http
            .post(self.url("/vtop/prelogin/setup")?)
            .form(&[("_csrf", csrf.as_str()), ("flag", "VTOP")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let login_page = if is_login_page(&setup) {
            setup
        } else {
            http.get(self.url("/vtop/login")?)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?
        };
        let csrf = form_csrf(&login_page).unwrap_or(csrf);

        let answer = match find_challenge(&login_page)? {
            Some(challenge) => {
                debug!(mime = %challenge.mime, bytes = challenge.image.len(), "Login page has a captcha");
                self.solver.solve(&challenge).await?
            }
            None => String::new(),
        };

        let reply = http
            .post(self.url("/vtop/login")?)
            .form(&[
                ("_csrf", csrf.as_str()),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
                ("captchaStr", answer.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let registration = classify_login_reply(&reply)?;
        let csrf = form_csrf(&reply).unwrap_or(csrf);
        let cookies = session_cookies(jar.as_ref(), &self.url("/vtop/")?, csrf)?;
        Ok(LoginOutcome {
            registration,
            cookies,
        })
    }
}

fn form_csrf(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    document
        .select(&CSRF_SEL)
        .find_map(|input| input.value().attr("value"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

pub(crate) fn is_login_page(body: &str) -> bool {
    Html::parse_document(body)
        .select(&LOGIN_FORM_SEL)
        .next()
        .is_some()
}

/// Decode the captcha image, if the page shows one.
fn find_challenge(body: &str) -> Result<Option<Challenge>, AuthError> {
    let document = Html::parse_document(body);
    let Some(img) = document.select(&CAPTCHA_SEL).next() else {
        return Ok(None);
    };
    let src = img.value().attr("src").unwrap_or_default();
    let malformed = || AuthError::ChallengeFailed("captcha image is not an inline data URI".to_owned());

    let (mime, data) = src
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .ok_or_else(malformed)?;
    let image = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|_| malformed())?;
    Ok(Some(Challenge {
        mime: mime.to_owned(),
        image,
    }))
}

fn classify_login_reply(body: &str) -> Result<String, AuthError> {
    if BAD_CAPTCHA_RE.is_match(body) {
        return Err(AuthError::ChallengeFailed(
            "portal rejected the captcha answer".to_owned(),
        ));
    }
    if let Some(m) = BAD_CREDENTIALS_RE.find(body) {
        return Err(AuthError::BadCredentials(m.as_str().to_owned()));
    }

    let document = Html::parse_document(body);
    let registration = document
        .select(&REGISTRATION_SEL)
        .find_map(|input| input.value().attr("value"))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(registration) = registration {
        return Ok(registration.to_owned());
    }

    if is_login_page(body) {
        Err(AuthError::BadCredentials(
            "portal returned the login form again".to_owned(),
        ))
    } else {
        Err(AuthError::Unreachable(
            "unrecognized page after login".to_owned(),
        ))
    }
}

fn session_cookies(jar: &Jar, scope: &Url, csrf: String) -> Result<Cookies, AuthError> {
    let header = jar
        .cookies(scope)
        .ok_or_else(|| AuthError::Unreachable("portal set no session cookie".to_owned()))?;
    let header = header
        .to_str()
        .map_err(|e| AuthError::Unreachable(format!("unreadable cookie header: {e}")))?;

    let mut session_id = None;
    let mut server_id = None;
    for cookie in cookie::Cookie::split_parse(header).flatten() {
        match cookie.name() {
            SESSION_COOKIE => session_id = Some(cookie.value().to_owned()),
            AFFINITY_COOKIE => server_id = Some(cookie.value().to_owned()),
            _ => {}
        }
    }

    let session_id = session_id
        .ok_or_else(|| AuthError::Unreachable(format!("portal set no {SESSION_COOKIE} cookie")))?;
    Ok(Cookies {
        csrf,
        session_id,
        server_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_csrf() {
        let body = r#"<form><input type="hidden" name="_csrf" value=" abc-123 "/></form>"#;
        assert_eq!(form_csrf(body).as_deref(), Some("abc-123"));
        assert_eq!(form_csrf("<p>nothing</p>"), None);
    }

    #[test]
    fn test_find_challenge_decodes_data_uri() {
        let body = r#"<div id="captchaBlock"><img src="data:image/jpeg;base64,aGVsbG8="/></div>"#;
        let challenge = find_challenge(body).unwrap().unwrap();
        assert_eq!(challenge.mime, "image/jpeg");
        assert_eq!(challenge.image, b"hello");
    }

    #[test]
    fn test_find_challenge_absent() {
        assert_eq!(find_challenge("<form id=\"vtopLoginForm\"></form>").unwrap(), None);
    }

    #[test]
    fn test_find_challenge_rejects_remote_image() {
        let body = r#"<div id="captchaBlock"><img src="/captcha.png"/></div>"#;
        assert!(matches!(find_challenge(body), Err(AuthError::ChallengeFailed(_))));
    }

    #[test]
    fn test_classify_success() {
        let body = r#"<html><input type="hidden" id="authorizedIDX" value="22BCE1234"/></html>"#;
        assert_eq!(classify_login_reply(body).unwrap(), "22BCE1234");
    }

    #[test]
    fn test_classify_bad_password() {
        let body = r#"<form id="vtopLoginForm"><span>Invalid Password</span></form>"#;
        assert!(matches!(classify_login_reply(body), Err(AuthError::BadCredentials(_))));
    }

    #[test]
    fn test_classify_bad_captcha() {
        let body = r#"<form id="vtopLoginForm"><span>Invalid Captcha</span></form>"#;
        assert!(matches!(classify_login_reply(body), Err(AuthError::ChallengeFailed(_))));
    }

    #[test]
    fn test_classify_login_form_again() {
        let body = r#"<form id="vtopLoginForm"><input name="username"/></form>"#;
        assert!(matches!(classify_login_reply(body), Err(AuthError::BadCredentials(_))));
    }

    #[test]
    fn test_classify_unknown_page() {
        assert!(matches!(
            classify_login_reply("<h1>Maintenance</h1>"),
            Err(AuthError::Unreachable(_))
        ));
    }
}
