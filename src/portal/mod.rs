//! Client for the VTOP student portal: session lifecycle, wire protocol, terms.

pub mod endpoint;
pub mod errors;
pub mod json;
pub mod login;
pub mod models;
pub mod session;
pub mod terms;

pub use endpoint::{Endpoint, EndpointAdapter, FetchOutcome, PortalPage, PortalTransport};
pub use errors::AuthError;
pub use login::{Challenge, ChallengeSolver, LoginFlow, LoginOutcome, PortalLogin, RejectChallenges};
pub use session::{Cookies, Credentials, SessionHandle, SessionManager};
pub use terms::{TermCatalog, TermRequest, TermResolver};
