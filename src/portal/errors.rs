//! Error types for the portal client.

/// Why a login attempt failed.
///
/// `Clone` so a single failed refresh can be reported to every caller that
/// waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("portal rejected the credentials: {0}")]
    BadCredentials(String),
    #[error("login challenge could not be solved: {0}")]
    ChallengeFailed(String),
    #[error("portal is unreachable: {0}")]
    Unreachable(String),
    #[error("no stored session and no password available to log in")]
    MissingCredentials,
}

impl AuthError {
    /// Failures that a retry with the same credentials cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, AuthError::BadCredentials(_) | AuthError::MissingCredentials)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Unreachable(err.to_string())
    }
}
