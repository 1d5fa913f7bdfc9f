//! Session lifecycle: login, resume from the store, single-flight refresh.

use chrono::Utc;
use custom_debug_derive::Debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::errors::AuthError;
use super::login::{LoginFlow, LoginOutcome};
use crate::store::{SessionStore, StoreError, StoredSession};

/// Cookie names the portal sets at login.
pub const SESSION_COOKIE: &str = "JSESSIONID";
pub const AFFINITY_COOKIE: &str = "SERVERID";

/// Session cookies plus the anti-forgery token that must accompany them.
///
/// The token is not a cookie; it travels as the `_csrf` form field, but it is
/// issued per session and goes stale together with the cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookies {
    #[debug(with = crate::fmt::redacted)]
    pub csrf: String,
    #[debug(with = crate::fmt::redacted)]
    pub session_id: String,
    pub server_id: Option<String>,
}

impl Cookies {
    pub fn is_complete(&self) -> bool {
        !self.csrf.is_empty() && !self.session_id.is_empty()
    }

    /// Value for the `Cookie` request header.
    pub fn header_value(&self) -> String {
        let mut pairs = vec![cookie::Cookie::new(SESSION_COOKIE, self.session_id.as_str())
            .stripped()
            .to_string()];
        if let Some(server_id) = &self.server_id {
            pairs.push(
                cookie::Cookie::new(AFFINITY_COOKIE, server_id.as_str())
                    .stripped()
                    .to_string(),
            );
        }
        pairs.join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    #[debug(with = crate::fmt::redacted)]
    pub password: String,
}

/// An authenticated identity, threaded explicitly through every portal call.
///
/// `generation` increases with every (re-)authentication; a handle whose
/// generation is behind the manager's current one is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub registration: String,
    pub cookies: Cookies,
    pub generation: u64,
}

#[derive(Default)]
struct SessionState {
    current: Option<SessionHandle>,
    next_generation: u64,
    /// Last failed refresh, keyed by the generation it tried to replace.
    failed: Option<(u64, AuthError)>,
}

/// Owns credentials and the live cookie set for one account.
pub struct SessionManager {
    login: Arc<dyn LoginFlow>,
    store: Arc<dyn SessionStore>,
    account: String,
    password: Option<String>,
    state: RwLock<SessionState>,
    refresh_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        login: Arc<dyn LoginFlow>,
        store: Arc<dyn SessionStore>,
        account: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            login,
            store,
            account: account.into().trim().to_uppercase(),
            password: password.filter(|p| !p.is_empty()),
            state: RwLock::new(SessionState {
                next_generation: 1,
                ..Default::default()
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Perform a full login and make the result the current session.
    pub async fn authenticate(&self) -> Result<SessionHandle, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.login_and_install().await
    }

    /// Current session if one is live, else the stored one, else a fresh login.
    ///
    /// Loading from the store does not touch the network; a stored session that
    /// the portal has since expired is discovered on the first fetch.
    pub async fn resume(&self) -> Result<SessionHandle, AuthError> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        match self.store.load(&self.account).await {
            Ok(Some(stored)) if stored.cookies.is_complete() => {
                debug!(account = %self.account, saved_at = %stored.saved_at, "Resuming stored session");
                return Ok(self.install(stored.registration, stored.cookies));
            }
            Ok(_) => debug!(account = %self.account, "No usable stored session"),
            Err(e) => warn!(error = %e, "Failed to read session store, logging in"),
        }
        self.login_and_install().await
    }

    pub fn current(&self) -> Option<SessionHandle> {
        self.read().current.clone()
    }

    /// Cheap local check; does not contact the portal.
    pub fn is_valid(&self, handle: &SessionHandle) -> bool {
        handle.cookies.is_complete()
            && self
                .read()
                .current
                .as_ref()
                .is_some_and(|current| current.generation == handle.generation)
    }

    /// The newest handle for this account: `handle` itself, or its replacement
    /// if a refresh has happened since it was issued.
    pub fn latest(&self, handle: &SessionHandle) -> SessionHandle {
        match &self.read().current {
            Some(current) if current.generation > handle.generation => current.clone(),
            _ => handle.clone(),
        }
    }

    /// Drop the session and its persisted entry.
    pub async fn invalidate(&self, handle: &SessionHandle) {
        {
            let mut state = self.write();
            if state
                .current
                .as_ref()
                .is_some_and(|current| current.generation == handle.generation)
            {
                state.current = None;
            }
        }
        if let Err(e) = self.store.remove(&self.account).await {
            warn!(error = %e, "Failed to remove stored session");
        }
        info!(account = %self.account, generation = handle.generation, "Session invalidated");
    }

    /// Drop whatever session is live and the persisted entry, without a handle.
    pub async fn forget(&self) -> Result<(), StoreError> {
        self.write().current = None;
        self.store.remove(&self.account).await?;
        info!(account = %self.account, "Session forgotten");
        Ok(())
    }

    /// The persisted entry for this account, if any.
    pub async fn stored(&self) -> Result<Option<StoredSession>, StoreError> {
        self.store.load(&self.account).await
    }

    /// Re-authenticate after `stale` was rejected by the portal.
    ///
    /// Single-flight: concurrent callers holding the same stale generation wait
    /// for one login and share its result, success or failure.
    #[instrument(skip_all, fields(account = %self.account, stale = stale.generation))]
    pub async fn refresh(&self, stale: &SessionHandle) -> Result<SessionHandle, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        {
            let state = self.read();
            if let Some(current) = &state.current
                && current.generation > stale.generation
            {
                debug!(generation = current.generation, "Session already refreshed");
                return Ok(current.clone());
            }
            if let Some((generation, err)) = &state.failed
                && *generation == stale.generation
            {
                return Err(err.clone());
            }
        }

        match self.login_and_install().await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                warn!(error = %err, "Session refresh failed");
                self.write().failed = Some((stale.generation, err.clone()));
                Err(err)
            }
        }
    }

    /// Caller must hold `refresh_lock`.
    async fn login_and_install(&self) -> Result<SessionHandle, AuthError> {
        let Some(password) = self.password.clone() else {
            return Err(AuthError::MissingCredentials);
        };
        let credentials = Credentials {
            username: self.account.clone(),
            password,
        };

        let LoginOutcome {
            registration,
            cookies,
        } = self.login.login(&credentials).await?;
        let handle = self.install(registration, cookies);
        info!(registration = %handle.registration, generation = handle.generation, "Authenticated");

        let stored = StoredSession {
            account: self.account.clone(),
            registration: handle.registration.clone(),
            cookies: handle.cookies.clone(),
            saved_at: Utc::now(),
        };
        if let Err(e) = self.store.save(&stored).await {
            warn!(error = %e, "Failed to persist session");
        }
        Ok(handle)
    }

    fn install(&self, registration: String, cookies: Cookies) -> SessionHandle {
        let mut state = self.write();
        let handle = SessionHandle {
            registration,
            cookies,
            generation: state.next_generation,
        };
        state.next_generation += 1;
        state.current = Some(handle.clone());
        state.failed = None;
        handle
    }
}
