use crate::aggregate::{Aggregator, KindReport};
use crate::config::Config;
use crate::gate::ExportGate;
use crate::portal::models::{ExportDocument, RecordKind};
use crate::portal::{
    AuthError, ChallengeSolver, EndpointAdapter, LoginFlow, PortalLogin, PortalTransport,
    SessionHandle, SessionManager, TermRequest,
};
use crate::store::{DocumentCache, FileDocumentCache, FileSessionStore, SessionStore};
use crate::utils::fmt_duration;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How much staleness a caller accepts for the export document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Anything younger than the configured freshness window.
    #[default]
    Cached,
    MaxAge(Duration),
    /// Rebuild regardless of age. Still paced.
    Force,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub account: String,
    pub stored_registration: Option<String>,
    pub stored_at: Option<DateTime<Utc>>,
    pub live_session: bool,
    /// Age of the cached export document, in seconds.
    pub cache_age_secs: Option<f64>,
    pub cache_max_age_secs: u64,
}

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    sessions: Arc<SessionManager>,
    aggregator: Arc<Aggregator>,
    gate: ExportGate,
}

impl App {
    /// Wire the portal client against the configured base URL and session file.
    pub fn new(config: Config, solver: Arc<dyn ChallengeSolver>) -> anyhow::Result<Self> {
        let base_url = config.base_url()?;
        let login = PortalLogin::new(base_url.clone(), config.request_timeout, solver);
        let transport = EndpointAdapter::new(base_url, config.request_timeout)
            .context("Failed to create portal HTTP client")?;
        let store = FileSessionStore::new(config.vtop_session_file.clone());
        let cache = FileDocumentCache::new(config.vtop_cache_file.clone());

        info!(
            base_url = %config.vtop_base_url,
            session_file = %store.path().display(),
            cache_file = %cache.path().display(),
            timeout = fmt_duration(config.request_timeout),
            "Portal client configured"
        );

        Self::with_parts(
            config,
            Arc::new(login),
            Arc::new(transport),
            Arc::new(store),
            Arc::new(cache),
        )
    }

    /// Assemble from explicit collaborators.
    pub fn with_parts(
        config: Config,
        login: Arc<dyn LoginFlow>,
        transport: Arc<dyn PortalTransport>,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn DocumentCache>,
    ) -> anyhow::Result<Self> {
        let account = config
            .vtop_username
            .clone()
            .context("VTOP_USERNAME is not set")?;
        let policy = config.attendance_policy()?;
        let timezone = config.timezone()?;

        let sessions = Arc::new(SessionManager::new(
            login,
            store,
            account,
            config.vtop_password.clone(),
        ));
        let aggregator = Arc::new(Aggregator::new(
            transport,
            sessions.clone(),
            policy,
            config.fallback_depth,
            timezone,
        ));
        let gate = ExportGate::new(
            aggregator.clone(),
            cache,
            config.cache_max_age,
            config.min_request_interval,
        );

        Ok(Self {
            config,
            sessions,
            aggregator,
            gate,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Force a fresh login, replacing any stored session.
    pub async fn login(&self) -> Result<SessionHandle, AuthError> {
        self.sessions.authenticate().await
    }

    /// The full export document. Only an unrecoverable authentication failure
    /// is an error; everything else degrades into diagnostics.
    pub async fn get_export_document(
        &self,
        freshness: Freshness,
    ) -> Result<Arc<ExportDocument>, AuthError> {
        let handle = self.sessions.resume().await?;
        let document = match freshness {
            Freshness::Cached => self.gate.get(&handle, None).await,
            Freshness::MaxAge(max_age) => self.gate.get(&handle, Some(max_age)).await,
            Freshness::Force => self.gate.force_refresh(&handle).await,
        };
        Ok(document)
    }

    /// One record kind, bypassing the document cache.
    pub async fn get_single_record_kind(
        &self,
        kind: RecordKind,
        request: &TermRequest,
    ) -> Result<KindReport, AuthError> {
        let handle = self.sessions.resume().await?;
        Ok(self.aggregator.fetch_kind(&handle, kind, request).await)
    }

    /// Registration of the live session, else of the stored one.
    async fn identity(&self) -> anyhow::Result<Option<String>> {
        if let Some(handle) = self.sessions.current() {
            return Ok(Some(handle.registration));
        }
        let stored = self
            .sessions
            .stored()
            .await
            .context("Failed to read session store")?;
        Ok(stored.map(|s| s.registration))
    }

    /// Drop the cached export document. Returns whether one existed.
    pub async fn clear_cache(&self) -> anyhow::Result<bool> {
        let Some(identity) = self.identity().await? else {
            return Ok(false);
        };
        let cleared = self
            .gate
            .clear(&identity)
            .await
            .context("Failed to clear document cache")?;
        info!(identity = %identity, cleared, "Document cache cleared");
        Ok(cleared)
    }

    /// Drop the live and stored session and any cached document.
    pub async fn logout(&self) -> anyhow::Result<()> {
        let account = self.sessions.account().to_owned();
        self.clear_cache().await?;
        self.sessions
            .forget()
            .await
            .context("Failed to remove stored session")?;
        info!(account = %account, "Logged out");
        Ok(())
    }

    pub async fn status(&self) -> anyhow::Result<Status> {
        let stored = self
            .sessions
            .stored()
            .await
            .context("Failed to read session store")?;
        let live = self.sessions.current();
        let identity = live
            .as_ref()
            .map(|h| h.registration.clone())
            .or_else(|| stored.as_ref().map(|s| s.registration.clone()));
        let cache_age = match &identity {
            Some(identity) => self.gate.cached_age(identity).await,
            None => None,
        };

        Ok(Status {
            account: self.sessions.account().to_owned(),
            stored_registration: stored.as_ref().map(|s| s.registration.clone()),
            stored_at: stored.map(|s| s.saved_at),
            live_session: live.is_some_and(|h| self.sessions.is_valid(&h)),
            cache_age_secs: cache_age.map(|age| age.as_secs_f64()),
            cache_max_age_secs: self.gate.max_age().as_secs(),
        })
    }
}
