//! Pacing and caching in front of the aggregator.
//!
//! One cached document per identity, mirrored to a [`DocumentCache`] so a later
//! process starts warm. A document younger than the freshness window is served
//! as-is (the same `Arc` within a process); otherwise a rebuild runs, but never
//! sooner than the minimum interval after the previous build for that identity.
//! Concurrent misses for one identity queue on the slot's lock, so only the
//! first rebuilds and the rest are served its result.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::portal::SessionHandle;
use crate::portal::models::ExportDocument;
use crate::store::{CachedDocument, DocumentCache, StoreError};
use crate::utils::fmt_duration;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ExportSource: Send + Sync {
    async fn build(&self, handle: &SessionHandle) -> ExportDocument;
}

struct Cached {
    document: Arc<ExportDocument>,
    fetched_at: Instant,
    /// Loaded from the persistent cache rather than built by this process.
    restored: bool,
}

impl Cached {
    /// Rebase a persisted build time onto the monotonic clock. `None` when
    /// the build time lies further back than the clock can represent.
    fn restore(entry: CachedDocument) -> Option<Self> {
        let age = (Utc::now() - entry.built_at).to_std().unwrap_or(Duration::ZERO);
        Some(Self {
            fetched_at: Instant::now().checked_sub(age)?,
            document: Arc::new(entry.document),
            restored: true,
        })
    }
}

#[derive(Default)]
struct Slot {
    /// `None` until the persistent cache has been consulted.
    cached: Mutex<Option<Option<Cached>>>,
}

pub struct ExportGate {
    source: Arc<dyn ExportSource>,
    cache: Arc<dyn DocumentCache>,
    slots: DashMap<String, Arc<Slot>>,
    /// `None` when the minimum interval is zero.
    pacer: Option<DefaultKeyedRateLimiter<String>>,
    max_age: Duration,
    min_interval: Duration,
}

impl ExportGate {
    pub fn new(
        source: Arc<dyn ExportSource>,
        cache: Arc<dyn DocumentCache>,
        max_age: Duration,
        min_interval: Duration,
    ) -> Self {
        let pacer = Quota::with_period(min_interval)
            .map(|quota| RateLimiter::keyed(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            source,
            cache,
            slots: DashMap::new(),
            pacer,
            max_age,
            min_interval,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn slot(&self, identity: &str) -> Arc<Slot> {
        self.slots.entry(identity.to_owned()).or_default().clone()
    }

    /// The slot's entry, reading the persistent cache on first use.
    async fn entry<'a>(
        &self,
        identity: &str,
        slot: &'a mut Option<Option<Cached>>,
    ) -> &'a mut Option<Cached> {
        if slot.is_none() {
            let restored = match self.cache.load(identity).await {
                Ok(entry) => entry.and_then(Cached::restore),
                Err(e) => {
                    warn!(identity, error = %e, "Ignoring unreadable document cache");
                    None
                }
            };
            if let Some(entry) = &restored {
                debug!(
                    identity,
                    age = fmt_duration(entry.fetched_at.elapsed()),
                    "Restored cached export document"
                );
            }
            *slot = Some(restored);
        }
        slot.get_or_insert(None)
    }

    /// Cached document if younger than `max_age` (default: the configured
    /// freshness window), else a paced rebuild.
    pub async fn get(&self, handle: &SessionHandle, max_age: Option<Duration>) -> Arc<ExportDocument> {
        let max_age = max_age.unwrap_or(self.max_age);
        let slot = self.slot(&handle.registration);
        let mut guard = slot.cached.lock().await;
        let cached = self.entry(&handle.registration, &mut *guard).await;

        if let Some(entry) = cached.as_ref()
            && entry.fetched_at.elapsed() < max_age
        {
            debug!(
                identity = %handle.registration,
                age = fmt_duration(entry.fetched_at.elapsed()),
                "Serving cached export document"
            );
            return entry.document.clone();
        }
        self.rebuild(handle, cached).await
    }

    /// Skip the freshness check. Still paced.
    pub async fn force_refresh(&self, handle: &SessionHandle) -> Arc<ExportDocument> {
        let slot = self.slot(&handle.registration);
        let mut guard = slot.cached.lock().await;
        let cached = self.entry(&handle.registration, &mut *guard).await;
        self.rebuild(handle, cached).await
    }

    /// Age of the cached document, if any.
    pub async fn cached_age(&self, identity: &str) -> Option<Duration> {
        let slot = self.slot(identity);
        let mut guard = slot.cached.lock().await;
        let cached = self.entry(identity, &mut *guard).await;
        cached.as_ref().map(|entry| entry.fetched_at.elapsed())
    }

    /// Drop the cached document here and in the persistent cache. Returns
    /// whether one was present in either.
    pub async fn clear(&self, identity: &str) -> Result<bool, StoreError> {
        let slot = self.slot(identity);
        let mut guard = slot.cached.lock().await;
        let in_memory = guard.take().flatten().is_some();
        // Nothing to restore once cleared.
        *guard = Some(None);
        let persisted = self.cache.remove(identity).await?;
        Ok(in_memory || persisted)
    }

    async fn rebuild(&self, handle: &SessionHandle, cached: &mut Option<Cached>) -> Arc<ExportDocument> {
        self.pace(handle, cached.as_ref()).await;

        let document = Arc::new(self.source.build(handle).await);
        let entry = CachedDocument {
            document: (*document).clone(),
            built_at: Utc::now(),
        };
        if let Err(e) = self.cache.save(&handle.registration, &entry).await {
            warn!(identity = %handle.registration, error = %e, "Failed to persist export document");
        }
        *cached = Some(Cached {
            document: document.clone(),
            fetched_at: Instant::now(),
            restored: false,
        });
        document
    }

    async fn pace(&self, handle: &SessionHandle, previous: Option<&Cached>) {
        let Some(pacer) = &self.pacer else {
            return;
        };
        // Builds from an earlier run are invisible to the in-process limiter.
        if let Some(previous) = previous.filter(|p| p.restored) {
            let since = previous.fetched_at.elapsed();
            if since < self.min_interval {
                let wait = self.min_interval - since;
                debug!(identity = %handle.registration, wait = fmt_duration(wait), "Pacing after previous run");
                tokio::time::sleep(wait).await;
            }
        }
        while let Err(not_until) = pacer.check_key(&handle.registration) {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            debug!(identity = %handle.registration, wait = fmt_duration(wait), "Pacing upstream fetch");
            tokio::time::sleep(wait).await;
        }
    }
}
