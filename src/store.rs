//! Durable state keyed by account or identity: the session store and the
//! export document cache.
//!
//! Only the cookie set and registration number of a session are persisted. The
//! password is never written; it comes from the environment or an interactive
//! prompt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::portal::json::parse_json_with_context;
use crate::portal::models::ExportDocument;
use crate::portal::session::Cookies;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub account: String,
    pub registration: String,
    pub cookies: Cookies,
    pub saved_at: DateTime<Utc>,
}

/// An export document as last built for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub document: ExportDocument,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store at {} is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to serialize store")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, account: &str) -> Result<Option<StoredSession>, StoreError>;
    async fn save(&self, session: &StoredSession) -> Result<(), StoreError>;
    async fn remove(&self, account: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DocumentCache: Send + Sync {
    async fn load(&self, identity: &str) -> Result<Option<CachedDocument>, StoreError>;
    async fn save(&self, identity: &str, cached: &CachedDocument) -> Result<(), StoreError>;
    /// Returns whether an entry was present.
    async fn remove(&self, identity: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct VersionedFile<T> {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, T>,
}

/// One JSON map per file, rewritten atomically on every change.
struct JsonFile<T> {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
    _entry: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Send> JsonFile<T> {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            _entry: PhantomData,
        }
    }

    async fn read(&self) -> Result<BTreeMap<String, T>, StoreError> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let file: VersionedFile<T> =
            parse_json_with_context(&body).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                source: anyhow::anyhow!("unsupported store version {}", file.version),
            });
        }
        Ok(file.entries)
    }

    async fn write(&self, entries: BTreeMap<String, T>) -> Result<(), StoreError> {
        let count = entries.len();
        let body = serde_json::to_vec_pretty(&VersionedFile {
            version: FORMAT_VERSION,
            entries,
        })?;
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        debug!(path = %self.path.display(), entries = count, "Wrote store file");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.remove(key))
    }

    async fn insert(&self, key: &str, value: T) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        entries.insert(key.to_owned(), value);
        self.write(entries).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.write(entries).await?;
        Ok(true)
    }
}

/// All accounts' sessions in one file.
pub struct FileSessionStore {
    file: JsonFile<StoredSession>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, account: &str) -> Result<Option<StoredSession>, StoreError> {
        self.file.get(account).await
    }

    async fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        self.file.insert(&session.account, session.clone()).await
    }

    async fn remove(&self, account: &str) -> Result<(), StoreError> {
        self.file.remove(account).await.map(|_| ())
    }
}

/// Every identity's last export document in one file, so a later run can be
/// served without touching the portal.
pub struct FileDocumentCache {
    file: JsonFile<CachedDocument>,
}

impl FileDocumentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

#[async_trait]
impl DocumentCache for FileDocumentCache {
    async fn load(&self, identity: &str) -> Result<Option<CachedDocument>, StoreError> {
        self.file.get(identity).await
    }

    async fn save(&self, identity: &str, cached: &CachedDocument) -> Result<(), StoreError> {
        self.file.insert(identity, cached.clone()).await
    }

    async fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        self.file.remove(identity).await
    }
}

/// Process-local session store, for tests and one-shot runs.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, StoredSession>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, account: &str) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.sessions.get(account).map(|entry| entry.clone()))
    }

    async fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        self.sessions
            .insert(session.account.clone(), session.clone());
        Ok(())
    }

    async fn remove(&self, account: &str) -> Result<(), StoreError> {
        self.sessions.remove(account);
        Ok(())
    }
}

/// Process-local document cache.
#[derive(Default)]
pub struct MemoryDocumentCache {
    documents: DashMap<String, CachedDocument>,
}

#[async_trait]
impl DocumentCache for MemoryDocumentCache {
    async fn load(&self, identity: &str) -> Result<Option<CachedDocument>, StoreError> {
        Ok(self.documents.get(identity).map(|entry| entry.clone()))
    }

    async fn save(&self, identity: &str, cached: &CachedDocument) -> Result<(), StoreError> {
        self.documents.insert(identity.to_owned(), cached.clone());
        Ok(())
    }

    async fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.documents.remove(identity).is_some())
    }
}
