use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use dashmap::DashMap;
use directories::ProjectDirs;
use serde_json::Value;

use crate::settings::{Backend, Storage};

/// Object metadata persisted alongside each record.
#[derive(Clone, Debug, Default)]
pub struct ObjectMetadata {
    pub wallet_address: String,
    pub last_updated: String,
}

impl ObjectMetadata {
    pub fn from_doc(doc: &Value) -> Self {
        ObjectMetadata {
            wallet_address: doc
                .get("walletAddress")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            last_updated: doc
                .get("lastUpdated")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("malformed record at {key}: {reason}")]
    Parse { key: String, reason: String },
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-per-record blob store. No compare-and-swap and no multi-key
/// transactions: callers are best-effort single-writer (see the repository
/// docs for the resulting races).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn put(&self, key: &str, doc: &Value, meta: &ObjectMetadata) -> Result<(), StoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Builds the backend the settings ask for: plain remote, remote with a
/// local degradation mirror, or local-only.
pub fn from_settings(storage: &Storage) -> Result<Arc<dyn StorageBackend>, anyhow::Error> {
    let mirror_dir = match &storage.mirror_dir {
        Some(dir) => PathBuf::from(dir),
        None => {
            let Some(dirs) = ProjectDirs::from("com", "referral", "ledger") else {
                bail!("no home directory available for the local store");
            };
            dirs.data_dir().to_path_buf()
        }
    };

    match storage.backend {
        Backend::Local => Ok(Arc::new(LocalStore::open(mirror_dir)?)),
        Backend::Remote => {
            let Some(url) = storage.url.clone() else {
                bail!("storage.url is required for the remote backend");
            };
            let remote = RemoteStore::new(
                url,
                Duration::from_secs(storage.timeout_secs),
                storage.retries,
            )?;

            if storage.fallback {
                let mirror = LocalStore::open(mirror_dir)?;
                Ok(Arc::new(FallbackStore::new(remote, mirror)))
            } else {
                Ok(Arc::new(remote))
            }
        }
    }
}

/// HTTP client for the remote object store. Every call is bounded by the
/// configured timeout and retried up to the retry budget before the store
/// is reported unavailable.
pub struct RemoteStore {
    url: String,
    retries: u32,
    client: reqwest::Client,
}

impl RemoteStore {
    pub fn new(url: String, timeout: Duration, retries: u32) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(RemoteStore {
            url: url.trim_end_matches('/').to_string(),
            retries,
            client,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.url, key)
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response, StoreError> {
        let mut last_error = String::new();

        for attempt in 0..=self.retries {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = e.to_string();
                    log::warn!(
                        "store request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.retries + 1,
                        last_error
                    );
                }
            }
        }

        Err(StoreError::Unavailable(last_error))
    }
}

#[async_trait]
impl StorageBackend for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let url = self.object_url(key);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let doc = response.json::<Value>().await.map_err(|e| StoreError::Parse {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(doc))
    }

    async fn put(&self, key: &str, doc: &Value, meta: &ObjectMetadata) -> Result<(), StoreError> {
        let url = self.object_url(key);
        let response = self
            .send_with_retry(|| {
                self.client
                    .put(&url)
                    .header("content-type", "application/json")
                    .header("x-meta-wallet-address", meta.wallet_address.as_str())
                    .header("x-meta-last-updated", meta.last_updated.as_str())
                    .json(doc)
            })
            .await?;

        response
            .error_for_status()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let url = format!("{}/?prefix={}", self.url, prefix);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        let response = response
            .error_for_status()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let keys = response
            .json::<Vec<String>>()
            .await
            .map_err(|e| StoreError::Parse {
                key: prefix.to_string(),
                reason: e.to_string(),
            })?;

        Ok(keys)
    }
}

/// Same-shape mirror of the remote store: an in-memory map with an optional
/// write-through directory, usable both as a standalone backend and as the
/// degradation target when the remote store is unreachable.
pub struct LocalStore {
    objects: DashMap<String, Value>,
    mirror_dir: Option<PathBuf>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        LocalStore {
            objects: DashMap::new(),
            mirror_dir: None,
        }
    }

    /// Opens a disk-backed store, loading any objects mirrored earlier.
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        let store = LocalStore {
            objects: DashMap::new(),
            mirror_dir: Some(dir.clone()),
        };

        if dir.exists() {
            store.load_dir(&dir, &dir)?;
        }

        Ok(store)
    }

    fn load_dir(&self, root: &Path, dir: &Path) -> Result<(), StoreError> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                self.load_dir(root, &path)?;
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative.to_string_lossy().replace('\\', "/");

            let loaded = std::fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| {
                    serde_json::from_slice::<Value>(&bytes).map_err(|e| StoreError::Parse {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                });
            match loaded {
                Ok(doc) => {
                    self.objects.insert(key, doc);
                }
                Err(e) => log::warn!("skipping mirrored object {}: {}", key, e),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.objects.get(key).map(|doc| doc.value().clone()))
    }

    async fn put(&self, key: &str, doc: &Value, _meta: &ObjectMetadata) -> Result<(), StoreError> {
        self.objects.insert(key.to_string(), doc.clone());

        if let Some(dir) = &self.mirror_dir {
            let path = dir.join(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = serde_json::to_vec(doc).map_err(|e| StoreError::Parse {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            tokio::fs::write(&path, bytes).await?;
        }

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();

        Ok(keys)
    }
}

/// Remote store with an explicit local degradation path: traffic that finds
/// the remote unreachable is served from the mirror instead, and successful
/// remote reads and writes keep the mirror warm.
pub struct FallbackStore {
    remote: RemoteStore,
    mirror: LocalStore,
}

impl FallbackStore {
    pub fn new(remote: RemoteStore, mirror: LocalStore) -> Self {
        FallbackStore { remote, mirror }
    }
}

#[async_trait]
impl StorageBackend for FallbackStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.remote.get(key).await {
            Ok(Some(doc)) => {
                let meta = ObjectMetadata::from_doc(&doc);
                if let Err(e) = self.mirror.put(key, &doc, &meta).await {
                    log::warn!("could not mirror {} locally: {}", key, e);
                }
                Ok(Some(doc))
            }
            Ok(None) => Ok(None),
            Err(StoreError::Unavailable(reason)) => {
                log::warn!(
                    "remote store unreachable ({}), reading {} from the local mirror",
                    reason,
                    key
                );
                self.mirror.get(key).await
            }
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, doc: &Value, meta: &ObjectMetadata) -> Result<(), StoreError> {
        match self.remote.put(key, doc, meta).await {
            Ok(()) => {
                if let Err(e) = self.mirror.put(key, doc, meta).await {
                    log::warn!("could not mirror {} locally: {}", key, e);
                }
                Ok(())
            }
            Err(StoreError::Unavailable(reason)) => {
                log::warn!(
                    "remote store unreachable ({}), writing {} to the local mirror",
                    reason,
                    key
                );
                self.mirror.put(key, doc, meta).await
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self.remote.list(prefix).await {
            Ok(keys) => Ok(keys),
            Err(StoreError::Unavailable(reason)) => {
                log::warn!(
                    "remote store unreachable ({}), listing {} from the local mirror",
                    reason,
                    prefix
                );
                self.mirror.list(prefix).await
            }
            Err(e) => Err(e),
        }
    }
}
