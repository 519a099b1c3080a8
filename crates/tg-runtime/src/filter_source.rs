//! Filter list acquisition
//!
//! Raw list text is fetched through a [`Transport`] and cached on disk as
//! `<id>.txt` next to a `<id>.json` sidecar holding the download time.
//! A cached copy younger than the TTL is served without touching the
//! network; an older one is only served when the re-download fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter_list::FilterList;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

/// Fetches raw list text. No retries; any failure skips the list.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<String, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("TabGuard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> std::result::Result<String, TransportError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMetadata {
    timestamp: u64,
}

/// List text as handed to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedList {
    pub text: String,
    /// Epoch seconds of the download that produced `text`
    pub timestamp: u64,
    pub from_cache: bool,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub struct FilterSource {
    transport: Arc<dyn Transport>,
    cache_dir: PathBuf,
    ttl: Duration,
}

impl FilterSource {
    pub fn new(transport: Arc<dyn Transport>, cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            transport,
            cache_dir: cache_dir.into(),
            ttl,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn text_path(&self, list_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{list_id}.txt"))
    }

    fn meta_path(&self, list_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{list_id}.json"))
    }

    /// Text of `list`, from cache when fresh, else downloaded.
    pub async fn load(&self, list: &FilterList, force_refresh: bool) -> Result<FetchedList> {
        let cached = self.read_cache(&list.id).await;

        if let Some(cached) = &cached {
            if !force_refresh && !self.is_stale(cached.timestamp) {
                debug!("list '{}' served from cache", list.id);
                return Ok(cached.clone());
            }
        }

        match self.transport.fetch(&list.source_url).await {
            Ok(text) => {
                let timestamp = now_secs();
                info!("downloaded list '{}' ({} bytes)", list.id, text.len());
                if let Err(e) = self.write_cache(&list.id, &text, timestamp).await {
                    warn!("{e}");
                }
                Ok(FetchedList {
                    text,
                    timestamp,
                    from_cache: false,
                })
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!("refresh of list '{}' failed ({e}), using cached copy", list.id);
                    Ok(stale)
                }
                None => Err(Error::SourceUnavailable {
                    list_id: list.id.clone(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Drop the cached copy of a list.
    pub async fn evict(&self, list_id: &str) {
        for path in [self.text_path(list_id), self.meta_path(list_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove '{}': {e}", path.display()),
            }
        }
    }

    fn is_stale(&self, timestamp: u64) -> bool {
        now_secs().saturating_sub(timestamp) > self.ttl.as_secs()
    }

    async fn read_cache(&self, list_id: &str) -> Option<FetchedList> {
        let meta = tokio::fs::read(self.meta_path(list_id)).await.ok()?;
        let meta: CacheMetadata = match serde_json::from_slice(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("ignoring cache metadata of '{list_id}': {e}");
                return None;
            }
        };
        let text = tokio::fs::read_to_string(self.text_path(list_id)).await.ok()?;
        Some(FetchedList {
            text,
            timestamp: meta.timestamp,
            from_cache: true,
        })
    }

    async fn write_cache(&self, list_id: &str, text: &str, timestamp: u64) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| Error::persistence(&self.cache_dir, e))?;

        let text_path = self.text_path(list_id);
        tokio::fs::write(&text_path, text)
            .await
            .map_err(|e| Error::persistence(&text_path, e))?;

        let meta_path = self.meta_path(list_id);
        let meta = serde_json::to_vec(&CacheMetadata { timestamp })
            .map_err(|e| Error::encoding(&meta_path, e))?;
        tokio::fs::write(&meta_path, meta)
            .await
            .map_err(|e| Error::persistence(&meta_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubTransport {
        bodies: Mutex<HashMap<String, String>>,
        calls: Mutex<usize>,
    }

    impl StubTransport {
        fn serve(&self, url: &str, body: &str) {
            self.bodies.lock().unwrap().insert(url.to_string(), body.to_string());
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn fetch(&self, url: &str) -> std::result::Result<String, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| TransportError::Other("connection refused".to_string()))
        }
    }

    fn list() -> FilterList {
        FilterList {
            id: "test".to_string(),
            name: "Test".to_string(),
            source_url: "https://lists.test/a.txt".to_string(),
            is_built_in: false,
            is_enabled: true,
            last_updated: None,
        }
    }

    fn source(transport: &Arc<StubTransport>, dir: &tempfile::TempDir) -> FilterSource {
        FilterSource::new(transport.clone(), dir.path(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn downloads_then_serves_fresh_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StubTransport::default());
        transport.serve("https://lists.test/a.txt", "||ads.test^");
        let source = source(&transport, &dir);

        let first = source.load(&list(), false).await.unwrap();
        assert!(!first.from_cache);
        assert!(dir.path().join("test.txt").exists());
        assert!(dir.path().join("test.json").exists());

        let second = source.load(&list(), false).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.text, "||ads.test^");
        assert_eq!(transport.calls(), 1);

        source.load(&list(), true).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn stale_cache_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "old").unwrap();
        std::fs::write(dir.path().join("test.json"), r#"{"timestamp": 1000}"#).unwrap();

        let transport = Arc::new(StubTransport::default());
        transport.serve("https://lists.test/a.txt", "new");
        let fetched = source(&transport, &dir).load(&list(), false).await.unwrap();
        assert_eq!(fetched.text, "new");
        assert!(fetched.timestamp > 1000);
    }

    #[tokio::test]
    async fn stale_cache_survives_failed_refresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "old").unwrap();
        std::fs::write(dir.path().join("test.json"), r#"{"timestamp": 1000}"#).unwrap();

        let transport = Arc::new(StubTransport::default());
        let fetched = source(&transport, &dir).load(&list(), false).await.unwrap();
        assert_eq!(fetched.text, "old");
        assert!(fetched.from_cache);
        assert_eq!(fetched.timestamp, 1000);
    }

    #[tokio::test]
    async fn unavailable_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StubTransport::default());
        let err = source(&transport, &dir).load(&list(), false).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { ref list_id, .. } if list_id == "test"));
    }

    #[tokio::test]
    async fn evict_removes_cache_files() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StubTransport::default());
        transport.serve("https://lists.test/a.txt", "x");
        let source = source(&transport, &dir);
        source.load(&list(), false).await.unwrap();

        source.evict("test").await;
        assert!(!dir.path().join("test.txt").exists());
        source.evict("test").await;
    }
}
