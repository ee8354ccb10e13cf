use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex, OwnedRwLockReadGuard, RwLock};

use crate::httpdownload::download::{self, config::HttpDownloadConfig};
use crate::httpdownload::{Downloader, HttpDownloader, ProgressEvent};
use crate::mapper::{
    AssetId, PathMapper, ValidationError, DEFAULT_FILE_PREFIX, DEFAULT_URL_TEMPLATE,
};
use crate::storage::{self, StorageError};

pub const DEFAULT_CACHE_SUBDIR: &str = "downloadedFiles";
const EVENT_CAPACITY: usize = 1024;
const PROGRESS_CAPACITY: usize = 64;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid asset id: {0}")]
    Validation(#[from] ValidationError),
    #[error("Cache storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Error occurred while downloading: {0}")]
    Download(#[source] Arc<download::Error>),
    #[error("Download task for '{0}' failed to complete: {1}")]
    Join(AssetId, String),
}

impl From<download::Error> for Error {
    fn from(value: download::Error) -> Self {
        Error::Download(Arc::new(value))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn default_url_template() -> String {
    DEFAULT_URL_TEMPLATE.to_owned()
}

fn default_file_prefix() -> String {
    DEFAULT_FILE_PREFIX.to_owned()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Root directory, every cached asset is a file directly inside it
    pub cache_dir: PathBuf,
    /// Remote url pattern, `{id}` is replaced by the asset id
    #[serde(default = "default_url_template")]
    pub url_template: String,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            url_template: default_url_template(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl From<&CacheConfig> for PathMapper {
    fn from(value: &CacheConfig) -> Self {
        PathMapper::new(
            value.cache_dir.clone(),
            value.url_template.clone(),
            value.file_prefix.clone(),
        )
    }
}

/// Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Absent,
    Downloading,
    Cached,
}

/// Append-only stream of what the cache is doing, rendering is up to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    DirectoryCreated { root: PathBuf },
    DownloadStarted { id: AssetId },
    Progress { id: AssetId, progress: ProgressEvent },
    Cached { id: AssetId, path: PathBuf },
    CacheHit { id: AssetId, path: PathBuf },
    /// `id` is the raw requested id, it may not be a valid [`AssetId`]
    CacheError { id: String, reason: String },
    ClearStarted,
    ClearDone,
    ClearFailed { reason: String },
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::DirectoryCreated { .. } => {
                write!(f, "Downloaded file directory doesn't exist, creating...")
            }
            CacheEvent::DownloadStarted { id } => {
                write!(f, "File {} isn't cached locally. Downloading...", id)
            }
            CacheEvent::Progress { id, progress } => write!(
                f,
                "Downloading {}: {:.0}%",
                id,
                progress.fraction() * 100.0
            ),
            CacheEvent::Cached { id, .. } => write!(f, "File {} cached locally", id),
            CacheEvent::CacheHit { id, .. } => write!(f, "File {} already cached locally", id),
            CacheEvent::CacheError { id, reason } => {
                write!(f, "Couldn't load file {}: {}", id, reason)
            }
            CacheEvent::ClearStarted => write!(f, "Deleting all downloaded files..."),
            CacheEvent::ClearDone => write!(f, "All downloaded files deleted"),
            CacheEvent::ClearFailed { reason } => {
                write!(f, "Couldn't delete downloaded files: {}", reason)
            }
        }
    }
}

type InFlight = Shared<BoxFuture<'static, Result<PathBuf>>>;

#[derive(Default)]
struct Inner {
    /// One pending transfer per asset, later callers join it
    in_flight: HashMap<AssetId, InFlight>,
    /// Sanitized file name -> asset id that owns it, reset by clear
    claims: HashMap<String, AssetId>,
}

impl Inner {
    fn claim(&mut self, file_name: String, id: &AssetId) -> Result<()> {
        match self.claims.get(&file_name) {
            Some(owner) if owner != id => {
                Err(ValidationError::Collision(id.to_string(), owner.to_string()).into())
            }
            Some(_) => Ok(()),
            None => {
                self.claims.insert(file_name, id.clone());
                Ok(())
            }
        }
    }

    /// Frees the name of an id that failed to get a file, unless another resolve still runs it
    fn release(&mut self, file_name: &str, id: &AssetId) {
        if self.claims.get(file_name) == Some(id) && !self.in_flight.contains_key(id) {
            self.claims.remove(file_name);
        }
    }
}

/// Resolves asset ids to local files, downloading each asset at most once.
/// Cheap to clone, all clones share the same in-flight table and event stream.
#[derive(Clone)]
pub struct AssetCache {
    mapper: PathMapper,
    downloader: Arc<dyn Downloader>,
    inner: Arc<Mutex<Inner>>,
    /// Read side: resolves and running transfers. Write side: clear.
    gate: Arc<RwLock<()>>,
    events: broadcast::Sender<CacheEvent>,
}

impl AssetCache {
    pub fn new(config: &CacheConfig, downloader: impl Downloader + 'static) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            mapper: PathMapper::from(config),
            downloader: Arc::new(downloader),
            inner: Arc::new(Mutex::new(Inner::default())),
            gate: Arc::new(RwLock::new(())),
            events,
        }
    }

    pub fn with_http(config: &CacheConfig, http_config: HttpDownloadConfig) -> Self {
        Self::new(config, HttpDownloader::new(Client::new(), http_config))
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Returns the local path of a complete copy of the asset, downloading it on a miss.
    /// Concurrent calls for the same id share a single transfer.
    pub async fn resolve(&self, raw_id: &str) -> Result<PathBuf> {
        let result = self.try_resolve(raw_id).await;
        if let Err(e) = &result {
            log::error!("Couldn't load file {}, error: {}", raw_id, e);
            self.publish(CacheEvent::CacheError {
                id: raw_id.to_owned(),
                reason: e.to_string(),
            });
        }
        result
    }

    async fn try_resolve(&self, raw_id: &str) -> Result<PathBuf> {
        let id = AssetId::parse(raw_id)?;
        let path = self.mapper.local_path_for(&id);
        let gate = self.gate.clone().read_owned().await;
        self.ensure_root().await?;

        let file_name = self.mapper.file_name_for(&id);
        let mut inner = self.inner.lock().await;
        inner.claim(file_name.clone(), &id)?;
        let pending = match inner.in_flight.get(&id) {
            Some(pending) => {
                log::info!("Joining in-flight download of {}", id);
                pending.clone()
            }
            None => {
                if storage::exists(&path).await {
                    drop(inner);
                    log::info!("File {} cached locally", id);
                    self.publish(CacheEvent::CacheHit {
                        id,
                        path: path.clone(),
                    });
                    return Ok(path);
                }
                let url = match self.mapper.remote_url_for(&id) {
                    Ok(url) => url,
                    Err(e) => {
                        inner.release(&file_name, &id);
                        return Err(e.into());
                    }
                };
                let pending = self.spawn_download(id.clone(), file_name, url, path, gate);
                inner.in_flight.insert(id, pending.clone());
                pending
            }
        };
        drop(inner);
        pending.await
    }

    /// Runs the transfer in its own task so a dropped caller can't abort it halfway.
    fn spawn_download(
        &self,
        id: AssetId,
        file_name: String,
        url: Url,
        path: PathBuf,
        gate: OwnedRwLockReadGuard<()>,
    ) -> InFlight {
        log::info!("File {} isn't cached locally. Downloading from {}", id, url);
        self.publish(CacheEvent::DownloadStarted { id: id.clone() });
        let cache = self.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let _gate = gate;
            let result = cache.download(&task_id, &url, &path).await;
            let mut inner = cache.inner.lock().await;
            inner.in_flight.remove(&task_id);
            if result.is_err() {
                inner.release(&file_name, &task_id);
            }
            result
        });
        handle
            .map(move |joined| match joined {
                Ok(result) => result,
                Err(e) => Err(Error::Join(id, e.to_string())),
            })
            .boxed()
            .shared()
    }

    async fn download(&self, id: &AssetId, url: &Url, path: &Path) -> Result<PathBuf> {
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CAPACITY);
        let forward = async {
            while let Some(progress) = progress_rx.recv().await {
                self.publish(CacheEvent::Progress {
                    id: id.clone(),
                    progress,
                });
            }
        };
        let (result, _) = tokio::join!(self.downloader.fetch(url, path, progress_tx), forward);
        let bytes = result?;
        log::info!("File {} cached locally, {} bytes", id, bytes);
        self.publish(CacheEvent::Cached {
            id: id.clone(),
            path: path.to_owned(),
        });
        Ok(path.to_owned())
    }

    async fn ensure_root(&self) -> Result<()> {
        if storage::ensure_dir(self.mapper.root()).await? {
            self.publish(CacheEvent::DirectoryCreated {
                root: self.mapper.root().to_owned(),
            });
        }
        Ok(())
    }

    pub async fn state(&self, raw_id: &str) -> Result<CacheState> {
        let id = AssetId::parse(raw_id)?;
        if self.inner.lock().await.in_flight.contains_key(&id) {
            return Ok(CacheState::Downloading);
        }
        if storage::exists(&self.mapper.local_path_for(&id)).await {
            Ok(CacheState::Cached)
        } else {
            Ok(CacheState::Absent)
        }
    }

    /// Deletes the whole cache root once every running transfer has settled.
    /// New resolves wait until the removal is over.
    pub async fn clear(&self) -> Result<()> {
        log::info!("Deleting all downloaded files...");
        self.publish(CacheEvent::ClearStarted);
        let _gate = self.gate.write().await;
        let mut inner = self.inner.lock().await;
        // no transfer can be running while the write side is held
        inner.in_flight.clear();
        if let Err(e) = storage::remove_dir(self.mapper.root()).await {
            log::error!("Clearing the cache failed: {}", e);
            self.publish(CacheEvent::ClearFailed {
                reason: e.to_string(),
            });
            return Err(e.into());
        }
        inner.claims.clear();
        log::info!(
            "Cache directory {} removed",
            self.mapper.root().to_string_lossy()
        );
        self.publish(CacheEvent::ClearDone);
        Ok(())
    }

    fn publish(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    use crate::util::test::{asset_bytes, TestServer, ASSET_SIZE};
    use crate::util::TestResult;

    use super::*;

    const ID: &str = "k7/wallhaven-k7838q";

    fn setup_cache(
        template: String,
        http_config: HttpDownloadConfig,
    ) -> TestResult<(AssetCache, TempDir)> {
        let tmp_dir = TempDir::new()?;
        let root = tmp_dir.path().join("cache").join(DEFAULT_CACHE_SUBDIR);
        let mut config = CacheConfig::new(root);
        config.url_template = template;
        Ok((AssetCache::with_http(&config, http_config), tmp_dir))
    }

    fn drain(events: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    async fn wait_for_state(cache: &AssetCache, id: &str, state: CacheState) -> TestResult<bool> {
        for _ in 0..200 {
            if cache.state(id).await? == state {
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(false)
    }

    #[test(tokio::test)]
    async fn cold_miss_then_hit_test() -> TestResult<()> {
        // given
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("full"), HttpDownloadConfig::default())?;
        let root = cache.mapper().root().to_owned();
        let mut events = cache.subscribe();
        assert!(!tokio::fs::try_exists(&root).await?);
        // when
        let path = cache.resolve(ID).await?;
        // then
        assert_eq!(path, root.join("file_k7wallhaven-k7838q"));
        assert_eq!(tokio::fs::read(&path).await?, asset_bytes(ID));
        assert_eq!(server.requests(ID), 1);
        let id = AssetId::parse(ID)?;
        let cold = drain(&mut events);
        assert_eq!(
            cold.first(),
            Some(&CacheEvent::DirectoryCreated { root: root.clone() })
        );
        assert_eq!(cold.get(1), Some(&CacheEvent::DownloadStarted { id: id.clone() }));
        assert_eq!(
            cold.last(),
            Some(&CacheEvent::Cached {
                id: id.clone(),
                path: path.clone()
            })
        );
        // when resolved again
        let second = cache.resolve(ID).await?;
        // then nothing goes over the network
        assert_eq!(second, path);
        assert_eq!(server.requests(ID), 1);
        assert_eq!(
            drain(&mut events),
            vec![CacheEvent::CacheHit { id, path }]
        );
        Ok(())
    }

    #[test(tokio::test)]
    async fn cache_progress_is_published_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let http_config = HttpDownloadConfig {
            progress_interval: Duration::ZERO,
            ..Default::default()
        };
        let (cache, _tmp_dir) =
            setup_cache(server.template("slow"), http_config)?;
        let mut events = cache.subscribe();
        cache.resolve(ID).await?;
        let progress: Vec<ProgressEvent> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                CacheEvent::Progress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect();
        assert!(progress.len() > 1);
        for pair in progress.windows(2) {
            assert!(pair[0].bytes_written <= pair[1].bytes_written);
        }
        assert!(progress.iter().all(|p| p.bytes_written <= p.bytes_expected));
        assert_eq!(
            progress.last(),
            Some(&ProgressEvent::new(ASSET_SIZE as u64, ASSET_SIZE as u64))
        );
        Ok(())
    }

    #[test(tokio::test)]
    async fn clear_invalidates_all_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("full"), HttpDownloadConfig::default())?;
        let ids = ["x8/wallhaven-x8e5e3", "e7/wallhaven-e78z9l", "plain123"];
        for id in ids {
            cache.resolve(id).await?;
            assert_eq!(cache.state(id).await?, CacheState::Cached);
        }
        let mut events = cache.subscribe();
        cache.clear().await?;
        assert_eq!(
            drain(&mut events),
            vec![CacheEvent::ClearStarted, CacheEvent::ClearDone]
        );
        assert!(!tokio::fs::try_exists(cache.mapper().root()).await?);
        for id in ids {
            assert_eq!(cache.state(id).await?, CacheState::Absent);
            cache.resolve(id).await?;
            assert_eq!(server.requests(id), 2, "{} should be downloaded again", id);
        }
        Ok(())
    }

    #[test(tokio::test)]
    async fn clear_without_root_is_ok_test() -> TestResult<()> {
        let (cache, _tmp_dir) =
            setup_cache(DEFAULT_URL_TEMPLATE.to_owned(), HttpDownloadConfig::default())?;
        cache.clear().await?;
        Ok(())
    }

    #[test(tokio::test)]
    async fn failure_leaves_no_partial_artifact_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("broken"), HttpDownloadConfig::default())?;
        let mut events = cache.subscribe();
        let result = cache.resolve(ID).await;
        assert!(matches!(result, Err(Error::Download(_))));
        assert_eq!(cache.state(ID).await?, CacheState::Absent);
        let mut entries = tokio::fs::read_dir(cache.mapper().root()).await?;
        assert!(
            entries.next_entry().await?.is_none(),
            "No file may be left behind by a failed download"
        );
        assert!(drain(&mut events)
            .iter()
            .any(|event| matches!(event, CacheEvent::CacheError { id, .. } if id == ID)));
        // a retry is a fresh miss
        assert!(cache.resolve(ID).await.is_err());
        assert_eq!(server.requests(ID), 2);
        Ok(())
    }

    #[test(tokio::test)]
    async fn missing_asset_is_a_download_error_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("missing"), HttpDownloadConfig::default())?;
        match cache.resolve(ID).await {
            Err(Error::Download(e)) => assert!(matches!(
                e.as_ref(),
                download::Error::DownloadNotOk(reqwest::StatusCode::NOT_FOUND, _)
            )),
            other => panic!("Expected a download error, got {:?}", other),
        }
        assert_eq!(cache.state(ID).await?, CacheState::Absent);
        Ok(())
    }

    #[test(tokio::test)]
    async fn invalid_id_touches_nothing_test() -> TestResult<()> {
        let (cache, _tmp_dir) =
            setup_cache(DEFAULT_URL_TEMPLATE.to_owned(), HttpDownloadConfig::default())?;
        let result = cache.resolve("").await;
        assert!(matches!(result, Err(Error::Validation(ValidationError::Empty))));
        let result = cache.resolve("../escape").await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::InvalidSegment(_)))
        ));
        assert!(!tokio::fs::try_exists(cache.mapper().root()).await?);
        Ok(())
    }

    #[test(tokio::test)]
    async fn colliding_ids_are_rejected_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("full"), HttpDownloadConfig::default())?;
        let path = cache.resolve("a/b-c").await?;
        let result = cache.resolve("ab-c").await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::Collision(_, _)))
        ));
        assert_eq!(tokio::fs::read(&path).await?, asset_bytes("a/b-c"));
        // after a clear the name is free again
        cache.clear().await?;
        let path = cache.resolve("ab-c").await?;
        assert_eq!(tokio::fs::read(&path).await?, asset_bytes("ab-c"));
        Ok(())
    }

    #[test(tokio::test)]
    async fn concurrent_resolves_share_one_download_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("slow"), HttpDownloadConfig::default())?;
        let (first, second, third) =
            tokio::join!(cache.resolve(ID), cache.resolve(ID), cache.resolve(ID));
        let path = first?;
        assert_eq!(second?, path);
        assert_eq!(third?, path);
        assert_eq!(server.requests(ID), 1);
        assert_eq!(tokio::fs::read(&path).await?, asset_bytes(ID));
        Ok(())
    }

    #[test(tokio::test)]
    async fn state_follows_download_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("slow"), HttpDownloadConfig::default())?;
        assert_eq!(cache.state(ID).await?, CacheState::Absent);
        let handle = tokio::spawn({
            let cache = cache.clone();
            async move { cache.resolve(ID).await }
        });
        assert!(wait_for_state(&cache, ID, CacheState::Downloading).await?);
        // the partial file is never visible as cached
        assert!(!storage::exists(&cache.mapper().local_path_for(&AssetId::parse(ID)?)).await);
        handle.await??;
        assert_eq!(cache.state(ID).await?, CacheState::Cached);
        Ok(())
    }

    #[test(tokio::test)]
    async fn clear_waits_for_in_flight_download_test() -> TestResult<()> {
        let server = TestServer::launch().await?;
        let (cache, _tmp_dir) =
            setup_cache(server.template("slow"), HttpDownloadConfig::default())?;
        let handle = tokio::spawn({
            let cache = cache.clone();
            async move { cache.resolve(ID).await }
        });
        assert!(wait_for_state(&cache, ID, CacheState::Downloading).await?);
        cache.clear().await?;
        // the download settled before the root was removed
        assert!(handle.await?.is_ok());
        assert_eq!(cache.state(ID).await?, CacheState::Absent);
        assert!(!tokio::fs::try_exists(cache.mapper().root()).await?);
        Ok(())
    }

    /// Writes a fixed payload without any network, counting calls.
    /// Urls whose path equals `missing` fail like a 404.
    #[derive(Clone, Default)]
    struct CountingDownloader {
        calls: Arc<AtomicUsize>,
        missing: Option<&'static str>,
    }

    #[async_trait]
    impl Downloader for CountingDownloader {
        async fn fetch(
            &self,
            url: &Url,
            destination: &Path,
            progress: mpsc::Sender<ProgressEvent>,
        ) -> download::Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.missing == Some(url.path()) {
                return Err(download::Error::DownloadNotOk(
                    reqwest::StatusCode::NOT_FOUND,
                    String::new(),
                ));
            }
            tokio::fs::write(destination, b"jpeg").await?;
            let _ = progress.send(ProgressEvent::new(4, 4)).await;
            Ok(4)
        }
    }

    #[test(tokio::test)]
    async fn cold_miss_downloads_exactly_once_test() -> TestResult<()> {
        let tmp_dir = TempDir::new()?;
        let downloader = CountingDownloader::default();
        let config = CacheConfig::new(tmp_dir.path().join(DEFAULT_CACHE_SUBDIR));
        let cache = AssetCache::new(&config, downloader.clone());
        let mut events = cache.subscribe();
        let path = cache.resolve("plain123").await?;
        assert_eq!(path, tmp_dir.path().join(DEFAULT_CACHE_SUBDIR).join("file_plain123"));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        let created = drain(&mut events)
            .iter()
            .filter(|event| matches!(event, CacheEvent::DirectoryCreated { .. }))
            .count();
        assert_eq!(created, 1);
        for _ in 0..3 {
            assert_eq!(cache.resolve("plain123").await?, path);
        }
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert!(drain(&mut events)
            .iter()
            .all(|event| matches!(event, CacheEvent::CacheHit { .. })));
        Ok(())
    }

    #[test(tokio::test)]
    async fn failed_resolve_releases_its_name_test() -> TestResult<()> {
        // given
        let tmp_dir = TempDir::new()?;
        let downloader = CountingDownloader {
            missing: Some("/full/a/b-c.jpg"),
            ..Default::default()
        };
        let config = CacheConfig::new(tmp_dir.path().join(DEFAULT_CACHE_SUBDIR));
        let cache = AssetCache::new(&config, downloader.clone());
        // when
        let result = cache.resolve("a/b-c").await;
        // then
        assert!(matches!(result, Err(Error::Download(_))));
        assert_eq!(cache.state("a/b-c").await?, CacheState::Absent);
        let path = cache.resolve("ab-c").await?;
        assert_eq!(tokio::fs::read(&path).await?, b"jpeg");
        // the name now belongs to the id that got a file
        let result = cache.resolve("a/b-c").await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::Collision(_, _)))
        ));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test(tokio::test)]
    async fn broken_template_releases_the_name_test() -> TestResult<()> {
        let (cache, _tmp_dir) =
            setup_cache("not a url {id}".to_owned(), HttpDownloadConfig::default())?;
        for id in ["a/b-c", "ab-c"] {
            let result = cache.resolve(id).await;
            assert!(
                matches!(
                    result,
                    Err(Error::Validation(ValidationError::InvalidUrl(_, _)))
                ),
                "{} should fail on its url, got {:?}",
                id,
                result
            );
        }
        Ok(())
    }

    #[test(tokio::test)]
    async fn failed_clear_is_reported_test() -> TestResult<()> {
        // given a regular file where the cache root belongs
        let (cache, _tmp_dir) =
            setup_cache(DEFAULT_URL_TEMPLATE.to_owned(), HttpDownloadConfig::default())?;
        let root = cache.mapper().root().to_owned();
        if let Some(parent) = root.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&root, b"not a directory").await?;
        let mut events = cache.subscribe();
        // when
        let result = cache.clear().await;
        // then
        assert!(matches!(
            result,
            Err(Error::Storage(StorageError::Remove { .. }))
        ));
        let published = drain(&mut events);
        assert_eq!(published.first(), Some(&CacheEvent::ClearStarted));
        assert!(matches!(
            published.get(1),
            Some(CacheEvent::ClearFailed { .. })
        ));
        assert_eq!(published.len(), 2);
        assert!(storage::exists(&root).await);
        Ok(())
    }

    #[test]
    fn events_render_as_log_lines_test() -> TestResult<()> {
        let id = AssetId::parse(ID)?;
        assert_eq!(
            CacheEvent::DownloadStarted { id: id.clone() }.to_string(),
            "File k7/wallhaven-k7838q isn't cached locally. Downloading..."
        );
        assert_eq!(
            CacheEvent::Progress {
                id,
                progress: ProgressEvent::new(1, 4)
            }
            .to_string(),
            "Downloading k7/wallhaven-k7838q: 25%"
        );
        assert_eq!(
            CacheEvent::ClearStarted.to_string(),
            "Deleting all downloaded files..."
        );
        Ok(())
    }
}
