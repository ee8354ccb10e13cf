use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use self::download::config::HttpDownloadConfig;
use self::download::{HttpDownload, Outcome};

pub mod download;

/// Progress of a single transfer.
/// Events sent by [`HttpDownload`] keep `bytes_written <= bytes_expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub bytes_written: u64,
    pub bytes_expected: u64,
}

impl ProgressEvent {
    pub fn new(bytes_written: u64, bytes_expected: u64) -> Self {
        Self {
            bytes_written,
            bytes_expected,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.bytes_expected == 0 {
            return 0.0;
        }
        (self.bytes_written as f64 / self.bytes_expected as f64).min(1.0)
    }
}

/// Moves a remote asset to a local path.
/// Implementations must never leave an incomplete file at `destination`.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns the number of bytes written to `destination`
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> download::Result<u64>;
}

/// [`Downloader`] over http, every fetch is a fresh [`HttpDownload`] run to completion
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: Client,
    config: HttpDownloadConfig,
}

impl HttpDownloader {
    pub fn new(client: Client, config: HttpDownloadConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> download::Result<u64> {
        let download = HttpDownload::new(
            url.clone(),
            destination.to_owned(),
            self.client.clone(),
            Some(self.config.clone()),
        );
        // the sender stays alive for the whole transfer, nobody pauses a fetch
        let (_tx, rx) = oneshot::channel();
        match download.start(rx, progress).await? {
            Outcome::Complete(bytes) => Ok(bytes),
            Outcome::Paused(bytes) => {
                download.discard().await;
                Err(download::Error::Interrupted(bytes))
            }
        }
    }
}
