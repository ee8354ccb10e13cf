pub mod config;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use crate::httpdownload::ProgressEvent;
use crate::util::{file_size, kb, total_from_content_range};

use self::config::HttpDownloadConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File IO operation failed, error: '{0}'")]
    Io(#[from] tokio::io::Error),
    #[error("Request error: '{0}'")]
    Request(#[from] reqwest::Error),
    #[error("Prematurely dropped channel for download with url: '{1}', downloaded bytes before drop: '{0}'")]
    ChannelDrop(u64, Url),
    #[error("Download req did not yield 2xx, instead: '{0}', body: '{1}'")]
    DownloadNotOk(reqwest::StatusCode, String),
    #[error("Download ended before completion, downloaded bytes: '{0}', expected: '{1}'")]
    StreamEndedBeforeCompletion(u64, u64),
    #[error("Download was paused after '{0}' bytes instead of running to completion")]
    Interrupted(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete(u64),
    Paused(u64),
}

/// A single resumable transfer from `url` to `file_path`.
/// Bytes land in a hidden `.part` sibling first, `file_path` only ever appears complete.
#[derive(Debug, Clone)]
pub struct HttpDownload {
    pub url: Url,
    pub file_path: PathBuf,
    pub part_path: PathBuf,
    pub config: HttpDownloadConfig,
    pub client: Client,
}

/// `<dir>/file_x` downloads into `<dir>/.file_x.part`
pub fn part_path_for(file_path: &Path) -> PathBuf {
    let file_name = file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_owned());
    file_path.with_file_name(format!(".{}.part", file_name))
}

impl HttpDownload {
    pub fn new(
        url: Url,
        file_path: PathBuf,
        client: Client,
        config: Option<HttpDownloadConfig>,
    ) -> Self {
        // If no configuration is passed the default one is copied
        let config = config.unwrap_or_default();
        let part_path = part_path_for(&file_path);
        HttpDownload {
            url,
            file_path,
            part_path,
            config,
            client,
        }
    }

    /// Downloads from scratch, any previous partial file is truncated.
    pub async fn start(
        &self,
        stop_ch: oneshot::Receiver<()>,
        update_ch: mpsc::Sender<ProgressEvent>,
    ) -> Result<Outcome> {
        let result = self.run(0, stop_ch, update_ch).await;
        self.settle(result).await
    }

    /// Continues a paused download with a byte range request.
    /// Falls back to a fresh download if the server answers the whole body.
    pub async fn resume(
        &self,
        stop_ch: oneshot::Receiver<()>,
        update_ch: mpsc::Sender<ProgressEvent>,
    ) -> Result<Outcome> {
        let bytes_on_disk = self.get_bytes_on_disk().await;
        if bytes_on_disk == 0 {
            log::info!("Nothing to resume, starting from scratch: {}", self.url);
        }
        let result = self.run(bytes_on_disk, stop_ch, update_ch).await;
        self.settle(result).await
    }

    /// Removes the partial file of a paused or failed download.
    pub async fn discard(&self) {
        match tokio::fs::remove_file(&self.part_path).await {
            Ok(_) => log::info!(
                "Removed partial download {}",
                self.part_path.to_string_lossy()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "Couldn't remove partial download {}, error: {}",
                self.part_path.to_string_lossy(),
                e
            ),
        }
    }

    pub async fn get_bytes_on_disk(&self) -> u64 {
        file_size(&self.part_path).await
    }

    async fn request(&self, offset: u64) -> Result<Response> {
        let mut req = self
            .client
            .get(self.url.as_ref())
            .timeout(self.config.timeout)
            .headers(self.config.headers.clone());
        if offset > 0 {
            req = req.header(RANGE, format!("bytes={}-", offset));
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::DownloadNotOk(status, body));
        }
        Ok(resp)
    }

    async fn run(
        &self,
        bytes_on_disk: u64,
        stop_ch: oneshot::Receiver<()>,
        update_ch: mpsc::Sender<ProgressEvent>,
    ) -> Result<Outcome> {
        let resp = self.request(bytes_on_disk).await?;
        if bytes_on_disk > 0 && resp.status() == StatusCode::PARTIAL_CONTENT {
            let content_length = total_from_content_range(resp.headers())
                .or_else(|| resp.content_length().map(|len| len + bytes_on_disk));
            let file_handler = OpenOptions::new()
                .append(true)
                .open(&self.part_path)
                .await?;
            return self
                .progress(resp, file_handler, stop_ch, update_ch, bytes_on_disk, content_length)
                .await;
        }
        if bytes_on_disk > 0 {
            log::warn!(
                "Server ignored the byte range, starting from scratch: {}",
                self.url
            );
        }
        let content_length = resp.content_length();
        let file_handler = File::create(&self.part_path).await?;
        self.progress(resp, file_handler, stop_ch, update_ch, 0, content_length)
            .await
    }

    async fn progress(
        &self,
        resp: Response,
        mut file_handler: File,
        mut stop_ch: oneshot::Receiver<()>,
        update_ch: mpsc::Sender<ProgressEvent>,
        mut downloaded_bytes: u64,
        content_length: Option<u64>,
    ) -> Result<Outcome> {
        let mut stream = resp.bytes_stream();
        let mut last_update = Instant::now();
        while let Some(chunk) = stream.next().await {
            let item = chunk?;
            file_handler.write_all(&item).await?;
            downloaded_bytes += item.len() as u64;
            if let Some(expected) = content_length {
                if downloaded_bytes < expected
                    && last_update.elapsed() >= self.config.progress_interval
                {
                    // intermediate updates may be dropped, the final one never is
                    let _ = update_ch.try_send(ProgressEvent::new(downloaded_bytes, expected));
                    last_update = Instant::now();
                }
            }
            match stop_ch.try_recv() {
                Ok(_) => {
                    log::info!("Download stop signal received for: {}", self.url);
                    file_handler.flush().await?;
                    return Ok(Outcome::Paused(downloaded_bytes));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    log::error!(
                        "Download stop signal channel closed for: {}, this shouldn't happen!",
                        self.url
                    );
                    return Err(Error::ChannelDrop(downloaded_bytes, self.url.clone()));
                }
            }
        }
        file_handler.flush().await?;
        if let Some(expected) = content_length {
            if downloaded_bytes < expected {
                log::error!(
                    "Download stream ended before completion, downloaded bytes: {}, content length: {}",
                    downloaded_bytes,
                    expected
                );
                return Err(Error::StreamEndedBeforeCompletion(downloaded_bytes, expected));
            }
        }
        let _ = update_ch
            .send(ProgressEvent::new(downloaded_bytes, downloaded_bytes))
            .await;
        log::info!(
            "Download completed successfully: {}, {:.1}KB",
            self.url,
            kb(downloaded_bytes)
        );
        Ok(Outcome::Complete(downloaded_bytes))
    }

    /// Promotes a complete part file, keeps a paused one and drops a failed one.
    async fn settle(&self, result: Result<Outcome>) -> Result<Outcome> {
        match result {
            Ok(Outcome::Complete(bytes)) => {
                if let Err(e) = tokio::fs::rename(&self.part_path, &self.file_path).await {
                    log::error!(
                        "Couldn't move finished download to {}, error: {}",
                        self.file_path.to_string_lossy(),
                        e
                    );
                    self.discard().await;
                    return Err(e.into());
                }
                Ok(Outcome::Complete(bytes))
            }
            Ok(paused) => Ok(paused),
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }
}
