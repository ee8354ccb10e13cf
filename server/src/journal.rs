use std::sync::Arc;

use assetcache::{AssetCache, CacheEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast::error::RecvError, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub id: String,
    pub fraction: f64,
}

/// Display-side buffer fed by the cache event stream.
/// Keeps every event as a log line, except progress which only keeps the latest value.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    lines: Arc<RwLock<Vec<String>>>,
    progress: Arc<RwLock<Option<ProgressReport>>>,
}

impl Journal {
    pub fn spawn(cache: &AssetCache) -> Self {
        let journal = Self::default();
        let mut events = cache.subscribe();
        let sink = journal.clone();
        log::info!("Spawning cache event journal task");
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => sink.record(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Journal fell behind, {} cache events skipped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::info!("Cache event stream closed, journal stops");
        });
        journal
    }

    async fn record(&self, event: CacheEvent) {
        match &event {
            CacheEvent::Progress { id, progress } => {
                *self.progress.write().await = Some(ProgressReport {
                    id: id.to_string(),
                    fraction: progress.fraction(),
                });
                return;
            }
            CacheEvent::Cached { .. } | CacheEvent::CacheError { .. } | CacheEvent::ClearDone => {
                *self.progress.write().await = None;
            }
            _ => {}
        }
        self.lines.write().await.push(event.to_string());
    }

    pub async fn lines(&self) -> Vec<String> {
        self.lines.read().await.clone()
    }

    pub async fn progress(&self) -> Option<ProgressReport> {
        self.progress.read().await.clone()
    }
}
