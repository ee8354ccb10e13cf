use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::HALF_SECOND;
use crate::DEFAULT_USER_AGENT;

#[derive(Debug, Clone)]
pub struct HttpDownloadConfig {
    /// Timeout for the whole request, body included
    pub timeout: Duration,
    pub headers: HeaderMap,
    /// Minimum time between two intermediate progress events
    pub progress_interval: Duration,
}

impl Default for HttpDownloadConfig {
    fn default() -> Self {
        let mut config = HttpDownloadConfig {
            timeout: Duration::from_secs(60),
            headers: HeaderMap::new(),
            progress_interval: HALF_SECOND,
        };
        config.headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
        config
    }
}

/// Serializable subset of [`HttpDownloadConfig`] for settings files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpDownloadSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_progress_interval_ms() -> u64 {
    HALF_SECOND.as_millis() as u64
}

impl Default for HttpDownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            user_agent: None,
        }
    }
}

impl From<&HttpDownloadSettings> for HttpDownloadConfig {
    fn from(value: &HttpDownloadSettings) -> Self {
        let mut config = HttpDownloadConfig {
            timeout: Duration::from_secs(value.timeout_secs),
            progress_interval: Duration::from_millis(value.progress_interval_ms),
            ..Default::default()
        };
        let user_agent = value
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok());
        if let Some(user_agent) = user_agent {
            config.headers.insert(header::USER_AGENT, user_agent);
        }
        config
    }
}
