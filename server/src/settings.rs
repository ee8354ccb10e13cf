use anyhow::Context;
use assetcache::cache::DEFAULT_CACHE_SUBDIR;
use assetcache::httpdownload::download::config::HttpDownloadSettings;
use assetcache::CacheConfig;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:42069";

fn default_cache() -> CacheConfig {
    let cache_area = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    CacheConfig::new(cache_area.join("assetcache").join(DEFAULT_CACHE_SUBDIR))
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_owned()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_cache")]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpDownloadSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cache: default_cache(),
            http: HttpDownloadSettings::default(),
        }
    }
}

fn default_settings_path() -> PathBuf {
    let home_dir = home_dir().unwrap_or_default();

    home_dir.join(".assetcache/settings.yaml")
}

impl Settings {
    /// Reads the yaml settings at `p` (or the default location).
    /// Writes the defaults if there is no file yet.
    pub async fn load(p: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = p.unwrap_or_else(default_settings_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        load_settings(&path).await
    }
}

async fn load_settings(p: &Path) -> anyhow::Result<Settings> {
    let file_exists = tokio::fs::try_exists(p).await.unwrap_or(false);
    if file_exists {
        log::info!("Found settings file at {}, reading...", p.to_string_lossy());
        let file = tokio::fs::read_to_string(p).await?;
        let settings: Settings = serde_yaml::from_str(&file)
            .with_context(|| format!("Invalid settings file {}", p.to_string_lossy()))?;
        log::info!("Settings loaded: {:?}", settings);
        return Ok(settings);
    }
    log::info!(
        "No settings file found at {}, creating...",
        p.to_string_lossy()
    );
    let settings = Settings::default();
    let settings_str = serde_yaml::to_string(&settings)?;
    tokio::fs::write(p, settings_str).await?;
    Ok(settings)
}

#[cfg(test)]
mod test {
    use super::*;
    use assetcache::mapper::{DEFAULT_FILE_PREFIX, DEFAULT_URL_TEMPLATE};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    #[test]
    fn empty_yaml_uses_defaults() -> anyhow::Result<()> {
        let decoded: Settings = serde_yaml::from_str("{}")?;
        assert_eq!(decoded.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(decoded.cache.url_template, DEFAULT_URL_TEMPLATE);
        assert!(decoded.cache.cache_dir.ends_with("assetcache/downloadedFiles"));
        assert_eq!(decoded.http.timeout_secs, 60);
        Ok(())
    }

    #[test]
    fn partial_cache_section_keeps_field_defaults() -> anyhow::Result<()> {
        let decoded: Settings = serde_yaml::from_str("cache:\n  cache_dir: /tmp/wallpapers\n")?;
        assert_eq!(decoded.cache.cache_dir, PathBuf::from("/tmp/wallpapers"));
        assert_eq!(decoded.cache.file_prefix, DEFAULT_FILE_PREFIX);
        Ok(())
    }

    #[test(tokio::test)]
    async fn missing_file_is_created_with_defaults() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("nested").join("settings.yaml");
        let settings = Settings::load(Some(path.clone())).await?;
        assert!(tokio::fs::try_exists(&path).await?);
        let reloaded = Settings::load(Some(path)).await?;
        assert_eq!(reloaded.listen_addr, settings.listen_addr);
        assert_eq!(reloaded.cache.cache_dir, settings.cache.cache_dir);
        Ok(())
    }

    #[test(tokio::test)]
    async fn broken_file_is_an_error() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("settings.yaml");
        tokio::fs::write(&path, "listen_addr: [").await?;
        assert!(Settings::load(Some(path)).await.is_err());
        Ok(())
    }
}
