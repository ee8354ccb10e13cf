pub mod journal;
mod routes;
pub mod settings;

use std::net::TcpListener;

use assetcache::httpdownload::download::config::HttpDownloadConfig;
use assetcache::AssetCache;
use axum::Router;
use routes::routes;

pub use routes::{ApiError, ApplicationState, AssetState, ResolvedAsset};
pub use settings::Settings;

pub async fn launch_app(listener: TcpListener, settings: Settings) -> anyhow::Result<()> {
    // init state
    let cache = AssetCache::with_http(&settings.cache, HttpDownloadConfig::from(&settings.http));
    let journal = journal::Journal::spawn(&cache);
    let state = ApplicationState { cache, journal };

    let asset_routes = routes().with_state(state);
    let app = Router::new().nest("/api/v1", asset_routes);

    log::info!(
        "Serving cache {} on {}",
        settings.cache.cache_dir.to_string_lossy(),
        listener.local_addr()?
    );
    axum::Server::from_tcp(listener)?
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
