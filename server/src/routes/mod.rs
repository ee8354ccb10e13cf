use std::path::PathBuf;

use assetcache::cache::{self, CacheState};
use assetcache::AssetCache;
use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::journal::{Journal, ProgressReport};

#[derive(Clone, FromRef)]
pub struct ApplicationState {
    pub cache: AssetCache,
    pub journal: Journal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolvedAsset {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssetState {
    pub id: String,
    pub state: CacheState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug)]
pub struct CacheFailure(cache::Error);

impl From<cache::Error> for CacheFailure {
    fn from(value: cache::Error) -> Self {
        Self(value)
    }
}

impl IntoResponse for CacheFailure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            cache::Error::Validation(_) => StatusCode::BAD_REQUEST,
            cache::Error::Download(_) => StatusCode::BAD_GATEWAY,
            cache::Error::Storage(_) | cache::Error::Join(_, _) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ApiError {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Wildcard captures may carry the leading slash
fn asset_id(raw: &str) -> &str {
    raw.trim_start_matches('/')
}

async fn resolve_asset(
    State(cache): State<AssetCache>,
    Path(raw): Path<String>,
) -> Result<Json<ResolvedAsset>, CacheFailure> {
    let id = asset_id(&raw);
    let path = cache.resolve(id).await?;
    Ok(Json(ResolvedAsset {
        id: id.to_owned(),
        path,
    }))
}

async fn asset_state(
    State(cache): State<AssetCache>,
    Path(raw): Path<String>,
) -> Result<Json<AssetState>, CacheFailure> {
    let id = asset_id(&raw);
    let state = cache.state(id).await?;
    Ok(Json(AssetState {
        id: id.to_owned(),
        state,
    }))
}

async fn clear_assets(State(cache): State<AssetCache>) -> Result<StatusCode, CacheFailure> {
    cache.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn events(State(journal): State<Journal>) -> Json<Vec<String>> {
    Json(journal.lines().await)
}

async fn progress(State(journal): State<Journal>) -> Json<Option<ProgressReport>> {
    Json(journal.progress().await)
}

pub fn routes() -> Router<ApplicationState> {
    Router::new()
        .route("/assets", axum::routing::delete(clear_assets))
        .route("/assets/*id", get(resolve_asset))
        .route("/state/*id", get(asset_state))
        .route("/events", get(events))
        .route("/progress", get(progress))
}
