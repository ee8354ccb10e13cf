pub mod cache;
pub mod httpdownload;
pub mod mapper;
pub mod storage;
pub mod util;

pub use cache::{AssetCache, CacheConfig, CacheEvent, CacheState};
pub use httpdownload::{Downloader, HttpDownloader, ProgressEvent};
pub use mapper::{AssetId, PathMapper};

pub const DEFAULT_USER_AGENT: &str = "assetcache";
