use reqwest::header::{self, HeaderMap};
use std::error::Error;
use std::path::Path;

/// Extracts filesize from path, if file does not exist or read fails the function returns 0
pub async fn file_size(fpath: &Path) -> u64 {
    match tokio::fs::metadata(fpath).await {
        Ok(metadata) => metadata.len(),
        _ => 0,
    }
}
pub const HALF_SECOND: std::time::Duration = std::time::Duration::from_millis(500);
pub type TestResult<T> = std::result::Result<T, Box<dyn Error>>;

pub fn kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

/**
 * Reads the complete size of the resource out of a `Content-Range: bytes a-b/total` header
 * Returns None if the header is missing, malformed or the total is unknown ('*')
 */
pub fn total_from_content_range(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.strip_prefix("bytes ")?.split_once('/')?;
    total.trim().parse().ok()
}
