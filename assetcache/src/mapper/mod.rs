use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Url;
use serde::Serialize;

pub const DEFAULT_URL_TEMPLATE: &str = "https://w.wallhaven.cc/full/{id}.jpg";
pub const DEFAULT_FILE_PREFIX: &str = "file_";
pub const ID_PLACEHOLDER: &str = "{id}";
const SEGMENT_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Asset id is empty")]
    Empty,
    #[error("Asset id '{0}' contains '{1}', which is not allowed in a url path segment")]
    InvalidChar(String, char),
    #[error("Asset id '{0}' contains an empty or relative path segment")]
    InvalidSegment(String),
    #[error("Url built for asset id '{0}' is invalid: '{1}'")]
    InvalidUrl(String, String),
    #[error("Asset id '{0}' maps to the same local file as asset id '{1}'")]
    Collision(String, String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Identifier of a remote asset, e.g. `k7/wallhaven-k7838q`.
/// Only url path-segment safe characters and `/` as segment separator are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !is_segment_char(*c) && *c != SEGMENT_SEPARATOR)
        {
            return Err(ValidationError::InvalidChar(raw, c));
        }
        // a leading dot is reserved for partial download files
        let bad_segment = raw
            .split(SEGMENT_SEPARATOR)
            .any(|s| s.is_empty() || s == "." || s == "..");
        if bad_segment || raw.starts_with('.') {
            return Err(ValidationError::InvalidSegment(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id with every path separator removed, `a/b-c` becomes `ab-c`.
    pub fn sanitized(&self) -> String {
        self.0.chars().filter(|c| *c != SEGMENT_SEPARATOR).collect()
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
}

impl FromStr for AssetId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps asset ids to their remote url and their file inside the cache root.
/// Both mappings are pure, the filesystem is never touched.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    url_template: String,
    file_prefix: String,
}

impl PathMapper {
    pub fn new(
        root: impl Into<PathBuf>,
        url_template: impl Into<String>,
        file_prefix: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            url_template: url_template.into(),
            file_prefix: file_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote_url_for(&self, id: &AssetId) -> Result<Url> {
        let raw = self.url_template.replace(ID_PLACEHOLDER, id.as_str());
        Url::parse(&raw).map_err(|e| ValidationError::InvalidUrl(id.to_string(), e.to_string()))
    }

    pub fn local_path_for(&self, id: &AssetId) -> PathBuf {
        self.root.join(self.file_name_for(id))
    }

    pub fn file_name_for(&self, id: &AssetId) -> String {
        format!("{}{}", self.file_prefix, id.sanitized())
    }
}
