use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Couldn't create cache directory '{path}', error: '{source}'")]
    Create {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Couldn't remove cache directory '{path}', error: '{source}'")]
    Remove {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Cache root '{0}' exists but is not a directory")]
    NotADirectory(PathBuf),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Makes sure `root` exists as a directory, creating missing parents.
/// Returns true if the directory had to be created.
pub async fn ensure_dir(root: &Path) -> Result<bool> {
    match tokio::fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => return Ok(false),
        Ok(_) => return Err(StorageError::NotADirectory(root.to_owned())),
        Err(_) => {}
    }
    log::info!(
        "Cache directory {} doesn't exist, creating...",
        root.to_string_lossy()
    );
    // create_dir_all succeeds when a concurrent caller created it first
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| StorageError::Create {
            path: root.to_owned(),
            source: Arc::new(e),
        })?;
    Ok(true)
}

/// Presence of a regular file is all that counts as cached.
pub async fn exists(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.is_file(),
        _ => false,
    }
}

/// Recursively removes `root`, a missing directory is not an error.
pub async fn remove_dir(root: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(root).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!(
                "Cache directory {} was already removed",
                root.to_string_lossy()
            );
            Ok(())
        }
        Err(e) => Err(StorageError::Remove {
            path: root.to_owned(),
            source: Arc::new(e),
        }),
    }
}
