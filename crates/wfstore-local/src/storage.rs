use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;
use wfstore_core::{md5_hex, ObjectStore, StorageError, StorageUri};

/// Object store over the local filesystem.
///
/// Only regular files count as objects; directories are reported as absent.
/// Writes go through a temp file in the destination directory followed by a
/// rename, so concurrent readers see either the old or the new content.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }

    fn path_of(uri: &StorageUri) -> Result<&Path, StorageError> {
        uri.as_local_path().ok_or_else(|| {
            StorageError::InvalidUri(format!(
                "LocalStore only supports local paths, got {}",
                uri
            ))
        })
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, uri: &StorageUri) -> Result<bool, StorageError> {
        let path = Self::path_of(uri)?;
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(format!(
                "Failed to stat {}: {}",
                path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, StorageError> {
        let path = Self::path_of(uri)?;
        fs::read(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(path.display().to_string())
            } else {
                StorageError::Io(format!("Failed to read {}: {}", path.display(), e))
            }
        })
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn write(&self, uri: &StorageUri, data: &[u8]) -> Result<(), StorageError> {
        write_atomic(Self::path_of(uri)?, data).await
    }

    async fn md5(&self, uri: &StorageUri) -> Result<Option<String>, StorageError> {
        let path = Self::path_of(uri)?;
        match fs::read(path).await {
            Ok(data) => Ok(Some(md5_hex(&data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Write `data` to `path` via a uniquely named temp file and a rename,
/// creating missing parent directories.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().ok_or_else(|| {
        StorageError::Io(format!("No parent directory for {}", path.display()))
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| StorageError::Io(format!("No file name in {}", path.display())))?;

    fs::create_dir_all(parent).await.map_err(|e| {
        StorageError::Io(format!(
            "Failed to create parent directory for {}: {}",
            path.display(),
            e
        ))
    })?;

    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    fs::write(&temp_path, data).await.map_err(|e| {
        StorageError::Io(format!(
            "Failed to write temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::Io(format!(
            "Failed to rename temp file to {}: {}",
            path.display(),
            e
        )));
    }

    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
