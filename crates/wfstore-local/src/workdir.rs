use std::path::PathBuf;

use chrono::Local;
use tokio::fs;
use tracing::info;
use wfstore_core::{StorageConfig, StorageError};

/// Directory name format; microseconds keep rapid successive calls apart.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// Create `{local_root}/{prefix}/{YYYYMMDD_HHMMSS_ffffff}` and return it.
///
/// Missing parents are created and an existing directory is reused. The
/// caller owns the directory from then on.
pub async fn allocate_directory(
    config: &StorageConfig,
    prefix: &str,
) -> Result<PathBuf, StorageError> {
    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let dir = config
        .local_root()
        .join(prefix.trim_start_matches('/'))
        .join(timestamp);

    fs::create_dir_all(&dir).await.map_err(|e| {
        StorageError::Io(format!(
            "Failed to create directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    info!("Creating a timestamped temporary directory. {}", dir.display());
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(root: &TempDir) -> StorageConfig {
        StorageConfig::builder(root.path())
            .without_heartbeat()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_allocates_under_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        let dir = allocate_directory(&config, "wf/run").await.unwrap();

        assert!(dir.is_dir());
        assert!(dir.starts_with(temp_dir.path().join("wf/run")));
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), "YYYYMMDD_HHMMSS_ffffff".len());
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![8, 6, 6]);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
    }

    #[tokio::test]
    async fn test_successive_calls_are_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        let first = allocate_directory(&config, "p").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = allocate_directory(&config, "p").await.unwrap();

        assert_ne!(first, second);
        assert!(first.is_dir());
        assert!(second.is_dir());
    }

    #[tokio::test]
    async fn test_empty_and_absolute_prefix_stay_under_root() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        let plain = allocate_directory(&config, "").await.unwrap();
        assert_eq!(plain.parent().unwrap(), temp_dir.path());

        let rooted = allocate_directory(&config, "/abs").await.unwrap();
        assert!(rooted.starts_with(temp_dir.path().join("abs")));
    }
}
