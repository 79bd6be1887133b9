use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::backend::BackendKind;
use crate::error::StorageError;
use crate::uri::{StorageUri, UriKind};

/// Default staleness timeout for the heartbeat file.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(120_000);
/// Default cadence of the background heartbeat writer.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Where the server liveness record lives and how long it stays fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Heartbeat file path
    pub file: PathBuf,
    /// Records whose file is older than this are ignored
    pub timeout: Duration,
    /// How often a running server rewrites the record
    pub interval: Duration,
}

impl HeartbeatSettings {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// `~/.wfstore/default_server_heartbeat`
    pub fn default_file() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wfstore")
            .join("default_server_heartbeat")
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self::new(Self::default_file())
    }
}

/// Storage roots per backend plus heartbeat settings.
///
/// Built once through [`StorageConfig::builder`]; every root is validated in
/// [`StorageConfigBuilder::build`] and the value is immutable afterwards.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    local_root: PathBuf,
    local_root_uri: StorageUri,
    gcs_root: Option<StorageUri>,
    s3_root: Option<StorageUri>,
    heartbeat: Option<HeartbeatSettings>,
}

impl StorageConfig {
    pub fn builder(local_root: impl Into<PathBuf>) -> StorageConfigBuilder {
        StorageConfigBuilder {
            local_root: local_root.into(),
            gcs_root: None,
            s3_root: None,
            heartbeat: Some(HeartbeatSettings::default()),
        }
    }

    /// Local cache directory used for the local backend.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn gcs_root(&self) -> Option<&StorageUri> {
        self.gcs_root.as_ref()
    }

    pub fn s3_root(&self) -> Option<&StorageUri> {
        self.s3_root.as_ref()
    }

    /// `None` when the heartbeat feature is disabled.
    pub fn heartbeat(&self) -> Option<&HeartbeatSettings> {
        self.heartbeat.as_ref()
    }

    /// Storage prefix files are localized to for `backend`.
    /// `None` means the backend's root was never configured.
    pub fn storage_root(&self, backend: BackendKind) -> Option<&StorageUri> {
        match backend {
            BackendKind::Local => Some(&self.local_root_uri),
            BackendKind::Gcp => self.gcs_root.as_ref(),
            BackendKind::Aws => self.s3_root.as_ref(),
        }
    }
}

/// Builder for [`StorageConfig`].
#[derive(Debug, Clone)]
pub struct StorageConfigBuilder {
    local_root: PathBuf,
    gcs_root: Option<String>,
    s3_root: Option<String>,
    heartbeat: Option<HeartbeatSettings>,
}

impl StorageConfigBuilder {
    pub fn gcs_root(mut self, root: impl Into<String>) -> Self {
        self.gcs_root = Some(root.into());
        self
    }

    pub fn s3_root(mut self, root: impl Into<String>) -> Self {
        self.s3_root = Some(root.into());
        self
    }

    pub fn heartbeat(mut self, settings: HeartbeatSettings) -> Self {
        self.heartbeat = Some(settings);
        self
    }

    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }

    pub fn build(self) -> Result<StorageConfig, StorageError> {
        let local_root = self.local_root;
        if local_root.as_os_str().is_empty() || !local_root.is_absolute() {
            return Err(StorageError::Configuration(format!(
                "local root should be a valid local absolute path: {}",
                local_root.display()
            )));
        }
        if is_reserved_temp_dir(&local_root) {
            return Err(StorageError::Configuration(format!(
                "the system temporary directory is not allowed as local root: {}",
                local_root.display()
            )));
        }

        let gcs_root = parse_root(self.gcs_root.as_deref(), UriKind::Gcs)?;
        let s3_root = parse_root(self.s3_root.as_deref(), UriKind::S3)?;

        debug!(
            local_root = %local_root.display(),
            gcs_root = ?gcs_root.as_ref().map(|u| u.to_string()),
            s3_root = ?s3_root.as_ref().map(|u| u.to_string()),
            "Validated storage config"
        );

        Ok(StorageConfig {
            local_root_uri: StorageUri::Local(local_root.clone()),
            local_root,
            gcs_root,
            s3_root,
            heartbeat: self.heartbeat,
        })
    }
}

/// Empty strings count as "not configured".
fn parse_root(root: Option<&str>, kind: UriKind) -> Result<Option<StorageUri>, StorageError> {
    let Some(root) = root.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    match StorageUri::parse(root) {
        Ok(uri) if uri.kind() == kind => Ok(Some(uri)),
        _ => Err(StorageError::Configuration(format!(
            "{} root should be a valid {}bucket path: {}",
            kind,
            kind.scheme().unwrap_or_default(),
            root
        ))),
    }
}

fn is_reserved_temp_dir(path: &Path) -> bool {
    if path == std::env::temp_dir() {
        return true;
    }
    cfg!(unix) && path == Path::new("/tmp")
}
