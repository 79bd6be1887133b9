use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::uri::{StorageUri, UriKind};

/// Single-object transfer primitive for one kind of storage.
///
/// Implementations only move bytes; backend resolution, deep localization and
/// checksum sidecars are handled by the `Localizer`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name used in logs ("local", "s3", ...).
    fn backend_name(&self) -> &'static str;

    /// Whether an object exists at `uri`.
    async fn exists(&self, uri: &StorageUri) -> Result<bool, StorageError>;

    /// Read the whole object. Missing objects are `StorageError::NotFound`.
    ///
    /// The object is buffered in memory, so copies need as much RAM as the
    /// largest file being localized.
    async fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite the object at `uri`.
    ///
    /// Readers must never observe a partially written object at `uri`.
    async fn write(&self, uri: &StorageUri, data: &[u8]) -> Result<(), StorageError>;

    /// Lowercase hex MD5 of the object, `None` if it does not exist or the
    /// store cannot provide one cheaply.
    async fn md5(&self, uri: &StorageUri) -> Result<Option<String>, StorageError>;
}

/// Object stores available to a `Localizer`, one slot per storage kind.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    local: Option<Arc<dyn ObjectStore>>,
    gcs: Option<Arc<dyn ObjectStore>>,
    s3: Option<Arc<dyn ObjectStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` for `kind`, replacing any previous one.
    pub fn with_store(mut self, kind: UriKind, store: Arc<dyn ObjectStore>) -> Self {
        *self.slot_mut(kind) = Some(store);
        self
    }

    pub fn get(&self, kind: UriKind) -> Option<&Arc<dyn ObjectStore>> {
        match kind {
            UriKind::Local => self.local.as_ref(),
            UriKind::Gcs => self.gcs.as_ref(),
            UriKind::S3 => self.s3.as_ref(),
        }
    }

    /// Store responsible for `uri`; a missing store is a configuration error.
    pub fn store_for(&self, uri: &StorageUri) -> Result<&Arc<dyn ObjectStore>, StorageError> {
        self.get(uri.kind()).ok_or_else(|| {
            StorageError::Configuration(format!(
                "no {} object store configured for {}",
                uri.kind(),
                uri
            ))
        })
    }

    fn slot_mut(&mut self, kind: UriKind) -> &mut Option<Arc<dyn ObjectStore>> {
        match kind {
            UriKind::Local => &mut self.local,
            UriKind::Gcs => &mut self.gcs,
            UriKind::S3 => &mut self.s3,
        }
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("local", &self.local.as_ref().map(|s| s.backend_name()))
            .field("gcs", &self.gcs.as_ref().map(|s| s.backend_name()))
            .field("s3", &self.s3.as_ref().map(|s| s.backend_name()))
            .finish()
    }
}
