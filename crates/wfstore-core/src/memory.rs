use async_trait::async_trait;
use dashmap::DashMap;

use crate::checksum::md5_hex;
use crate::error::StorageError;
use crate::store::ObjectStore;
use crate::uri::StorageUri;

/// In-memory object store. Useful for tests and dry runs; holds objects of
/// any storage kind keyed by their full URI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<StorageUri, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without going through the async API.
    pub fn insert(&self, uri: StorageUri, data: impl Into<Vec<u8>>) {
        self.objects.insert(uri, data.into());
    }

    pub fn get(&self, uri: &StorageUri) -> Option<Vec<u8>> {
        self.objects.get(uri).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sorted URIs of every stored object.
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.objects.iter().map(|e| e.key().to_string()).collect();
        uris.sort();
        uris
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, uri: &StorageUri) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(uri))
    }

    async fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, StorageError> {
        self.get(uri)
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }

    async fn write(&self, uri: &StorageUri, data: &[u8]) -> Result<(), StorageError> {
        self.objects.insert(uri.clone(), data.to_vec());
        Ok(())
    }

    async fn md5(&self, uri: &StorageUri) -> Result<Option<String>, StorageError> {
        Ok(self.objects.get(uri).map(|entry| md5_hex(entry.value())))
    }
}
