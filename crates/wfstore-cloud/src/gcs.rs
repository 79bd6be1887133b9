//! Google Cloud Storage JSON API client.
//!
//! Token is a plain OAuth2 access token supplied by the caller; without one
//! requests are anonymous and only public buckets are reachable.
//! URI format: `gs://{bucket}/{object}`

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};
use wfstore_core::{ObjectStore, StorageError, StorageUri};

pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

/// Object metadata returned by the GCS JSON API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    /// Base64-encoded MD5 (absent for composite objects)
    #[serde(default)]
    pub md5_hash: Option<String>,
}

impl ObjectMetadata {
    /// Hex form of `md5_hash`.
    pub fn md5_hex(&self) -> Option<String> {
        let raw = BASE64.decode(self.md5_hash.as_deref()?).ok()?;
        Some(hex::encode(raw))
    }
}

/// Object store for `gs://bucket/object` URIs.
pub struct GcsStore {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl GcsStore {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
        }
    }

    /// Point the client at another endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn location(uri: &StorageUri) -> Result<(&str, &str), StorageError> {
        match uri {
            StorageUri::Gcs { bucket, key } if !key.is_empty() => {
                Ok((bucket.as_str(), key.as_str()))
            }
            StorageUri::Gcs { .. } => Err(StorageError::InvalidUri(format!(
                "GCS object name missing in {}",
                uri
            ))),
            _ => Err(StorageError::InvalidUri(format!(
                "GcsStore only supports gs:// URIs, got {}",
                uri
            ))),
        }
    }

    /// `{base}/storage/v1/b/{bucket}/o/{object}` with the object name
    /// percent-encoded as a single path segment.
    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StorageError> {
        let mut url = self.parse_url(&format!("{}/storage/v1/b", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Configuration(format!("invalid GCS base URL {}", self.base_url)))?
            .push(bucket)
            .push("o")
            .push(key);
        Ok(url)
    }

    fn upload_url(&self, bucket: &str, key: &str) -> Result<Url, StorageError> {
        let mut url = self.parse_url(&format!("{}/upload/storage/v1/b", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Configuration(format!("invalid GCS base URL {}", self.base_url)))?
            .push(bucket)
            .push("o");
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn parse_url(&self, url: &str) -> Result<Url, StorageError> {
        Url::parse(url).map_err(|e| {
            StorageError::Configuration(format!("invalid GCS base URL {}: {}", self.base_url, e))
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Get object metadata. Returns `None` for missing objects.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        let url = self.object_url(bucket, key)?;
        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("GCS metadata request failed: {}", e)))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Io(format!(
                "GCS metadata error {}: {}",
                status, body
            )));
        }

        let metadata: ObjectMetadata = resp
            .json()
            .await
            .map_err(|e| StorageError::Serialization(format!("GCS metadata: {}", e)))?;
        debug!("Got metadata for gs://{}/{}: {:?}", bucket, key, metadata);
        Ok(Some(metadata))
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn backend_name(&self) -> &'static str {
        "gcs"
    }

    async fn exists(&self, uri: &StorageUri) -> Result<bool, StorageError> {
        // A bucket root is not an object
        if uri.is_bucket_root() {
            return Ok(false);
        }
        let (bucket, key) = Self::location(uri)?;
        Ok(self.get_metadata(bucket, key).await?.is_some())
    }

    #[instrument(skip(self), level = "debug")]
    async fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, StorageError> {
        let (bucket, key) = Self::location(uri)?;
        let mut url = self.object_url(bucket, key)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("GCS download request failed: {}", e)))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(uri.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Io(format!(
                "GCS download error {}: {}",
                status, body
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Io(format!("Failed to read GCS object body: {}", e)))?;
        debug!("Downloaded {} bytes from {}", bytes.len(), uri);
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn write(&self, uri: &StorageUri, data: &[u8]) -> Result<(), StorageError> {
        let (bucket, key) = Self::location(uri)?;
        let url = self.upload_url(bucket, key)?;

        let resp = self
            .authorize(self.http.post(url))
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("GCS upload request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Io(format!(
                "GCS upload error {}: {}",
                status, body
            )));
        }

        debug!("Uploaded {} ({} bytes)", uri, data.len());
        Ok(())
    }

    async fn md5(&self, uri: &StorageUri) -> Result<Option<String>, StorageError> {
        let (bucket, key) = Self::location(uri)?;
        Ok(self
            .get_metadata(bucket, key)
            .await?
            .and_then(|metadata| metadata.md5_hex()))
    }
}
