use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, instrument, warn};
use wfstore_core::{ObjectStore, StorageError, StorageUri};

/// Attempts after the first for transient failures.
const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;

/// Object store for `s3://bucket/key` URIs.
///
/// The bucket comes from each URI, so one store serves every bucket the
/// credentials can reach.
#[derive(Clone)]
pub struct S3Store {
    s3_client: S3Client,
}

impl S3Store {
    pub fn new(s3_client: S3Client) -> Self {
        Self { s3_client }
    }

    /// Build a client from the default AWS credential chain and region.
    /// `endpoint_url` targets S3-compatible services (path-style addressing).
    pub async fn from_env(endpoint_url: Option<&str>) -> Self {
        let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(S3Client::from_conf(builder.build()))
    }

    fn location(uri: &StorageUri) -> Result<(&str, &str), StorageError> {
        match uri {
            StorageUri::S3 { bucket, key } if !key.is_empty() => Ok((bucket.as_str(), key.as_str())),
            StorageUri::S3 { .. } => Err(StorageError::InvalidUri(format!(
                "S3 object key missing in {}",
                uri
            ))),
            _ => Err(StorageError::InvalidUri(format!(
                "S3Store only supports s3:// URIs, got {}",
                uri
            ))),
        }
    }

    /// Head an object. Returns `None` if the object does not exist.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<HeadObjectOutput>, StorageError> {
        for attempt in 0..=MAX_RETRIES {
            let result = self
                .s3_client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await;

            match result {
                Ok(output) => return Ok(Some(output)),
                Err(e) => {
                    if is_transient(&e) && attempt < MAX_RETRIES {
                        let delay = retry_delay(attempt);
                        warn!(attempt, bucket, key, ?delay, "S3 head_object failed transiently, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let service_error = e.into_service_error();
                    if service_error.is_not_found() {
                        return Ok(None);
                    }
                    return Err(StorageError::Io(format!(
                        "S3 head_object error: {}",
                        service_error
                    )));
                }
            }
        }
        unreachable!()
    }
}

/// Delay before retry number `attempt + 1`: doubling from `BASE_DELAY_MS`,
/// plus up to 50 ms of clock-derived jitter.
fn retry_delay(attempt: u32) -> Duration {
    let jitter = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % 50)
        .unwrap_or(0);
    Duration::from_millis((BASE_DELAY_MS << attempt) + jitter)
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Throttling, server errors, timeouts and dispatch failures.
fn is_transient<E>(err: &SdkError<E>) -> bool {
    match err {
        SdkError::ServiceError(e) => is_transient_status(e.raw().status().as_u16()),
        SdkError::ResponseError(e) => is_transient_status(e.raw().status().as_u16()),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        _ => false,
    }
}

/// ETags of single-part uploads are the hex MD5 of the content; multipart
/// ETags carry a `-N` part count and are not digests.
fn etag_to_md5(etag: &str) -> Option<String> {
    let etag = etag.trim_matches('"');
    if etag.len() == 32 && etag.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(etag.to_ascii_lowercase())
    } else {
        None
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), level = "debug")]
    async fn exists(&self, uri: &StorageUri) -> Result<bool, StorageError> {
        // A bucket root is not an object
        if uri.is_bucket_root() {
            return Ok(false);
        }
        let (bucket, key) = Self::location(uri)?;
        Ok(self.head_object(bucket, key).await?.is_some())
    }

    #[instrument(skip(self), level = "debug")]
    async fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, StorageError> {
        let (bucket, key) = Self::location(uri)?;
        for attempt in 0..=MAX_RETRIES {
            let result = self
                .s3_client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await;

            match result {
                Ok(output) => {
                    let bytes = output
                        .body
                        .collect()
                        .await
                        .map_err(|e| {
                            StorageError::Io(format!("Failed to read S3 object body: {}", e))
                        })?
                        .into_bytes();
                    debug!("Read {} bytes from {}", bytes.len(), uri);
                    return Ok(bytes.to_vec());
                }
                Err(e) => {
                    if is_transient(&e) && attempt < MAX_RETRIES {
                        let delay = retry_delay(attempt);
                        warn!(attempt, bucket, key, ?delay, "S3 get_object failed transiently, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_key() {
                        return Err(StorageError::NotFound(uri.to_string()));
                    }
                    return Err(StorageError::Io(format!(
                        "S3 get_object error: {}",
                        service_error
                    )));
                }
            }
        }
        unreachable!()
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn write(&self, uri: &StorageUri, data: &[u8]) -> Result<(), StorageError> {
        let (bucket, key) = Self::location(uri)?;
        for attempt in 0..=MAX_RETRIES {
            let result = self
                .s3_client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if is_transient(&e) && attempt < MAX_RETRIES {
                        let delay = retry_delay(attempt);
                        warn!(attempt, bucket, key, ?delay, "S3 put_object failed transiently, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(StorageError::Io(format!("S3 put_object error: {}", e)));
                }
            }
        }
        unreachable!()
    }

    async fn md5(&self, uri: &StorageUri) -> Result<Option<String>, StorageError> {
        let (bucket, key) = Self::location(uri)?;
        Ok(self
            .head_object(bucket, key)
            .await?
            .and_then(|head| head.e_tag().and_then(etag_to_md5)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_retry_policy() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(403));

        let first = retry_delay(0);
        assert!(first >= Duration::from_millis(200) && first < Duration::from_millis(250));
        assert!(retry_delay(3) >= Duration::from_millis(1600));
    }

    #[test]
    fn test_etag_to_md5() {
        assert_eq!(
            etag_to_md5("\"5D41402ABC4B2A76B9719D911017C592\"").as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(etag_to_md5("\"5d41402abc4b2a76b9719d911017c592-3\""), None);
        assert_eq!(etag_to_md5(""), None);
    }

    fn offline_store() -> S3Store {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        S3Store::new(S3Client::from_conf(conf))
    }

    #[tokio::test]
    async fn test_bucket_root_does_not_exist() {
        let store = offline_store();
        for root in ["s3://my-output-bucket", "s3://my-output-bucket/"] {
            let uri = StorageUri::parse(root).unwrap();
            assert!(!store.exists(&uri).await.unwrap());
        }
    }

    #[test]
    fn test_location() {
        let uri = StorageUri::parse("s3://bkt/a/b.txt").unwrap();
        assert_eq!(S3Store::location(&uri).unwrap(), ("bkt", "a/b.txt"));

        let bucket_only = StorageUri::parse("s3://bkt").unwrap();
        assert!(S3Store::location(&bucket_only).is_err());

        let gcs = StorageUri::parse("gs://bkt/a").unwrap();
        assert!(matches!(
            S3Store::location(&gcs),
            Err(StorageError::InvalidUri(_))
        ));
    }
}
