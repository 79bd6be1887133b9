use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::StorageError;

/// Storage kinds a `StorageUri` can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriKind {
    Local,
    Gcs,
    S3,
}

impl UriKind {
    /// Short tag inserted into the name of rewritten documents
    /// (`test.json` -> `test.gcs.json`).
    pub fn tag(self) -> &'static str {
        match self {
            UriKind::Local => "local",
            UriKind::Gcs => "gcs",
            UriKind::S3 => "s3",
        }
    }

    /// URI scheme prefix, `None` for plain filesystem paths.
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            UriKind::Local => None,
            UriKind::Gcs => Some("gs://"),
            UriKind::S3 => Some("s3://"),
        }
    }
}

impl fmt::Display for UriKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A parsed storage location.
///
/// Accepted forms:
/// ```text
/// /absolute/local/path
/// gs://bucket[/key]
/// s3://bucket[/key]
/// ```
/// Keys are stored without leading or trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageUri {
    Local(PathBuf),
    Gcs { bucket: String, key: String },
    S3 { bucket: String, key: String },
}

impl StorageUri {
    /// Parse a path or URI string.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        if let Some(rest) = s.strip_prefix("gs://") {
            let (bucket, key) = split_bucket(s, rest, UriKind::Gcs)?;
            return Ok(StorageUri::Gcs { bucket, key });
        }
        if let Some(rest) = s.strip_prefix("s3://") {
            let (bucket, key) = split_bucket(s, rest, UriKind::S3)?;
            return Ok(StorageUri::S3 { bucket, key });
        }
        if s.contains("://") {
            return Err(StorageError::InvalidUri(format!(
                "unsupported scheme: {}",
                s
            )));
        }
        if s.is_empty() || !Path::new(s).is_absolute() {
            return Err(StorageError::InvalidUri(format!(
                "not an absolute path: {}",
                s
            )));
        }
        Ok(StorageUri::Local(PathBuf::from(s)))
    }

    pub fn kind(&self) -> UriKind {
        match self {
            StorageUri::Local(_) => UriKind::Local,
            StorageUri::Gcs { .. } => UriKind::Gcs,
            StorageUri::S3 { .. } => UriKind::S3,
        }
    }

    /// `gs://bucket` or `s3://bucket` with no object key.
    pub fn is_bucket_root(&self) -> bool {
        match self {
            StorageUri::Local(_) => false,
            StorageUri::Gcs { key, .. } | StorageUri::S3 { key, .. } => key.is_empty(),
        }
    }

    /// Filesystem path for local URIs.
    pub fn as_local_path(&self) -> Option<&Path> {
        match self {
            StorageUri::Local(path) => Some(path),
            _ => None,
        }
    }

    /// Scheme-less, slash-separated form used to place this object under
    /// another prefix: `/a/b.json` -> `a/b.json`, `gs://bkt/a/b.json` -> `bkt/a/b.json`.
    pub fn relative_path(&self) -> String {
        match self {
            StorageUri::Local(path) => path
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/"),
            StorageUri::Gcs { bucket, key } | StorageUri::S3 { bucket, key } => {
                if key.is_empty() {
                    bucket.clone()
                } else {
                    format!("{}/{}", bucket, key)
                }
            }
        }
    }

    /// Append a slash-separated relative path.
    pub fn join(&self, relative: &str) -> StorageUri {
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            return self.clone();
        }
        match self {
            StorageUri::Local(path) => {
                let mut joined = path.clone();
                for part in relative.split('/').filter(|p| !p.is_empty()) {
                    joined.push(part);
                }
                StorageUri::Local(joined)
            }
            StorageUri::Gcs { bucket, key } => StorageUri::Gcs {
                bucket: bucket.clone(),
                key: join_key(key, relative),
            },
            StorageUri::S3 { bucket, key } => StorageUri::S3 {
                bucket: bucket.clone(),
                key: join_key(key, relative),
            },
        }
    }

    /// Last path segment, if any.
    pub fn file_name(&self) -> Option<String> {
        match self {
            StorageUri::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            StorageUri::Gcs { key, .. } | StorageUri::S3 { key, .. } => key
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    /// Lowercased extension of the last segment.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                Some(ext.to_ascii_lowercase())
            }
            _ => None,
        }
    }

    /// Insert `.{tag}` before the final extension of the last segment.
    pub fn with_tag(&self, tag: &str) -> StorageUri {
        let Some(name) = self.file_name() else {
            return self.clone();
        };
        let tagged = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{}.{}.{}", stem, tag, ext),
            _ => format!("{}.{}", name, tag),
        };
        self.with_file_name(&tagged)
    }

    /// Append a raw suffix to the last segment (`x.txt` -> `x.txt.md5`).
    pub fn with_suffix(&self, suffix: &str) -> StorageUri {
        match self.file_name() {
            Some(name) => self.with_file_name(&format!("{}{}", name, suffix)),
            None => self.clone(),
        }
    }

    fn with_file_name(&self, name: &str) -> StorageUri {
        match self {
            StorageUri::Local(path) => StorageUri::Local(path.with_file_name(name)),
            StorageUri::Gcs { bucket, key } => StorageUri::Gcs {
                bucket: bucket.clone(),
                key: replace_last_segment(key, name),
            },
            StorageUri::S3 { bucket, key } => StorageUri::S3 {
                bucket: bucket.clone(),
                key: replace_last_segment(key, name),
            },
        }
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageUri::Local(path) => write!(f, "{}", path.display()),
            StorageUri::Gcs { bucket, key } | StorageUri::S3 { bucket, key } => {
                let scheme = self.kind().scheme().unwrap_or_default();
                if key.is_empty() {
                    write!(f, "{}{}", scheme, bucket)
                } else {
                    write!(f, "{}{}/{}", scheme, bucket, key)
                }
            }
        }
    }
}

impl FromStr for StorageUri {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageUri::parse(s)
    }
}

fn split_bucket(uri: &str, rest: &str, kind: UriKind) -> Result<(String, String), StorageError> {
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    let valid = match kind {
        UriKind::Gcs => is_valid_gcs_bucket(bucket),
        UriKind::S3 => is_valid_s3_bucket(bucket),
        UriKind::Local => false,
    };
    if !valid {
        return Err(StorageError::InvalidUri(format!(
            "invalid {} bucket name in {}",
            kind, uri
        )));
    }
    Ok((bucket.to_string(), key.trim_matches('/').to_string()))
}

fn is_bucket_edge(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// 3-63 chars of `[a-z0-9_.-]`, or up to 222 when dotted with each
/// dot-separated component at most 63. Starts and ends with a letter or digit.
fn is_valid_gcs_bucket(bucket: &str) -> bool {
    let bytes = bucket.as_bytes();
    let max_len = if bucket.contains('.') { 222 } else { 63 };
    if !(3..=max_len).contains(&bytes.len()) {
        return false;
    }
    is_bucket_edge(bytes[0])
        && is_bucket_edge(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| is_bucket_edge(b) || b == b'-' || b == b'_' || b == b'.')
        && bucket.split('.').all(|part| !part.is_empty() && part.len() <= 63)
}

/// 3-63 chars of `[a-z0-9.-]`, starting and ending with a letter or digit,
/// no empty dot-separated labels.
fn is_valid_s3_bucket(bucket: &str) -> bool {
    let bytes = bucket.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }
    is_bucket_edge(bytes[0])
        && is_bucket_edge(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| is_bucket_edge(b) || b == b'-' || b == b'.')
        && !bucket.contains("..")
}

fn join_key(key: &str, relative: &str) -> String {
    if key.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", key, relative)
    }
}

fn replace_last_segment(key: &str, name: &str) -> String {
    match key.rsplit_once('/') {
        Some((parent, _)) => format!("{}/{}", parent, name),
        None => name.to_string(),
    }
}
