use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::uri::UriKind;

/// Execution backend a job runs on.
///
/// Only `gcp` and `aws` are recognized as remote backends; every other
/// identifier (`Local`, `slurm`, `sge`, ...) runs against local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Local,
    Gcp,
    Aws,
}

impl BackendKind {
    pub const GCP: &'static str = "gcp";
    pub const AWS: &'static str = "aws";

    /// Map any backend identifier to a kind, falling back to `Local`.
    pub fn from_identifier(identifier: &str) -> Self {
        if identifier.eq_ignore_ascii_case(Self::GCP) {
            BackendKind::Gcp
        } else if identifier.eq_ignore_ascii_case(Self::AWS) {
            BackendKind::Aws
        } else {
            BackendKind::Local
        }
    }

    /// Storage kind files must be localized to for this backend.
    pub fn storage_kind(self) -> UriKind {
        match self {
            BackendKind::Local => UriKind::Local,
            BackendKind::Gcp => UriKind::Gcs,
            BackendKind::Aws => UriKind::S3,
        }
    }

    /// Tag used in the names of documents rewritten for this backend.
    pub fn tag(self) -> &'static str {
        self.storage_kind().tag()
    }
}

impl FromStr for BackendKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BackendKind::from_identifier(s))
    }
}

impl From<&str> for BackendKind {
    fn from(s: &str) -> Self {
        BackendKind::from_identifier(s)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Gcp => f.write_str(Self::GCP),
            BackendKind::Aws => f.write_str(Self::AWS),
        }
    }
}
