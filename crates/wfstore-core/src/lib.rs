//! Core traits and types for wfstore.
//!
//! This crate defines the pieces shared between the local and cloud crates:
//! - `BackendKind`: execution backend identifiers and their storage kind
//! - `StorageUri`: parsed local paths, `gs://` and `s3://` URIs
//! - `StorageConfig`: validated storage roots and heartbeat settings
//! - `ObjectStore`: single-object transfer primitive implemented per storage
//! - `Localizer`: backend-aware (deep) localization on top of `ObjectStore`

mod backend;
mod checksum;
mod config;
mod error;
mod localize;
mod memory;
mod store;
mod uri;

pub use backend::BackendKind;
pub use checksum::{md5_hex, CHECKSUM_SUFFIX};
pub use config::{HeartbeatSettings, StorageConfig, StorageConfigBuilder};
pub use error::StorageError;
pub use localize::{LocalizationRequest, LocalizationResult, Localizer, MAX_RECURSION_DEPTH};
pub use memory::MemoryStore;
pub use store::{ObjectStore, StoreRegistry};
pub use uri::{StorageUri, UriKind};
