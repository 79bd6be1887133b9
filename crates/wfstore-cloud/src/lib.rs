//! Cloud object stores for wfstore.
//!
//! - `S3Store`: AWS S3 (and S3-compatible endpoints) through `aws-sdk-s3`
//! - `GcsStore`: Google Cloud Storage through its JSON API over `reqwest`
//!
//! Both implement `wfstore_core::ObjectStore` and are registered in the
//! `StoreRegistry` slot of their URI kind.

pub mod gcs;
pub mod s3;

pub use gcs::{GcsStore, ObjectMetadata};
pub use s3::S3Store;
