//! Local-storage pieces of wfstore: the filesystem object store, timestamped
//! working directories and the server heartbeat file.

pub mod heartbeat;
pub mod storage;
pub mod workdir;

use std::sync::Arc;

use wfstore_core::{StoreRegistry, UriKind};

pub use heartbeat::{is_fresh, HeartbeatHandle, HeartbeatRecord, ServerHeartbeat};
pub use storage::LocalStore;
pub use workdir::allocate_directory;

/// Registry with the filesystem store in the local slot.
/// Callers add cloud stores on top when they have credentials.
pub fn local_stores() -> StoreRegistry {
    StoreRegistry::new().with_store(UriKind::Local, Arc::new(LocalStore::new()))
}
