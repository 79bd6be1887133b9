use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use wfstore_core::{BackendKind, HeartbeatSettings, StorageConfig, StorageError};

/// Configuration for the wfstore command-line tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "wfstore")]
#[command(about = "Localize workflow inputs across local, GCS and S3 storage")]
pub struct Config {
    /// Local cache root (absolute, not the system temp directory itself)
    #[arg(long, env = "WFSTORE_LOCAL_ROOT")]
    pub local_root: PathBuf,

    /// gs:// cache root used by the gcp backend
    #[arg(long, env = "WFSTORE_GCS_ROOT")]
    pub gcs_root: Option<String>,

    /// s3:// cache root used by the aws backend
    #[arg(long, env = "WFSTORE_S3_ROOT")]
    pub s3_root: Option<String>,

    /// Endpoint override for S3-compatible services
    #[arg(long, env = "WFSTORE_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// OAuth2 access token for the GCS JSON API
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub gcs_access_token: Option<String>,

    /// Heartbeat file [default: ~/.wfstore/default_server_heartbeat]
    #[arg(long, env = "WFSTORE_HEARTBEAT_FILE")]
    pub heartbeat_file: Option<PathBuf>,

    /// Heartbeat staleness timeout in milliseconds
    #[arg(long, default_value = "120000", env = "WFSTORE_HEARTBEAT_TIMEOUT_MS")]
    pub heartbeat_timeout_ms: u64,

    /// Heartbeat writer interval in seconds
    #[arg(long, default_value = "60", env = "WFSTORE_HEARTBEAT_INTERVAL_SECS")]
    pub heartbeat_interval_secs: u64,

    /// Disable the heartbeat file entirely
    #[arg(long)]
    pub no_heartbeat: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Copy a file onto the storage root of an execution backend
    Localize {
        /// Local path, gs:// or s3:// URI
        source: String,

        /// Execution backend (gcp, aws; anything else is local)
        #[arg(long, default_value = "local")]
        backend: String,

        /// Also localize files referenced from JSON/CSV/TSV documents
        #[arg(long)]
        recursive: bool,

        /// Write a .md5 sidecar next to local destinations
        #[arg(long)]
        md5: bool,
    },

    /// Create a timestamped working directory under the local root
    Mkdir {
        /// Subdirectory of the local root to create it in
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Server heartbeat file operations
    Heartbeat {
        #[command(subcommand)]
        command: HeartbeatCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum HeartbeatCommand {
    /// Write the heartbeat once
    Write {
        #[arg(long)]
        port: u16,

        /// Defaults to the machine hostname
        #[arg(long)]
        host: Option<String>,
    },

    /// Print host:port of a live server
    Read,

    /// Keep the heartbeat fresh until interrupted
    Serve {
        #[arg(long)]
        port: u16,

        /// Defaults to the machine hostname
        #[arg(long)]
        host: Option<String>,
    },
}

impl Config {
    /// Validated storage configuration built from the flags.
    pub fn storage_config(&self) -> Result<StorageConfig, StorageError> {
        let mut builder = StorageConfig::builder(&self.local_root);
        if let Some(root) = &self.gcs_root {
            builder = builder.gcs_root(root.clone());
        }
        if let Some(root) = &self.s3_root {
            builder = builder.s3_root(root.clone());
        }
        builder = match self.heartbeat_settings() {
            Some(settings) => builder.heartbeat(settings),
            None => builder.without_heartbeat(),
        };
        builder.build()
    }

    fn heartbeat_settings(&self) -> Option<HeartbeatSettings> {
        if self.no_heartbeat {
            return None;
        }
        let file = self
            .heartbeat_file
            .clone()
            .unwrap_or_else(HeartbeatSettings::default_file);
        Some(
            HeartbeatSettings::new(file)
                .with_timeout(Duration::from_millis(self.heartbeat_timeout_ms))
                .with_interval(Duration::from_secs(self.heartbeat_interval_secs)),
        )
    }
}

impl Command {
    /// Backend named by `localize --backend`.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Command::Localize { backend, .. } => Some(BackendKind::from_identifier(backend)),
            _ => None,
        }
    }
}
