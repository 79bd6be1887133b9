//! Server liveness record.
//!
//! A running server writes its `host`/`port` to a well-known file; clients
//! read it back to find the server. The file's modification time is the
//! freshness signal, so writer and reader must share a filesystem clock.
//!
//! File content is a single JSON object:
//! ```text
//! {"host":"node-1","port":8000}
//! ```

use std::fmt;
use std::io::ErrorKind;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use wfstore_core::{HeartbeatSettings, StorageConfig, StorageError};

use crate::storage::write_atomic;

/// Lower bound for the writer cadence; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Host and port of a running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HeartbeatRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Whether a record modified at `modified` is still valid at `now`.
/// Modification times in the future count as fresh.
pub fn is_fresh(modified: SystemTime, now: SystemTime, timeout: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age <= timeout,
        Err(_) => true,
    }
}

/// Reads and writes the heartbeat file.
#[derive(Debug, Clone)]
pub struct ServerHeartbeat {
    settings: HeartbeatSettings,
}

impl ServerHeartbeat {
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self { settings }
    }

    /// `None` when the heartbeat feature is disabled in `config`.
    pub fn from_config(config: &StorageConfig) -> Option<Self> {
        config.heartbeat().cloned().map(Self::new)
    }

    pub fn settings(&self) -> &HeartbeatSettings {
        &self.settings
    }

    /// Overwrite the heartbeat file with `host:port`.
    #[instrument(skip(self), level = "debug")]
    pub async fn write(&self, host: &str, port: u16) -> Result<(), StorageError> {
        let record = HeartbeatRecord {
            host: host.to_string(),
            port,
        };
        let data = serde_json::to_vec(&record)?;
        write_atomic(&self.settings.file, &data).await?;
        debug!(
            "Wrote heartbeat {} to {}",
            record,
            self.settings.file.display()
        );
        Ok(())
    }

    /// Read the current record.
    ///
    /// Returns `Ok(None)` when the file is missing, unparsable or older than
    /// the timeout. Only other I/O failures are errors.
    pub async fn read(&self) -> Result<Option<HeartbeatRecord>, StorageError> {
        self.read_at(SystemTime::now()).await
    }

    /// [`read`](Self::read) with an explicit current time.
    pub async fn read_at(&self, now: SystemTime) -> Result<Option<HeartbeatRecord>, StorageError> {
        let file = &self.settings.file;

        let metadata = match fs::metadata(file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No heartbeat file at {}", file.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to stat heartbeat file {}: {}",
                    file.display(),
                    e
                )))
            }
        };

        let modified = metadata.modified().map_err(|e| {
            StorageError::Io(format!(
                "Failed to get modification time of {}: {}",
                file.display(),
                e
            ))
        })?;
        if !is_fresh(modified, now, self.settings.timeout) {
            debug!(
                "Heartbeat file {} is older than {:?}, ignoring",
                file.display(),
                self.settings.timeout
            );
            return Ok(None);
        }

        let data = match fs::read(file).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read heartbeat file {}: {}",
                    file.display(),
                    e
                )))
            }
        };

        match serde_json::from_slice::<HeartbeatRecord>(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!(
                    "Unparsable heartbeat file {}: {}, ignoring",
                    file.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Spawn a task that writes the record now and then every
    /// `settings.interval` until the returned handle is stopped or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, host: impl Into<String>, port: u16) -> HeartbeatHandle {
        let heartbeat = self.clone();
        let host = host.into();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        info!(
            "Starting heartbeat writer for {}:{} every {:?} ({})",
            host,
            port,
            self.settings.interval,
            self.settings.file.display()
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat.settings.interval.max(MIN_INTERVAL));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat.write(&host, port).await {
                            warn!("Failed to write heartbeat: {}", e);
                        }
                    }
                    _ = async { let _ = stop_rx.wait_for(|&stopped| stopped).await; } => break,
                }
            }
            debug!("Heartbeat writer stopped");
        });

        HeartbeatHandle {
            stop_tx,
            task: Some(task),
        }
    }
}

/// Handle to a background heartbeat writer.
pub struct HeartbeatHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Stop the writer and wait for it to finish. The heartbeat file is left
    /// in place and goes stale on its own.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
