mod config;

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch as tokio_watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Command, Config, HeartbeatCommand};
use wfstore_cloud::{GcsStore, S3Store};
use wfstore_core::{LocalizationRequest, Localizer, StorageConfig, StoreRegistry, UriKind};
use wfstore_local::{allocate_directory, local_stores, ServerHeartbeat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only command results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let storage = Arc::new(config.storage_config()?);

    match &config.command {
        Command::Localize {
            source,
            recursive,
            md5,
            ..
        } => {
            let backend = config.command.backend().unwrap_or_default();
            let stores = build_stores(&config, &storage).await;
            let localizer = Localizer::new(storage, stores);
            let request = LocalizationRequest::new(source.clone(), backend)
                .recursive(*recursive)
                .make_checksum_file(*md5);
            let result = localizer.localize(&request).await?;
            println!("{}", result.destination);
        }
        Command::Mkdir { prefix } => {
            let dir = allocate_directory(&storage, prefix).await?;
            println!("{}", dir.display());
        }
        Command::Heartbeat { command } => {
            let heartbeat = ServerHeartbeat::from_config(&storage)
                .ok_or_else(|| anyhow!("heartbeat is disabled (--no-heartbeat)"))?;
            run_heartbeat(&heartbeat, command).await?;
        }
    }

    Ok(())
}

/// Local store always; cloud stores only for the roots that are configured.
async fn build_stores(config: &Config, storage: &StorageConfig) -> StoreRegistry {
    let mut stores = local_stores();
    if let Some(root) = storage.gcs_root() {
        info!("  GCS root: {}", root);
        stores = stores.with_store(
            UriKind::Gcs,
            Arc::new(GcsStore::new(config.gcs_access_token.clone())),
        );
    }
    if let Some(root) = storage.s3_root() {
        info!("  S3 root: {}", root);
        let s3 = S3Store::from_env(config.s3_endpoint.as_deref()).await;
        stores = stores.with_store(UriKind::S3, Arc::new(s3));
    }
    stores
}

async fn run_heartbeat(
    heartbeat: &ServerHeartbeat,
    command: &HeartbeatCommand,
) -> anyhow::Result<()> {
    match command {
        HeartbeatCommand::Write { port, host } => {
            let host = resolve_host(host.as_deref())?;
            heartbeat.write(&host, *port).await?;
            println!("{}:{}", host, port);
        }
        HeartbeatCommand::Read => match heartbeat.read().await? {
            Some(record) => println!("{}", record),
            None => {
                return Err(anyhow!(
                    "no live server heartbeat at {}",
                    heartbeat.settings().file.display()
                ))
            }
        },
        HeartbeatCommand::Serve { port, host } => {
            let host = resolve_host(host.as_deref())?;
            let handle = heartbeat.start(host, *port);

            let mut shutdown_rx = create_shutdown_signal();
            let _ = shutdown_rx.wait_for(|&v| v).await;

            handle.stop().await;
            info!("Heartbeat writer shutdown complete");
        }
    }
    Ok(())
}

fn resolve_host(host: Option<&str>) -> anyhow::Result<String> {
    match host {
        Some(host) => Ok(host.to_string()),
        None => Ok(hostname::get()
            .context("Failed to read the machine hostname")?
            .to_string_lossy()
            .into_owned()),
    }
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating shutdown");
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
