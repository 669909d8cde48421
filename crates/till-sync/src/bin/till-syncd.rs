//! # Till Sync Daemon
//!
//! Opens the ledger snapshot and drains its outbox to the configured remote.
//!
//! ## Usage
//! ```bash
//! # Run until Ctrl-C, using ~/.config/till/sync.toml
//! cargo run -p till-sync --bin till-syncd
//!
//! # One pass against a specific config, then exit
//! cargo run -p till-sync --bin till-syncd -- --config ./sync.toml --once
//! ```
//!
//! The daemon expects to be the only process with the data directory open.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use till_db::{FileStorage, Store, StoreConfig};
use till_sync::{HttpSink, OutboxWorker, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,till=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut once = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--once" => once = true,
            "--help" | "-h" => {
                println!("Till Sync Daemon");
                println!();
                println!("Usage: till-syncd [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir/sync.toml)");
                println!("      --once           Run a single drain pass and exit");
                println!("  -h, --help           Show this help message");
                println!();
                println!("Environment overrides: TILL_DEVICE_ID, TILL_SYNC_MODE, TILL_ENDPOINT_URL,");
                println!("TILL_BATCH_SIZE, TILL_POLL_INTERVAL_SECS, TILL_MAX_RETRIES, TILL_DATA_DIR");
                return Ok(());
            }
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }

    let config = SyncConfig::load(config_path)?;
    info!(
        device_id = %config.device_id(),
        mode = %config.mode(),
        data_dir = %config.storage.data_dir.display(),
        "Sync daemon starting"
    );

    if !config.is_sync_enabled() {
        info!("Sync is disabled (mode: offline), nothing to do");
        return Ok(());
    }

    let storage = Arc::new(FileStorage::new(&config.storage.data_dir));
    let store = Store::open(
        StoreConfig::new(config.storage.work_dir()).snapshot_key(&config.storage.snapshot_key),
        storage,
    )
    .await?;

    let sink = Arc::new(HttpSink::from_config(&config)?);
    info!(endpoint = %sink.endpoint(), "Delivering outbox");

    let (worker, handle) = OutboxWorker::new(store.clone(), sink, config.sync.clone());

    if once {
        let report = worker.drain_once().await?;
        println!(
            "delivered {}, failed {}, held back {}, pending {}",
            report.delivered,
            report.failed,
            report.held_back,
            handle.status().await.pending_count
        );
    } else {
        let task = tokio::spawn(worker.run());
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
        handle.shutdown().await?;
        task.await?;
    }

    store.close().await;
    Ok(())
}
