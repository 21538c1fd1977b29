//! Sentinel Relay - Main Entry Point
//!
//! Reads JSON-lines raw signals from stdin and relays them to the collector.
//! EOF or Ctrl-C triggers a final flush.
//!
//! Usage: `sentinel-relay [config.json]`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use sentinel_relay::constants::{APP_NAME, APP_VERSION};
use sentinel_relay::logic::delivery::Transport;
use sentinel_relay::{
    Config, ConfigHandle, FileStore, HttpTransport, Pipeline, RawSignal, SubmitOutcome,
    SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))
            .with_context(|| format!("loading config from {}", path))?
            .with_env_overrides(),
        None => Config::from_env(),
    };
    log::info!(
        "Collector {} (batch {}, interval {}ms, retries {})",
        config.server_url,
        config.batch_size,
        config.batch_interval,
        config.max_retries
    );

    let store_path = std::env::var("SENTINEL_STORAGE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| FileStore::default_path());
    let store = Arc::new(FileStore::open(store_path.clone()).context("opening local storage")?);
    log::info!("Local storage at {}", store_path.display());

    let transport = Arc::new(HttpTransport::new(&config.user_agent)?);
    match transport.health(&config.endpoint_url("/health")).await {
        Ok(()) => log::info!("Collector is reachable"),
        Err(e) => log::warn!("Collector health check failed: {} - events will be buffered", e),
    }

    let handle = ConfigHandle::new(config);
    handle.on_change(|old, new| {
        if old.server_url != new.server_url {
            log::info!("Collector changed: {} -> {}", old.server_url, new.server_url);
        }
    });

    let pipeline = Pipeline::new(handle, Arc::new(SystemClock), transport, store);
    let recovered = pipeline.recover_backup();
    if recovered > 0 {
        log::info!("Re-sending {} events from a previous run", recovered);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => ingest(&pipeline, &line),
                None => break,
            },
            _ = &mut ctrl_c => {
                log::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if let Some(flush) = pipeline.shutdown() {
        flush.await.context("final flush")?;
    }

    let stats = pipeline.stats();
    log::info!(
        "Done: {} logged, {} uploads ok, {} failed, {} dead-lettered batches pending",
        stats.logged_requests,
        stats.successful_uploads,
        stats.failed_uploads,
        pipeline.dead_letter_count()
    );
    Ok(())
}

fn ingest(pipeline: &Pipeline, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<RawSignal>(line) {
        Ok(signal) => match pipeline.submit(signal) {
            SubmitOutcome::Queued { route, buffered, .. } => {
                log::debug!("Queued {} event ({} buffered)", route, buffered);
            }
            SubmitOutcome::Dropped(reason) => log::debug!("Signal dropped: {}", reason),
        },
        Err(e) => log::warn!("Skipping malformed signal: {}", e),
    }
}
