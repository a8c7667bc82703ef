//! calltone library entrypoint and public exports.
//!
//! This crate exposes a library-first API with a thin binary wrapper.
//! It coordinates configuration bootstrap, the preference store, playback
//! backends, and the stdin/stdout bridge to the host.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;

pub mod bridge;
pub mod call;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod context;
pub mod dedup;
pub mod ingest;
pub mod playback;
pub mod preference;
pub mod resolver;
pub mod signals;
pub mod storage;
#[cfg(test)]
pub mod test_utils;
pub mod ui;
pub mod upload;

/// Install the stderr log subscriber. stdout carries the bridge protocol.
pub fn init_logging(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the application given CLI-level `RunOptions`.
/// Returns a process exit code.
pub async fn run(options: cli::RunOptions) -> Result<i32> {
    let config = crate::config::bootstrap(options.envfile.as_deref())?;
    init_logging(&config.rust_log);

    let store_path = options
        .store_path
        .clone()
        .unwrap_or_else(|| config.store_path.clone());
    let backend =
        storage::FileStore::open_or_recover(&store_path, Some(config.storage_quota_bytes))?;
    tracing::info!(
        store = %store_path.display(),
        base_url = config.base_url(),
        "starting calltone"
    );

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = bridge::spawn_writer(tokio::io::stdout(), outbound_rx);

    let host = Arc::new(playback::host::BridgeHostEngine::new(outbound_tx.clone()));
    let clips = Arc::new(playback::clip::RodioClipPlayer::new(
        config.fetch_timeout(),
        config.volume,
    )?);
    let ctx = context::RingContext::new(&config, Box::new(backend), host, clips);
    ctx.prime_host().await;

    let signals = signals::build_signal_stream()?;
    let signals_handle = signals.handle();
    let shutdown = signals::wait_for_shutdown(signals);

    let stdin = BufReader::new(tokio::io::stdin());
    let result = bridge::run(&ctx, stdin, outbound_tx, shutdown).await;
    signals_handle.close();

    // Dropping the context releases the last outbound sender
    drop(ctx);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("bridge output failed: {e}"),
        Err(e) => tracing::warn!("bridge writer task failed: {e}"),
    }

    result?;
    tracing::info!("calltone stopped");
    Ok(0)
}
