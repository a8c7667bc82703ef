//! Signal utilities and constants.

use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGTERM};

pub const SHUTDOWN_SIGNALS: [i32; 2] = [SIGTERM, SIGINT];

/// Build a signal stream for the signals that stop the bridge.
///
/// # Errors
///
/// Returns an error if signal registration fails
pub fn build_signal_stream() -> anyhow::Result<signal_hook_tokio::Signals> {
    let signals = signal_hook_tokio::Signals::new(SHUTDOWN_SIGNALS)?;
    Ok(signals)
}

/// Resolves on the first shutdown signal, or when the stream is closed
pub async fn wait_for_shutdown(mut signals: signal_hook_tokio::Signals) {
    if let Some(signal) = signals.next().await {
        let name = match signal {
            SIGTERM => "SIGTERM",
            SIGINT => "SIGINT",
            _ => "unknown",
        };
        tracing::info!(signal = name, "received shutdown signal");
    }
}
