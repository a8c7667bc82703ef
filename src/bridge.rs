//! Line-delimited JSON bridge between the host process and the ring context.
//!
//! Inbound, one envelope per line: `{"channel": "...", "payload": ...}`.
//! Outbound, one JSON object per line: host engine commands and UI responses.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::RingContext;
use crate::playback::host::HostCommand;
use crate::ui::{ErrorCode, UiRequest, UiResponse};

pub const UI_CHANNEL: &str = "ui";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub channel: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Host(HostCommand),
    Ui(UiResponse),
}

/// Write every outbound message as one JSON line. Finishes once all senders
/// are dropped.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = serde_json::to_string(&message)?;
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok(())
    })
}

/// Route one inbound line
pub async fn handle_line(
    ctx: &RingContext,
    line: &str,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("skipping malformed bridge line: {e}");
            return;
        }
    };

    if envelope.channel != UI_CHANNEL {
        ctx.handle_notification(&envelope.channel, &envelope.payload).await;
        return;
    }

    let response = match serde_json::from_value::<UiRequest>(envelope.payload) {
        Ok(request) => {
            tracing::debug!(?request, "ui request");
            ctx.handle_ui(request).await
        }
        Err(e) => UiResponse::error(ErrorCode::InvalidRequest, e.to_string()),
    };
    if outbound.send(Outbound::Ui(response)).is_err() {
        tracing::warn!("bridge output closed, dropping ui response");
    }
}

/// Serve the bridge until input ends or `shutdown` resolves, then shut the
/// context down.
pub async fn run<R, S>(
    ctx: &RingContext,
    reader: R,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: S,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("shutdown requested");
                break Ok(());
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(ctx, &line, &outbound).await,
                Ok(None) => {
                    tracing::info!("bridge input closed");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            }
        }
    };

    ctx.shutdown().await;
    result
}
