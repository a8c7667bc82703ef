//! Self-managed audio output backed by rodio.
//!
//! rodio's output stream cannot leave the thread that opened it, so every
//! clip gets its own playback thread that owns the stream and sink.

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

use super::{Clip, ClipHandle, ClipPlayer, PlaybackError, StartedClip};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct RodioClipPlayer {
    client: reqwest::Client,
    volume: f32,
}

impl RodioClipPlayer {
    pub fn new(fetch_timeout: Duration, volume: f32) -> Result<Self, PlaybackError> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            volume: volume.clamp(0.0, 1.0),
        })
    }

    /// Download a bundled sound
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
        tracing::debug!(%url, "fetching sound");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn load(&self, clip: Clip) -> Result<Vec<u8>, PlaybackError> {
        match clip {
            Clip::Url(url) => self.fetch(&url).await,
            Clip::Bytes { mime, data } => {
                tracing::trace!(%mime, len = data.len(), "loading uploaded clip");
                Ok(data)
            }
        }
    }
}

fn decode(data: Vec<u8>) -> Result<Decoder<Cursor<Vec<u8>>>, PlaybackError> {
    Decoder::new(Cursor::new(data)).map_err(|e| PlaybackError::Decode(e.to_string()))
}

fn play_thread(
    source: Decoder<Cursor<Vec<u8>>>,
    looping: bool,
    volume: f32,
    started_tx: oneshot::Sender<Result<(), PlaybackError>>,
    stop_rx: std_mpsc::Receiver<()>,
    ended_tx: oneshot::Sender<()>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            let _ = started_tx.send(Err(PlaybackError::Rejected(e.to_string())));
            return;
        }
    };
    let sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = started_tx.send(Err(PlaybackError::Rejected(e.to_string())));
            return;
        }
    };

    sink.set_volume(volume);
    if looping {
        sink.append(source.repeat_infinite());
    } else {
        sink.append(source);
    }
    let _ = started_tx.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if sink.empty() {
                    let _ = ended_tx.send(());
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ClipPlayer for RodioClipPlayer {
    async fn start(&self, clip: Clip, looping: bool) -> Result<StartedClip, PlaybackError> {
        let data = self.load(clip).await?;
        let source = decode(data)?;

        let (started_tx, started_rx) = oneshot::channel();
        let (ended_tx, ended_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let volume = self.volume;

        let thread = std::thread::Builder::new()
            .name("ringtone-output".to_string())
            .spawn(move || play_thread(source, looping, volume, started_tx, stop_rx, ended_tx))
            .map_err(|e| PlaybackError::Rejected(e.to_string()))?;

        match started_rx.await {
            Ok(Ok(())) => Ok(StartedClip {
                handle: Box::new(RodioClipHandle { stop_tx, thread }),
                ended: ended_rx,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::Rejected(
                "audio thread exited before starting".to_string(),
            )),
        }
    }
}

struct RodioClipHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

#[async_trait]
impl ClipHandle for RodioClipHandle {
    async fn stop(self: Box<Self>) {
        let RodioClipHandle { stop_tx, thread } = *self;
        let _ = stop_tx.send(());
        if let Err(e) = tokio::task::spawn_blocking(move || thread.join()).await {
            tracing::warn!("audio thread did not shut down cleanly: {e}");
        }
    }
}
