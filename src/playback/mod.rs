//! Playback controller: owns the single audible ringtone.
//!
//! All requests go through one task and are processed in order, so a stop
//! that arrives while a start is still pending is applied once that start
//! has settled.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::resolver::SoundReference;

pub mod clip;
pub mod host;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Playback rejected: {0}")]
    Rejected(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Failed to fetch sound: {0}")]
    Fetch(String),

    #[error("Host sound engine unavailable")]
    HostUnavailable,

    #[error("Playback controller stopped")]
    ControllerClosed,
}

/// The host's built-in ringtone engine. We only issue commands to it.
#[async_trait]
pub trait HostSoundEngine: Send + Sync {
    async fn configure(&self, sound_url: &str) -> Result<(), PlaybackError>;
    async fn play(&self) -> Result<(), PlaybackError>;
    async fn stop(&self);
    async fn reset_to_default(&self);
}

/// Audio for the self-managed output
#[derive(Debug, Clone)]
pub enum Clip {
    Url(String),
    Bytes { mime: String, data: Vec<u8> },
}

impl From<SoundReference> for Clip {
    fn from(sound: SoundReference) -> Self {
        match sound {
            SoundReference::Named { url, .. } => Clip::Url(url),
            SoundReference::Custom { payload, .. } => Clip::Bytes {
                mime: payload.mime,
                data: payload.bytes,
            },
        }
    }
}

/// A clip that is currently audible
#[async_trait]
pub trait ClipHandle: Send {
    /// Stop and release the output. Returns once it is silent.
    async fn stop(self: Box<Self>);
}

pub struct StartedClip {
    pub handle: Box<dyn ClipHandle>,
    /// Fires when a non-looping clip reaches its end
    pub ended: oneshot::Receiver<()>,
}

/// Our own audio output, used for custom ringtones and previews
#[async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Resolves once playback has actually started, or fails
    async fn start(&self, clip: Clip, looping: bool) -> Result<StartedClip, PlaybackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    PlayingHost,
    PlayingSelf,
}

/// Who owns the audible output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    HostManaged,
    SelfManaged,
    None,
}

impl PlaybackState {
    pub fn channel(self) -> Channel {
        match self {
            PlaybackState::Idle => Channel::None,
            PlaybackState::PlayingHost => Channel::HostManaged,
            PlaybackState::PlayingSelf => Channel::SelfManaged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub active_sound: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Answered,
    Ended,
    PreviewStopped,
}

#[derive(Debug)]
enum PlaybackRequest {
    /// Ring for an incoming call; `None` hands ringing back to the host default
    Ring {
        sound: Option<SoundReference>,
        response: oneshot::Sender<PlaybackStatus>,
    },
    /// Play a selection once through our own output
    Preview {
        sound: SoundReference,
        response: oneshot::Sender<PlaybackStatus>,
    },
    Stop {
        reason: StopReason,
        response: oneshot::Sender<PlaybackStatus>,
    },
    Status {
        response: oneshot::Sender<PlaybackStatus>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

struct Session {
    host: Arc<dyn HostSoundEngine>,
    clips: Arc<dyn ClipPlayer>,
    state: PlaybackState,
    active_sound: Option<String>,
    clip: Option<Box<dyn ClipHandle>>,
    ended: Option<oneshot::Receiver<()>>,
}

impl Session {
    fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.state,
            active_sound: self.active_sound.clone(),
        }
    }

    /// Silence whatever is playing. Returns true if the host engine was stopped.
    async fn teardown(&mut self) -> bool {
        let previous = self.state;
        self.state = PlaybackState::Idle;
        self.active_sound = None;
        self.ended = None;

        match previous {
            PlaybackState::Idle => false,
            PlaybackState::PlayingHost => {
                self.host.stop().await;
                true
            }
            PlaybackState::PlayingSelf => {
                if let Some(clip) = self.clip.take() {
                    clip.stop().await;
                }
                false
            }
        }
    }

    async fn ring(&mut self, sound: Option<SoundReference>) {
        let host_stopped = self.teardown().await;

        let Some(sound) = sound else {
            tracing::debug!("no ringtone override, host default applies");
            self.host.reset_to_default().await;
            return;
        };

        if !host_stopped {
            self.host.stop().await;
        }

        let label = sound.label();
        match sound {
            SoundReference::Named { url, .. } => {
                let started = match self.host.configure(&url).await {
                    Ok(()) => self.host.play().await,
                    Err(e) => Err(e),
                };
                match started {
                    Ok(()) => {
                        tracing::info!(sound = %label, "ringing through host engine");
                        self.state = PlaybackState::PlayingHost;
                        self.active_sound = Some(label);
                    }
                    Err(e) => tracing::warn!(sound = %label, "host playback failed: {e}"),
                }
            }
            custom @ SoundReference::Custom { .. } => {
                self.start_clip(custom.into(), label, true).await;
            }
        }
    }

    async fn preview(&mut self, sound: SoundReference) {
        let host_stopped = self.teardown().await;
        if !host_stopped {
            self.host.stop().await;
        }
        let label = sound.label();
        self.start_clip(sound.into(), label, false).await;
    }

    async fn start_clip(&mut self, clip: Clip, label: String, looping: bool) {
        match self.clips.start(clip, looping).await {
            Ok(started) => {
                tracing::info!(sound = %label, looping, "playing through own output");
                self.state = PlaybackState::PlayingSelf;
                self.active_sound = Some(label);
                self.clip = Some(started.handle);
                self.ended = Some(started.ended);
            }
            Err(e) => tracing::warn!(sound = %label, "playback failed: {e}"),
        }
    }

    async fn stop(&mut self, reason: StopReason) {
        if self.state == PlaybackState::Idle {
            return;
        }
        tracing::info!(?reason, "stopping ringtone");
        self.teardown().await;
    }

    async fn clip_ended(&mut self) {
        tracing::debug!("clip reached its end");
        self.ended = None;
        if let Some(clip) = self.clip.take() {
            clip.stop().await;
        }
        self.state = PlaybackState::Idle;
        self.active_sound = None;
    }
}

async fn wait_ended(ended: &mut Option<oneshot::Receiver<()>>) {
    match ended {
        // A dropped sender means the output went away, which also ends the clip
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to the playback task
#[derive(Clone)]
pub struct PlaybackController {
    request_tx: mpsc::UnboundedSender<PlaybackRequest>,
}

impl PlaybackController {
    /// Spawn the playback task. Must be called within a tokio runtime.
    pub fn new(host: Arc<dyn HostSoundEngine>, clips: Arc<dyn ClipPlayer>) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<PlaybackRequest>();

        tokio::spawn(async move {
            let mut session = Session {
                host,
                clips,
                state: PlaybackState::Idle,
                active_sound: None,
                clip: None,
                ended: None,
            };

            loop {
                tokio::select! {
                    biased;

                    () = wait_ended(&mut session.ended) => {
                        session.clip_ended().await;
                    }
                    request = request_rx.recv() => {
                        let Some(request) = request else {
                            session.teardown().await;
                            break;
                        };
                        match request {
                            PlaybackRequest::Ring { sound, response } => {
                                session.ring(sound).await;
                                let _ = response.send(session.status());
                            }
                            PlaybackRequest::Preview { sound, response } => {
                                session.preview(sound).await;
                                let _ = response.send(session.status());
                            }
                            PlaybackRequest::Stop { reason, response } => {
                                session.stop(reason).await;
                                let _ = response.send(session.status());
                            }
                            PlaybackRequest::Status { response } => {
                                let _ = response.send(session.status());
                            }
                            PlaybackRequest::Shutdown { response } => {
                                session.teardown().await;
                                let _ = response.send(());
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("playback controller stopped");
        });

        Self { request_tx }
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<PlaybackStatus>) -> PlaybackRequest,
    ) -> Result<PlaybackStatus, PlaybackError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(build(response_tx))
            .map_err(|_| PlaybackError::ControllerClosed)?;
        response_rx.await.map_err(|_| PlaybackError::ControllerClosed)
    }

    /// Ring for an incoming call, replacing anything currently playing.
    /// Start failures are logged and leave the controller idle.
    pub async fn ring(
        &self,
        sound: Option<SoundReference>,
    ) -> Result<PlaybackStatus, PlaybackError> {
        self.request(|response| PlaybackRequest::Ring { sound, response }).await
    }

    /// Play a sound once through our own output
    pub async fn preview(&self, sound: SoundReference) -> Result<PlaybackStatus, PlaybackError> {
        self.request(|response| PlaybackRequest::Preview { sound, response }).await
    }

    /// Stop playback. A no-op when idle.
    pub async fn stop(&self, reason: StopReason) -> Result<PlaybackStatus, PlaybackError> {
        self.request(|response| PlaybackRequest::Stop { reason, response }).await
    }

    pub async fn status(&self) -> Result<PlaybackStatus, PlaybackError> {
        self.request(|response| PlaybackRequest::Status { response }).await
    }

    /// Silence output and end the playback task
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .request_tx
            .send(PlaybackRequest::Shutdown {
                response: response_tx,
            })
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }
}
