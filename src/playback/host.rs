//! Host sound engine driven over the bridge's outbound channel.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use super::{HostSoundEngine, PlaybackError};
use crate::bridge::Outbound;

/// Commands understood by the host's sound engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "value", rename_all = "camelCase")]
pub enum HostCommand {
    ConfigureSounds { ring: String },
    PlayIncomingCallSound,
    StopCurrentSound,
    ResetSounds,
}

/// Forwards engine calls to the host process as bridge messages
#[derive(Clone)]
pub struct BridgeHostEngine {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl BridgeHostEngine {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    fn send(&self, command: HostCommand) -> Result<(), PlaybackError> {
        tracing::trace!(?command, "host command");
        self.outbound
            .send(Outbound::Host(command))
            .map_err(|_| PlaybackError::HostUnavailable)
    }
}

#[async_trait]
impl HostSoundEngine for BridgeHostEngine {
    async fn configure(&self, sound_url: &str) -> Result<(), PlaybackError> {
        self.send(HostCommand::ConfigureSounds {
            ring: sound_url.to_string(),
        })
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        self.send(HostCommand::PlayIncomingCallSound)
    }

    async fn stop(&self) {
        if let Err(e) = self.send(HostCommand::StopCurrentSound) {
            tracing::debug!("could not stop host sound: {e}");
        }
    }

    async fn reset_to_default(&self) {
        if let Err(e) = self.send(HostCommand::ResetSounds) {
            tracing::debug!("could not reset host sounds: {e}");
        }
    }
}
