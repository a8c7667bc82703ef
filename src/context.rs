//! The ring context: owns every piece of ringtone state and wires
//! notifications and UI requests through it.

use serde_json::Value;
use std::sync::Arc;

use crate::call::{classify, CallType, Notification};
use crate::catalog;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::ingest::Ingest;
use crate::playback::{
    ClipPlayer, HostSoundEngine, PlaybackController, PlaybackError, PlaybackState, PlaybackStatus,
    StopReason,
};
use crate::preference::{PreferenceStore, RingPreference, Selection};
use crate::resolver::{Resolver, SoundReference};
use crate::storage::KeyValueStore;
use crate::ui::{parse_selection, ConfigView, ErrorCode, UiRequest, UiResponse, CUSTOM_TOKEN};
use crate::upload::UploadValidator;

pub struct RingContext {
    preferences: PreferenceStore,
    dedup: Deduplicator,
    resolver: Resolver,
    validator: UploadValidator,
    ingest: Ingest,
    host: Arc<dyn HostSoundEngine>,
    playback: PlaybackController,
}

impl RingContext {
    /// Build the context and spawn its playback task. Must be called within
    /// a tokio runtime.
    pub fn new(
        config: &Config,
        backend: Box<dyn KeyValueStore>,
        host: Arc<dyn HostSoundEngine>,
        clips: Arc<dyn ClipPlayer>,
    ) -> Self {
        Self {
            preferences: PreferenceStore::new(backend),
            dedup: Deduplicator::new(config.dedup_retention()),
            resolver: Resolver::new(config.base_url()),
            validator: UploadValidator::new(config.max_custom_bytes),
            ingest: Ingest::with_default_sources(),
            playback: PlaybackController::new(host.clone(), clips),
            host,
        }
    }

    /// Replace the source registry
    #[must_use]
    pub fn with_ingest(mut self, ingest: Ingest) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub async fn status(&self) -> Result<PlaybackStatus, PlaybackError> {
        self.playback.status().await
    }

    /// Normalize a raw payload from `channel` and act on it
    pub async fn handle_notification(&self, channel: &str, raw: &Value) {
        if let Some(notification) = self.ingest.normalize(channel, raw) {
            self.handle(notification).await;
        }
    }

    pub async fn handle(&self, notification: Notification) {
        let result = match notification {
            Notification::Incoming(event) => {
                if !event.is_incoming {
                    return;
                }
                if !self.dedup.admit(event.call_id.as_deref()) {
                    tracing::debug!(call_id = ?event.call_id, "duplicate incoming notification");
                    return;
                }

                let classification = classify(&event);
                let sound = self.resolver.resolve(
                    classification,
                    &self.preferences.get(CallType::Internal),
                    &self.preferences.get(CallType::External),
                );
                let label = sound.as_ref().map(SoundReference::label);
                tracing::info!(
                    call_id = ?event.call_id,
                    %classification,
                    sound = label.as_deref().unwrap_or("host default"),
                    "incoming call"
                );
                self.playback.ring(sound).await
            }
            Notification::Answered { call_id } => {
                tracing::debug!(?call_id, "call answered");
                self.playback.stop(StopReason::Answered).await
            }
            Notification::Ended { call_id } => {
                tracing::debug!(?call_id, "call ended");
                self.playback.stop(StopReason::Ended).await
            }
        };

        if let Err(e) = result {
            tracing::error!("playback unavailable: {e}");
        }
    }

    fn config_view(&self) -> ConfigView {
        ConfigView::new(
            &self.preferences.get(CallType::Internal),
            &self.preferences.get(CallType::External),
        )
    }

    pub async fn handle_ui(&self, request: UiRequest) -> UiResponse {
        match request {
            UiRequest::GetConfig => UiResponse::Config(self.config_view()),
            UiRequest::SetRing {
                call_type,
                selection,
                custom_data,
                custom_name,
            } => {
                let (custom_data, custom_name) =
                    self.with_kept_upload(call_type, &selection, custom_data, custom_name);
                let selection = match parse_selection(
                    &selection,
                    custom_data.as_deref(),
                    custom_name,
                    &self.validator,
                ) {
                    Ok(selection) => selection,
                    Err(e) => {
                        tracing::warn!(%call_type, "rejected ringtone selection: {e}");
                        return e.into();
                    }
                };
                match self.preferences.set(call_type, selection) {
                    Ok(()) => UiResponse::Config(self.config_view()),
                    Err(e) => {
                        tracing::error!(%call_type, "failed to store ringtone: {e}");
                        UiResponse::error(ErrorCode::StorageError, e.to_string())
                    }
                }
            }
            UiRequest::Preview {
                call_type,
                selection,
                custom_data,
            } => {
                let sound = match self.preview_sound(call_type, selection, custom_data) {
                    Ok(sound) => sound,
                    Err(response) => return response,
                };
                match self.playback.preview(sound).await {
                    Ok(status) if status.state == PlaybackState::PlayingSelf => UiResponse::Ok,
                    Ok(_) => {
                        UiResponse::error(ErrorCode::InvalidFormat, "Sound could not be played")
                    }
                    Err(e) => UiResponse::error(ErrorCode::InvalidRequest, e.to_string()),
                }
            }
            UiRequest::StopPreview => match self.playback.stop(StopReason::PreviewStopped).await {
                Ok(_) => UiResponse::Ok,
                Err(e) => UiResponse::error(ErrorCode::InvalidRequest, e.to_string()),
            },
        }
    }

    /// A bare `custom` selection falls back to the upload kept for the type
    fn with_kept_upload(
        &self,
        call_type: CallType,
        selection: &str,
        custom_data: Option<String>,
        custom_name: Option<String>,
    ) -> (Option<String>, Option<String>) {
        if selection.trim() != CUSTOM_TOKEN || custom_data.is_some() {
            return (custom_data, custom_name);
        }
        match self.preferences.stored_upload(call_type) {
            Some((data_url, stored_name)) => {
                tracing::debug!(%call_type, "reusing kept upload");
                (Some(data_url), custom_name.or(stored_name))
            }
            None => (None, custom_name),
        }
    }

    /// Work out what a preview request should play
    fn preview_sound(
        &self,
        call_type: Option<CallType>,
        selection: Option<String>,
        custom_data: Option<String>,
    ) -> Result<SoundReference, UiResponse> {
        let stored = |call_type: Option<CallType>| match call_type {
            Some(call_type) => Ok(self.preferences.get(call_type)),
            None => Err(UiResponse::error(
                ErrorCode::InvalidRequest,
                "Preview needs a selection or a type",
            )),
        };

        let preference = match selection.as_deref() {
            // Kept upload for the given type
            Some(CUSTOM_TOKEN) if custom_data.is_none() => {
                let kept = call_type
                    .and_then(|call_type| self.preferences.stored_upload(call_type));
                match kept {
                    Some((data_url, name)) => RingPreference::Custom { data_url, name },
                    None => {
                        return Err(UiResponse::error(
                            ErrorCode::InvalidRequest,
                            "No custom ringtone uploaded for this type",
                        ))
                    }
                }
            }
            Some(selection) => {
                match parse_selection(selection, custom_data.as_deref(), None, &self.validator)? {
                    Selection::Original => RingPreference::Default,
                    Selection::Named(file) => RingPreference::Named { file },
                    Selection::Custom { data_url, name } => {
                        RingPreference::Custom { data_url, name }
                    }
                }
            }
            None => stored(call_type)?,
        };

        if !preference.is_set() {
            return Err(UiResponse::error(
                ErrorCode::InvalidRequest,
                "The host default ringtone cannot be previewed",
            ));
        }
        self.resolver
            .reference(&preference)
            .ok_or_else(|| {
                UiResponse::error(ErrorCode::InvalidFormat, "Stored sound is unreadable")
            })
    }

    /// Hand the stored named sound to the host engine so it rings with the
    /// user's tone even before any signaling arrives. External wins over
    /// internal; uploads stay with our own output.
    pub async fn prime_host(&self) {
        let named = [CallType::External, CallType::Internal]
            .into_iter()
            .find_map(|call_type| match self.preferences.get(call_type) {
                RingPreference::Named { file } => Some(file),
                _ => None,
            });

        let Some(file) = named else {
            return;
        };
        let url = self.resolver.sound_url(&file);
        let label = catalog::label(&file).unwrap_or(file.as_str());
        match self.host.configure(&url).await {
            Ok(()) => tracing::info!(sound = %file, label, "host engine primed"),
            Err(e) => tracing::warn!(sound = %file, "could not prime host engine: {e}"),
        }
    }

    /// Stop playback and cancel pending evictions
    pub async fn shutdown(&self) {
        self.playback.shutdown().await;
        self.dedup.shutdown();
        tracing::debug!("ring context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::test_utils::{Audible, RecordingClips, RecordingHost, TEST_BASE_URL};
    use crate::upload::encode_data_url;
    use serde_json::json;

    struct Harness {
        ctx: RingContext,
        host: Arc<RecordingHost>,
        clips: Arc<RecordingClips>,
        audible: Audible,
    }

    fn harness() -> Harness {
        let config = Config {
            base_url: Some(TEST_BASE_URL.to_string()),
            ..Config::default()
        };
        let audible = Audible::default();
        let host = Arc::new(RecordingHost::new(audible.clone()));
        let clips = Arc::new(RecordingClips::new(audible.clone()));
        let ctx = RingContext::new(
            &config,
            Box::new(MemoryStore::new()),
            host.clone(),
            clips.clone(),
        );
        Harness {
            ctx,
            host,
            clips,
            audible,
        }
    }

    async fn set_ring(ctx: &RingContext, call_type: CallType, selection: &str) -> UiResponse {
        ctx.handle_ui(UiRequest::SetRing {
            call_type,
            selection: selection.to_string(),
            custom_data: None,
            custom_name: None,
        })
        .await
    }

    fn created(call_id: &str, direction: Option<&str>, number: &str) -> Value {
        json!({
            "name": "call_created",
            "data": {
                "is_caller": false,
                "direction": direction,
                "sip_call_id": call_id,
                "peer_caller_id_number": number
            }
        })
    }

    fn plays(host: &RecordingHost) -> usize {
        host.calls().iter().filter(|call| *call == "play").count()
    }

    #[tokio::test]
    async fn test_internal_named_scenario() {
        let h = harness();
        set_ring(&h.ctx, CallType::Internal, "ring3.wav").await;

        h.ctx
            .handle_notification("websocket", &created("c1", Some("internal"), "1002"))
            .await;
        let status = h.ctx.status().await.unwrap();
        assert_eq!(status.state, PlaybackState::PlayingHost);
        assert_eq!(status.active_sound.as_deref(), Some("ring3.wav"));
        assert!(h
            .host
            .calls()
            .contains(&format!("configure {TEST_BASE_URL}/sounds/ring3.wav")));

        h.ctx
            .handle_notification(
                "websocket",
                &json!({"name": "call_ended", "data": {"sip_call_id": "c1"}}),
            )
            .await;
        assert_eq!(h.ctx.status().await.unwrap().state, PlaybackState::Idle);
        assert!(!h.audible.host_playing());
    }

    #[tokio::test]
    async fn test_external_custom_scenario() {
        let h = harness();
        let response = h
            .ctx
            .handle_ui(UiRequest::SetRing {
                call_type: CallType::External,
                selection: "custom".to_string(),
                custom_data: Some(encode_data_url("audio/wav", b"RIFF....WAVE")),
                custom_name: Some("door.wav".to_string()),
            })
            .await;
        assert!(matches!(response, UiResponse::Config(_)));

        h.ctx
            .handle_notification("call", &json!({"callId": "c2", "callerNumber": "5551234567"}))
            .await;
        let status = h.ctx.status().await.unwrap();
        assert_eq!(status.state, PlaybackState::PlayingSelf);
        assert_eq!(status.active_sound.as_deref(), Some("custom:door.wav"));
        assert_eq!(h.clips.starts(), vec![(true, 12)]);
        assert_eq!(h.host.calls(), vec!["stop"]);

        h.ctx
            .handle_notification("call", &json!({"event": "answered", "callId": "c2"}))
            .await;
        assert_eq!(h.ctx.status().await.unwrap().state, PlaybackState::Idle);
        assert_eq!(h.audible.clips_playing(), 0);
    }

    #[tokio::test]
    async fn test_both_channels_ring_once() {
        let h = harness();
        set_ring(&h.ctx, CallType::External, "iphone.mp3").await;

        h.ctx
            .handle_notification("websocket", &created("abc@pbx", None, "5551234567"))
            .await;
        h.ctx
            .handle_notification("call", &json!({"sipCallId": "abc@pbx", "number": "5551234567"}))
            .await;

        assert_eq!(plays(&h.host), 1);
        assert!(h.ctx.dedup().contains("abc@pbx"));
        assert_eq!(h.audible.violations(), 0);
    }

    #[tokio::test]
    async fn test_cross_fallback_and_reset() {
        let h = harness();
        set_ring(&h.ctx, CallType::External, "xylo.mp3").await;

        // Internal call, only external set
        h.ctx
            .handle_notification("call", &json!({"callId": "c3", "callerNumber": "204"}))
            .await;
        let status = h.ctx.status().await.unwrap();
        assert_eq!(status.active_sound.as_deref(), Some("xylo.mp3"));

        let response = set_ring(&h.ctx, CallType::External, "original").await;
        assert_eq!(response, UiResponse::Config(ConfigView::default()));

        h.ctx
            .handle_notification("call", &json!({"callId": "c4", "callerNumber": "204"}))
            .await;
        let status = h.ctx.status().await.unwrap();
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(h.host.calls().last().map(String::as_str), Some("reset"));
    }

    #[tokio::test]
    async fn test_missing_call_id_always_rings() {
        let h = harness();
        set_ring(&h.ctx, CallType::Internal, "ring4.wav").await;

        for _ in 0..2 {
            h.ctx
                .handle_notification("call", &json!({"callerNumber": "1002"}))
                .await;
        }
        assert_eq!(plays(&h.host), 2);
        assert!(h.ctx.dedup().is_empty());
    }

    #[tokio::test]
    async fn test_ended_while_idle_is_noop() {
        let h = harness();
        h.ctx
            .handle_notification("websocket", &json!({"name": "call_ended", "data": {}}))
            .await;
        assert!(h.host.calls().is_empty());
        assert_eq!(h.ctx.status().await.unwrap().state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_ui_rejections() {
        let h = harness();

        let response = set_ring(&h.ctx, CallType::Internal, "nope.wav").await;
        assert!(matches!(
            response,
            UiResponse::Error {
                code: ErrorCode::UnknownSound,
                ..
            }
        ));

        let response = h
            .ctx
            .handle_ui(UiRequest::SetRing {
                call_type: CallType::Internal,
                selection: "custom".to_string(),
                custom_data: Some(encode_data_url("text/plain", b"hi")),
                custom_name: None,
            })
            .await;
        assert!(matches!(
            response,
            UiResponse::Error {
                code: ErrorCode::InvalidFormat,
                ..
            }
        ));
        assert_eq!(
            h.ctx.handle_ui(UiRequest::GetConfig).await,
            UiResponse::Config(ConfigView::default())
        );
    }

    #[tokio::test]
    async fn test_custom_again_reuses_kept_upload() {
        let h = harness();
        let upload = encode_data_url("audio/wav", b"RIFF....WAVE");
        h.ctx
            .handle_ui(UiRequest::SetRing {
                call_type: CallType::External,
                selection: "custom".to_string(),
                custom_data: Some(upload.clone()),
                custom_name: Some("door.wav".to_string()),
            })
            .await;
        set_ring(&h.ctx, CallType::External, "xylo.mp3").await;

        let response = set_ring(&h.ctx, CallType::External, "custom").await;
        assert_eq!(
            response,
            UiResponse::Config(ConfigView {
                ring_external: Some("custom".to_string()),
                custom_name_external: Some("door.wav".to_string()),
                ..ConfigView::default()
            })
        );
        assert_eq!(
            h.ctx.preferences().get(CallType::External),
            RingPreference::Custom {
                data_url: upload,
                name: Some("door.wav".to_string())
            }
        );

        h.ctx
            .handle_notification("websocket", &created("c9", Some("external"), "0612345678"))
            .await;
        assert_eq!(h.ctx.status().await.unwrap().state, PlaybackState::PlayingSelf);

        // Nothing kept for the other type
        let response = set_ring(&h.ctx, CallType::Internal, "custom").await;
        assert!(matches!(
            response,
            UiResponse::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let config = Config {
            base_url: Some(TEST_BASE_URL.to_string()),
            ..Config::default()
        };
        let audible = Audible::default();
        let ctx = RingContext::new(
            &config,
            Box::new(MemoryStore::with_quota(32)),
            Arc::new(RecordingHost::new(audible.clone())),
            Arc::new(RecordingClips::new(audible)),
        );

        let response = ctx
            .handle_ui(UiRequest::SetRing {
                call_type: CallType::External,
                selection: "custom".to_string(),
                custom_data: Some(encode_data_url("audio/wav", &[0u8; 256])),
                custom_name: None,
            })
            .await;
        assert!(matches!(
            response,
            UiResponse::Error {
                code: ErrorCode::StorageError,
                ..
            }
        ));
        assert_eq!(ctx.preferences().get(CallType::External), RingPreference::Default);
    }

    #[tokio::test]
    async fn test_preview_and_stop_preview() {
        let h = harness();

        let response = h
            .ctx
            .handle_ui(UiRequest::Preview {
                call_type: None,
                selection: Some("marimba.wav".to_string()),
                custom_data: None,
            })
            .await;
        assert_eq!(response, UiResponse::Ok);
        assert_eq!(h.clips.starts(), vec![(false, 0)]);
        assert_eq!(h.clips.urls(), vec![format!("{TEST_BASE_URL}/sounds/marimba.wav")]);

        assert_eq!(h.ctx.handle_ui(UiRequest::StopPreview).await, UiResponse::Ok);
        assert_eq!(h.ctx.status().await.unwrap().state, PlaybackState::Idle);

        // Nothing stored for the type
        let response = h
            .ctx
            .handle_ui(UiRequest::Preview {
                call_type: Some(CallType::Internal),
                selection: None,
                custom_data: None,
            })
            .await;
        assert!(matches!(
            response,
            UiResponse::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_preview_stored_custom() {
        let h = harness();
        h.ctx
            .handle_ui(UiRequest::SetRing {
                call_type: CallType::Internal,
                selection: "custom".to_string(),
                custom_data: Some(encode_data_url("audio/mpeg", b"ID3abc")),
                custom_name: None,
            })
            .await;

        let response = h
            .ctx
            .handle_ui(UiRequest::Preview {
                call_type: Some(CallType::Internal),
                selection: Some("custom".to_string()),
                custom_data: None,
            })
            .await;
        assert_eq!(response, UiResponse::Ok);
        assert_eq!(h.clips.starts(), vec![(false, 6)]);
    }

    #[tokio::test]
    async fn test_prime_host_prefers_external_named() {
        let h = harness();
        set_ring(&h.ctx, CallType::Internal, "ring5.wav").await;
        h.ctx.prime_host().await;
        assert_eq!(
            h.host.calls(),
            vec![format!("configure {TEST_BASE_URL}/sounds/ring5.wav")]
        );

        set_ring(&h.ctx, CallType::External, "huawei.mp3").await;
        h.ctx.prime_host().await;
        assert_eq!(
            h.host.calls().last(),
            Some(&format!("configure {TEST_BASE_URL}/sounds/huawei.mp3"))
        );
    }

    #[tokio::test]
    async fn test_shutdown_silences_and_clears() {
        let h = harness();
        set_ring(&h.ctx, CallType::Internal, "ring3.wav").await;
        h.ctx
            .handle_notification("websocket", &created("c9", Some("internal"), "1002"))
            .await;

        h.ctx.shutdown().await;
        assert!(!h.audible.host_playing());
        assert!(h.ctx.dedup().is_empty());
    }
}
