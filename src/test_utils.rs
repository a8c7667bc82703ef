//! Shared test utilities: env serialization and recording playback doubles

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::playback::{Clip, ClipHandle, ClipPlayer, HostSoundEngine, PlaybackError, StartedClip};
use crate::resolver::SoundReference;
use crate::upload::AudioPayload;

// Global mutex to ensure tests that modify environment variables run sequentially
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub const TEST_BASE_URL: &str = "https://plugins.example.com/ring";

pub fn named_sound(file: &str) -> SoundReference {
    SoundReference::Named {
        file: file.to_string(),
        url: format!("{TEST_BASE_URL}/sounds/{file}"),
    }
}

pub fn custom_sound(bytes: &[u8]) -> SoundReference {
    SoundReference::Custom {
        payload: AudioPayload {
            mime: "audio/wav".to_string(),
            bytes: bytes.to_vec(),
        },
        name: None,
    }
}

#[derive(Default)]
struct Outputs {
    host_playing: bool,
    clips_playing: usize,
    violations: usize,
}

/// Tracks what is audible across both doubles and counts overlaps
#[derive(Clone, Default)]
pub struct Audible {
    inner: Arc<Mutex<Outputs>>,
}

impl Audible {
    pub fn host_playing(&self) -> bool {
        self.inner.lock().unwrap().host_playing
    }

    pub fn clips_playing(&self) -> usize {
        self.inner.lock().unwrap().clips_playing
    }

    pub fn violations(&self) -> usize {
        self.inner.lock().unwrap().violations
    }

    fn host_started(&self) {
        let mut outputs = self.inner.lock().unwrap();
        if outputs.clips_playing > 0 {
            outputs.violations += 1;
        }
        outputs.host_playing = true;
    }

    fn host_stopped(&self) {
        self.inner.lock().unwrap().host_playing = false;
    }

    fn clip_started(&self) {
        let mut outputs = self.inner.lock().unwrap();
        if outputs.host_playing || outputs.clips_playing > 0 {
            outputs.violations += 1;
        }
        outputs.clips_playing += 1;
    }

    fn clip_stopped(&self) {
        let mut outputs = self.inner.lock().unwrap();
        outputs.clips_playing = outputs.clips_playing.saturating_sub(1);
    }
}

/// Host engine double that records every command
pub struct RecordingHost {
    audible: Audible,
    calls: Mutex<Vec<String>>,
    fail_play: AtomicBool,
}

impl RecordingHost {
    pub fn new(audible: Audible) -> Self {
        Self {
            audible,
            calls: Mutex::new(Vec::new()),
            fail_play: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl HostSoundEngine for RecordingHost {
    async fn configure(&self, sound_url: &str) -> Result<(), PlaybackError> {
        self.record(format!("configure {sound_url}"));
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(PlaybackError::Rejected("autoplay blocked".to_string()));
        }
        self.record("play");
        self.audible.host_started();
        Ok(())
    }

    async fn stop(&self) {
        self.record("stop");
        self.audible.host_stopped();
    }

    async fn reset_to_default(&self) {
        self.record("reset");
    }
}

struct CurrentClip {
    ended: oneshot::Sender<()>,
    active: Arc<AtomicBool>,
}

/// Clip player double; clips play until stopped or finished by the test
pub struct RecordingClips {
    audible: Audible,
    starts: Mutex<Vec<(bool, usize)>>,
    urls: Mutex<Vec<String>>,
    fail_start: AtomicBool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    current: Mutex<Option<CurrentClip>>,
}

impl RecordingClips {
    pub fn new(audible: Audible) -> Self {
        Self {
            audible,
            starts: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            gate: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// `(looping, byte length)` for every successful start; URLs count as 0 bytes
    pub fn starts(&self) -> Vec<(bool, usize)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make the next start wait until the returned sender fires
    pub fn hold_next_start(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Simulate the current clip reaching its end
    pub fn finish_current(&self) {
        if let Some(current) = self.current.lock().unwrap().take() {
            if current.active.swap(false, Ordering::SeqCst) {
                self.audible.clip_stopped();
            }
            let _ = current.ended.send(());
        }
    }
}

struct RecordingClipHandle {
    audible: Audible,
    active: Arc<AtomicBool>,
}

#[async_trait]
impl ClipHandle for RecordingClipHandle {
    async fn stop(self: Box<Self>) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.audible.clip_stopped();
        }
    }
}

#[async_trait]
impl ClipPlayer for RecordingClips {
    async fn start(&self, clip: Clip, looping: bool) -> Result<StartedClip, PlaybackError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PlaybackError::Decode("unsupported format".to_string()));
        }

        let len = match clip {
            Clip::Url(url) => {
                self.urls.lock().unwrap().push(url);
                0
            }
            Clip::Bytes { data, .. } => data.len(),
        };
        self.starts.lock().unwrap().push((looping, len));
        self.audible.clip_started();

        let (ended_tx, ended_rx) = oneshot::channel();
        let active = Arc::new(AtomicBool::new(true));
        *self.current.lock().unwrap() = Some(CurrentClip {
            ended: ended_tx,
            active: active.clone(),
        });

        Ok(StartedClip {
            handle: Box::new(RecordingClipHandle {
                audible: self.audible.clone(),
                active,
            }),
            ended: ended_rx,
        })
    }
}
