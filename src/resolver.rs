//! Turns a classified call and the stored preferences into a sound to play.

use crate::call::CallType;
use crate::preference::RingPreference;
use crate::upload::{decode_data_url, AudioPayload};

/// A concrete sound, ready for the playback controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundReference {
    /// Bundled sound, played by the host engine from its URL
    Named { file: String, url: String },
    /// Uploaded sound, played by our own output
    Custom {
        payload: AudioPayload,
        name: Option<String>,
    },
}

impl SoundReference {
    /// Short description for logs and status reports
    pub fn label(&self) -> String {
        match self {
            SoundReference::Named { file, .. } => file.clone(),
            SoundReference::Custom { name, .. } => {
                format!("custom:{}", name.as_deref().unwrap_or("upload"))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    base_url: String,
}

impl Resolver {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// URL of a bundled sound
    pub fn sound_url(&self, file: &str) -> String {
        format!("{}/sounds/{}", self.base_url, file)
    }

    /// Resolve a single preference. Stored custom data that no longer decodes
    /// yields `None`.
    pub fn reference(&self, preference: &RingPreference) -> Option<SoundReference> {
        match preference {
            RingPreference::Default => None,
            RingPreference::Named { file } => Some(SoundReference::Named {
                file: file.clone(),
                url: self.sound_url(file),
            }),
            RingPreference::Custom { data_url, name } => match decode_data_url(data_url) {
                Ok(payload) => Some(SoundReference::Custom {
                    payload,
                    name: name.clone(),
                }),
                Err(e) => {
                    tracing::warn!("stored custom ringtone is unreadable: {e}");
                    None
                }
            },
        }
    }

    /// Pick the sound for a call of the given type.
    ///
    /// The matching preference wins, then the opposite one; with neither set
    /// the host default applies and `None` is returned.
    pub fn resolve(
        &self,
        classification: CallType,
        internal: &RingPreference,
        external: &RingPreference,
    ) -> Option<SoundReference> {
        let (matching, opposite) = match classification {
            CallType::Internal => (internal, external),
            CallType::External => (external, internal),
        };
        self.reference(matching).or_else(|| self.reference(opposite))
    }
}
