//! Per-call-type ringtone preferences on top of a key-value backend.

use crate::call::CallType;
use crate::storage::{KeyValueStore, StoreError};

/// Selection value that reverts a call type to the host's own ringtone
pub const RESET_TOKEN: &str = "original";

const DATA_URL_PREFIX: &str = "data:";

/// Sound-key value meaning "play the upload kept for this type"
const CUSTOM_MARKER: &str = "custom";

/// What rings for one call type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingPreference {
    Default,
    /// A bundled sound, stored as its file name
    Named { file: String },
    /// A user upload, stored as a `data:` URL
    Custom {
        data_url: String,
        name: Option<String>,
    },
}

impl RingPreference {
    pub fn is_set(&self) -> bool {
        !matches!(self, RingPreference::Default)
    }
}

/// A validated user choice, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Original,
    Named(String),
    Custom {
        data_url: String,
        name: Option<String>,
    },
}

fn sound_key(call_type: CallType) -> &'static str {
    match call_type {
        CallType::Internal => "ringInternal",
        CallType::External => "ringExternal",
    }
}

fn name_key(call_type: CallType) -> &'static str {
    match call_type {
        CallType::Internal => "customNameInternal",
        CallType::External => "customNameExternal",
    }
}

fn file_key(call_type: CallType) -> &'static str {
    match call_type {
        CallType::Internal => "customFileInternal",
        CallType::External => "customFileExternal",
    }
}

/// Bytes a custom preference needs in the backend besides the data URL and
/// the upload name
pub const CUSTOM_ENTRY_OVERHEAD: usize = "ringExternal".len()
    + CUSTOM_MARKER.len()
    + "customFileExternal".len()
    + "customNameExternal".len();

/// Sole owner of the stored preferences
pub struct PreferenceStore {
    backend: Box<dyn KeyValueStore>,
}

impl PreferenceStore {
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Persist a selection. On error the previous preference is kept.
    ///
    /// The last upload for each type is kept under its own key, so switching
    /// to a named sound and back does not need a new upload.
    pub fn set(&self, call_type: CallType, selection: Selection) -> Result<(), StoreError> {
        let changes = match selection {
            Selection::Original => return self.delete(call_type),
            Selection::Named(file) => vec![(sound_key(call_type).to_string(), Some(file))],
            Selection::Custom { data_url, name } => vec![
                (sound_key(call_type).to_string(), Some(CUSTOM_MARKER.to_string())),
                (file_key(call_type).to_string(), Some(data_url)),
                (name_key(call_type).to_string(), name),
            ],
        };
        self.backend.write_batch(changes)?;
        tracing::info!(%call_type, "ringtone preference updated");
        Ok(())
    }

    pub fn get(&self, call_type: CallType) -> RingPreference {
        let Some(value) = self.backend.get(sound_key(call_type)) else {
            return RingPreference::Default;
        };

        if value == CUSTOM_MARKER {
            match self.stored_upload(call_type) {
                Some((data_url, name)) => RingPreference::Custom { data_url, name },
                None => RingPreference::Default,
            }
        } else if value.starts_with(DATA_URL_PREFIX) {
            RingPreference::Custom {
                data_url: value,
                name: self.backend.get(name_key(call_type)),
            }
        } else {
            // Older entries hold the full sound URL
            let file = value.rsplit('/').next().unwrap_or_default().to_string();
            if file.is_empty() {
                RingPreference::Default
            } else {
                RingPreference::Named { file }
            }
        }
    }

    /// The last upload kept for a type, with its name, whatever is selected
    pub fn stored_upload(&self, call_type: CallType) -> Option<(String, Option<String>)> {
        let data_url = self.backend.get(file_key(call_type)).or_else(|| {
            // Older entries kept the upload in the sound key
            self.backend
                .get(sound_key(call_type))
                .filter(|value| value.starts_with(DATA_URL_PREFIX))
        })?;
        Some((data_url, self.backend.get(name_key(call_type))))
    }

    /// Revert to the host default. A kept upload stays available.
    pub fn delete(&self, call_type: CallType) -> Result<(), StoreError> {
        self.backend.write_batch(vec![(sound_key(call_type).to_string(), None)])?;
        tracing::info!(%call_type, "ringtone preference reset to original");
        Ok(())
    }
}
