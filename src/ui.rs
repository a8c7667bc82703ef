//! Messages exchanged with the settings UI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::call::CallType;
use crate::catalog;
use crate::preference::{RingPreference, Selection, RESET_TOKEN};
use crate::upload::{UploadError, UploadValidator};

/// Selection value announcing that `customData` carries an upload
pub const CUSTOM_TOKEN: &str = "custom";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiRequest {
    #[serde(rename_all = "camelCase")]
    SetRing {
        #[serde(rename = "type")]
        call_type: CallType,
        selection: String,
        custom_data: Option<String>,
        custom_name: Option<String>,
    },
    GetConfig,
    /// Play a selection once. Without a selection the stored one for `type`
    /// is previewed.
    #[serde(rename_all = "camelCase")]
    Preview {
        #[serde(rename = "type")]
        call_type: Option<CallType>,
        selection: Option<String>,
        custom_data: Option<String>,
    },
    StopPreview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    StorageError,
    FileTooLarge,
    InvalidFormat,
    UnknownSound,
    InvalidRequest,
}

/// Both preferences as the UI shows them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub ring_internal: Option<String>,
    pub ring_external: Option<String>,
    pub custom_name_internal: Option<String>,
    pub custom_name_external: Option<String>,
}

fn view_of(preference: &RingPreference) -> (Option<String>, Option<String>) {
    match preference {
        RingPreference::Default => (None, None),
        RingPreference::Named { file } => (Some(file.clone()), None),
        RingPreference::Custom { name, .. } => (Some(CUSTOM_TOKEN.to_string()), name.clone()),
    }
}

impl ConfigView {
    pub fn new(internal: &RingPreference, external: &RingPreference) -> Self {
        let (ring_internal, custom_name_internal) = view_of(internal);
        let (ring_external, custom_name_external) = view_of(external);
        Self {
            ring_internal,
            ring_external,
            custom_name_internal,
            custom_name_external,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "value", rename_all = "camelCase")]
pub enum UiResponse {
    Config(ConfigView),
    Ok,
    Error { code: ErrorCode, message: String },
}

impl UiResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        UiResponse::Error {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Unknown sound: {0}")]
    UnknownSound(String),

    #[error("Custom selection without customData")]
    MissingCustomData,

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl SelectionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SelectionError::UnknownSound(_) => ErrorCode::UnknownSound,
            SelectionError::MissingCustomData => ErrorCode::InvalidRequest,
            SelectionError::Upload(UploadError::TooLarge { .. }) => ErrorCode::FileTooLarge,
            SelectionError::Upload(_) => ErrorCode::InvalidFormat,
        }
    }
}

impl From<SelectionError> for UiResponse {
    fn from(e: SelectionError) -> Self {
        UiResponse::error(e.code(), e.to_string())
    }
}

/// Check a UI selection at the boundary.
///
/// `original` resets, `custom` (or a bare `data:` URL) must carry a valid
/// upload, anything else must name a bundled sound.
pub fn parse_selection(
    selection: &str,
    custom_data: Option<&str>,
    custom_name: Option<String>,
    validator: &UploadValidator,
) -> Result<Selection, SelectionError> {
    let selection = selection.trim();
    let data_url = match selection {
        RESET_TOKEN => return Ok(Selection::Original),
        CUSTOM_TOKEN => custom_data.ok_or(SelectionError::MissingCustomData)?,
        s if s.starts_with("data:") => s,
        s if catalog::contains(s) => return Ok(Selection::Named(s.to_string())),
        s => return Err(SelectionError::UnknownSound(s.to_string())),
    };

    validator.validate(data_url)?;
    Ok(Selection::Custom {
        data_url: data_url.to_string(),
        name: custom_name.filter(|name| !name.trim().is_empty()),
    })
}
