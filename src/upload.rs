//! Validation of user-supplied custom ringtones.
//!
//! Custom audio travels as a `data:` URL (`data:audio/mpeg;base64,...`). It
//! is checked here, before it can reach the preference store.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Default upper bound on the decoded size of a custom ringtone (2 MiB)
pub const DEFAULT_MAX_CUSTOM_BYTES: usize = 2 * 1024 * 1024;

const BASE64_MARKER: &str = ";base64,";

/// Longest media type (parameters included) accepted in an upload
pub const MAX_MEDIA_TYPE_LEN: usize = 255;

/// Base64 length of `max_bytes` of audio
fn max_body_len(max_bytes: usize) -> usize {
    max_bytes.div_ceil(3) * 4
}

/// Longest data URL the validator lets through for a `max_bytes` limit.
/// This is what a stored upload costs, not its decoded size.
pub fn max_data_url_len(max_bytes: usize) -> usize {
    "data:".len() + MAX_MEDIA_TYPE_LEN + BASE64_MARKER.len() + max_body_len(max_bytes)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid format: {0} is not an audio type")]
    InvalidFormat(String),

    #[error("Invalid encoding: {0}")]
    Encoding(String),
}

/// Decoded audio ready for playback
#[derive(Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for AudioPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Split a data URL into its MIME type and base64 body without decoding
fn split_data_url(data_url: &str) -> Result<(&str, &str), UploadError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| UploadError::Encoding("missing data: prefix".to_string()))?;
    let marker = rest
        .find(BASE64_MARKER)
        .ok_or_else(|| UploadError::Encoding("payload is not base64".to_string()))?;

    // Parameters such as ";codecs=..." may sit between type and marker
    let mime = rest[..marker].split(';').next().unwrap_or_default().trim();
    let body = &rest[marker + BASE64_MARKER.len()..];
    Ok((mime, body))
}

/// Decode a stored data URL. No size limit applies here.
pub fn decode_data_url(data_url: &str) -> Result<AudioPayload, UploadError> {
    let (mime, body) = split_data_url(data_url)?;
    let bytes = BASE64
        .decode(body.trim())
        .map_err(|e| UploadError::Encoding(e.to_string()))?;
    Ok(AudioPayload {
        mime: mime.to_ascii_lowercase(),
        bytes,
    })
}

/// Boundary check for uploads
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_bytes: usize,
}

impl UploadValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate an uploaded data URL and return its decoded payload
    pub fn validate(&self, data_url: &str) -> Result<AudioPayload, UploadError> {
        let (mime, body) = split_data_url(data_url)?;

        let media_type_len = data_url.len() - body.len() - "data:".len() - BASE64_MARKER.len();
        if media_type_len > MAX_MEDIA_TYPE_LEN {
            return Err(UploadError::Encoding("media type too long".to_string()));
        }

        if !mime.to_ascii_lowercase().starts_with("audio/") {
            let shown = if mime.is_empty() { "(none)" } else { mime };
            return Err(UploadError::InvalidFormat(shown.to_string()));
        }

        // Reject oversized bodies before decoding them
        if body.len() > max_body_len(self.max_bytes) {
            return Err(UploadError::TooLarge {
                size: body.trim().len() / 4 * 3,
                max: self.max_bytes,
            });
        }

        let payload = decode_data_url(data_url)?;
        if payload.bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: payload.bytes.len(),
                max: self.max_bytes,
            });
        }

        tracing::debug!(
            mime = %payload.mime,
            size = payload.bytes.len(),
            "custom ringtone accepted"
        );
        Ok(payload)
    }
}

impl Default for UploadValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CUSTOM_BYTES)
    }
}

/// Build a data URL from raw bytes
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime}{BASE64_MARKER}{}", BASE64.encode(bytes))
}
