//! Call types and the internal/external classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which ringtone slot a call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Internal,
    External,
}

impl CallType {
    /// The other slot, used for cross-type fallback
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            CallType::Internal => CallType::External,
            CallType::External => CallType::Internal,
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallType::Internal => write!(f, "internal"),
            CallType::External => write!(f, "external"),
        }
    }
}

/// One incoming-call notification after normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallEvent {
    pub call_id: Option<String>,
    /// Direction as reported by signaling, e.g. `internal` or `inbound`
    pub direction: Option<String>,
    pub caller_number: Option<String>,
    pub is_incoming: bool,
}

/// A notification as the context consumes it, whatever channel it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Incoming(CallEvent),
    Answered { call_id: Option<String> },
    Ended { call_id: Option<String> },
}

const EXTENSION_MIN_DIGITS: usize = 3;
const EXTENSION_MAX_DIGITS: usize = 5;

/// Returns true when the number looks like a short extension
pub fn is_extension_number(number: &str) -> bool {
    let digits = number.chars().filter(char::is_ascii_digit).count();
    (EXTENSION_MIN_DIGITS..=EXTENSION_MAX_DIGITS).contains(&digits)
}

/// Classify a call as internal or external.
///
/// An explicit direction wins over the caller number. With no usable signal
/// the call is external.
pub fn classify(event: &CallEvent) -> CallType {
    if let Some(direction) = event.direction.as_deref().map(str::trim) {
        if !direction.is_empty() {
            return if direction.eq_ignore_ascii_case("internal") {
                CallType::Internal
            } else {
                CallType::External
            };
        }
    }

    match event.caller_number.as_deref() {
        Some(number) if is_extension_number(number) => CallType::Internal,
        _ => CallType::External,
    }
}
