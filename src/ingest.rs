//! Notification sources: turn channel-specific payloads into [`Notification`]s.
//!
//! Each source owns the field names of its channel. The ring context only
//! sees normalized notifications.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::call::{CallEvent, Notification};

pub const SIGNALING_CHANNEL: &str = "websocket";
pub const CALLBACK_CHANNEL: &str = "call";

/// One ingestion channel
pub trait NotificationSource: Send + Sync {
    /// Name the bridge uses to route payloads to this source
    fn channel(&self) -> &'static str;

    /// Returns `None` for payloads that carry nothing we act on
    fn normalize(&self, raw: &Value) -> Option<Notification>;
}

/// Accept an object, or a string holding a JSON object
fn as_object(raw: &Value) -> Option<Map<String, Value>> {
    match raw {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                tracing::debug!("ignoring non-object message");
                None
            }
            Err(e) => {
                tracing::warn!("ignoring malformed message: {e}");
                None
            }
        },
        _ => {
            tracing::debug!("ignoring non-object message");
            None
        }
    }
}

/// First non-empty value under any of `keys`. Numbers are accepted as text.
fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_bool(map: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| map.get(*key)?.as_bool())
}

const FEED_EVENT_KEYS: &[&str] = &["name", "eventName", "event", "type"];
const FEED_WRAPPER_KEYS: &[&str] = &["data", "payload", "message"];
const FEED_CALL_KEYS: &[&str] = &["data", "payload", "call"];
const FEED_ID_KEYS: &[&str] = &["sip_call_id", "sipCallId", "call_id", "callId", "id"];
const FEED_NUMBER_KEYS: &[&str] = &[
    "peer_caller_id_number",
    "caller_id_number",
    "callerNumber",
    "caller_number",
    "number",
];
const FEED_DIRECTION_KEYS: &[&str] = &["direction"];
const FEED_CALLER_KEYS: &[&str] = &["is_caller", "isCaller"];

/// The telephony signaling feed (websocket messages)
#[derive(Debug, Default)]
pub struct SignalingFeed;

impl SignalingFeed {
    /// Find the object that names the event, looking one wrapper deep
    fn event_message(message: Map<String, Value>) -> Option<(String, Map<String, Value>)> {
        if let Some(name) = first_text(&message, FEED_EVENT_KEYS) {
            return Some((name, message));
        }
        FEED_WRAPPER_KEYS.iter().find_map(|key| {
            let inner = as_object(message.get(*key)?)?;
            let name = first_text(&inner, FEED_EVENT_KEYS)?;
            Some((name, inner))
        })
    }

    fn call_fields(message: &Map<String, Value>) -> Map<String, Value> {
        FEED_CALL_KEYS
            .iter()
            .find_map(|key| match message.get(*key) {
                Some(Value::Object(call)) => Some(call.clone()),
                _ => None,
            })
            .unwrap_or_else(|| message.clone())
    }
}

impl NotificationSource for SignalingFeed {
    fn channel(&self) -> &'static str {
        SIGNALING_CHANNEL
    }

    fn normalize(&self, raw: &Value) -> Option<Notification> {
        let (name, message) = Self::event_message(as_object(raw)?)?;
        let call = Self::call_fields(&message);
        let lookup = |keys| first_text(&call, keys).or_else(|| first_text(&message, keys));
        let call_id = lookup(FEED_ID_KEYS);

        match name.as_str() {
            "call_created" => {
                let is_caller = first_bool(&call, FEED_CALLER_KEYS)
                    .or_else(|| first_bool(&message, FEED_CALLER_KEYS));
                if is_caller != Some(false) {
                    tracing::trace!(?call_id, "ignoring call we did not receive");
                    return None;
                }
                Some(Notification::Incoming(CallEvent {
                    call_id,
                    direction: lookup(FEED_DIRECTION_KEYS),
                    caller_number: lookup(FEED_NUMBER_KEYS),
                    is_incoming: true,
                }))
            }
            "call_answered" => Some(Notification::Answered { call_id }),
            "call_ended" | "call_hungup" | "call_deleted" => Some(Notification::Ended { call_id }),
            other => {
                tracing::trace!(event = other, "ignoring feed event");
                None
            }
        }
    }
}

const CALLBACK_EVENT_KEYS: &[&str] = &["event", "type"];
const CALLBACK_ID_KEYS: &[&str] = &["sipCallId", "callId", "sip_call_id", "call_id"];
const CALLBACK_NUMBER_KEYS: &[&str] = &["callerNumber", "number", "caller_number"];

/// The host's direct call-state callback
#[derive(Debug, Default)]
pub struct CallCallback;

impl NotificationSource for CallCallback {
    fn channel(&self) -> &'static str {
        CALLBACK_CHANNEL
    }

    fn normalize(&self, raw: &Value) -> Option<Notification> {
        let message = as_object(raw)?;
        let call_id = first_text(&message, CALLBACK_ID_KEYS);
        let event = first_text(&message, CALLBACK_EVENT_KEYS)
            .unwrap_or_else(|| "incoming".to_string());

        match event.as_str() {
            "incoming" => Some(Notification::Incoming(CallEvent {
                call_id,
                direction: None,
                caller_number: first_text(&message, CALLBACK_NUMBER_KEYS),
                is_incoming: true,
            })),
            "answered" => Some(Notification::Answered { call_id }),
            "ended" => Some(Notification::Ended { call_id }),
            other => {
                tracing::debug!(event = other, "ignoring callback event");
                None
            }
        }
    }
}

/// Registry of sources keyed by channel name
pub struct Ingest {
    sources: HashMap<&'static str, Box<dyn NotificationSource>>,
}

impl Ingest {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Registry with the signaling feed and the call callback
    pub fn with_default_sources() -> Self {
        let mut ingest = Self::new();
        ingest.register(Box::new(SignalingFeed));
        ingest.register(Box::new(CallCallback));
        ingest
    }

    /// Add a source, replacing any previous one on the same channel
    pub fn register(&mut self, source: Box<dyn NotificationSource>) {
        self.sources.insert(source.channel(), source);
    }

    pub fn channels(&self) -> Vec<&'static str> {
        let mut channels: Vec<_> = self.sources.keys().copied().collect();
        channels.sort_unstable();
        channels
    }

    pub fn normalize(&self, channel: &str, raw: &Value) -> Option<Notification> {
        let Some(source) = self.sources.get(channel) else {
            tracing::warn!(channel, "no source registered for channel");
            return None;
        };
        source.normalize(raw)
    }
}

impl Default for Ingest {
    fn default() -> Self {
        Self::with_default_sources()
    }
}
