//! Realtime wire frames.
//!
//! The push channel sends JSON envelopes of the form
//! `{"type": "...", "data": {...}}`. Only `event` frames carry document
//! changes; the rest are acknowledgements and diagnostics.

use crate::error::{RealtimeError, RealtimeResult};
use serde::Deserialize;
use serde_json::Value;
use tablekit_types::RealtimeEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum RawRealtimeMessage {
    Event {
        events: Vec<String>,
        channels: Vec<String>,
        payload: Value,
    },
    /// Sent once after the connection is established.
    Connected { channels: Vec<String> },
    Response(Value),
    Error { code: Option<u16>, message: String },
    /// Frame types this client does not handle.
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct EventData {
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    payload: Value,
}

impl RawRealtimeMessage {
    pub fn parse_frame(text: &str) -> RealtimeResult<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| RealtimeError::Frame(e.to_string()))?;

        match envelope.kind.as_str() {
            "event" => {
                let data: EventData = serde_json::from_value(envelope.data)
                    .map_err(|e| RealtimeError::Frame(e.to_string()))?;
                Ok(Self::Event {
                    events: data.events,
                    channels: data.channels,
                    payload: data.payload,
                })
            }
            "connected" => Ok(Self::Connected {
                channels: envelope
                    .data
                    .get("channels")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|c| c.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            "response" => Ok(Self::Response(envelope.data)),
            "error" => Ok(Self::Error {
                code: envelope
                    .data
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok()),
                message: envelope
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            other => Ok(Self::Other(other.to_string())),
        }
    }

    /// Converts an `event` frame into a typed document event. Other frames
    /// yield `None`.
    pub fn into_event(self) -> Option<RealtimeResult<RealtimeEvent>> {
        match self {
            Self::Event {
                events, payload, ..
            } => Some(
                RealtimeEvent::from_raw(&events, payload)
                    .map_err(|e| RealtimeError::Frame(e.to_string())),
            ),
            _ => None,
        }
    }
}
