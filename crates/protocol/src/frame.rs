//! JSON framing for WebSocket text frames
//!
//! Every frame is `{"event": <name>, "data": <payload>}`; `data` may be
//! omitted and is then read as `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{ClientEvent, EventKind};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

/// Raw inbound frame as received from the push server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ServerFrame {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            event: kind.as_str().to_string(),
            data,
        }
    }

    /// Resolve the frame's event name to a known kind.
    pub fn kind(&self) -> Result<EventKind, FrameError> {
        self.event
            .parse()
            .map_err(|_| FrameError::UnknownEvent(self.event.clone()))
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn encode_client(event: &ClientEvent) -> Result<String, FrameError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode_server(text: &str) -> Result<ServerFrame, FrameError> {
    Ok(serde_json::from_str(text)?)
}
