//! Frames exchanged over the realtime socket.
//!
//! Every frame is a JSON object `{"type": "<tag>", "data": {...}}`. Control
//! frames sent by the client are fire-and-forget; only `get-rooms` expects a
//! `rooms` reply carrying the same request id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::RealtimeEvent;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    JoinRoom {
        room: String,
    },
    LeaveRoom {
        room: String,
    },
    Ping,
    GetRooms {
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    Event(RealtimeEvent),
    Rooms {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        rooms: Vec<String>,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

/// Serialize a frame to its text form.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Parse a frame from its text form.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
