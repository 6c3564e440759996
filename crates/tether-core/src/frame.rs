//! Wire frames.
//!
//! Every message on the wire is a JSON text frame `{ "type": ..., "data": ... }`.
//! Frame types starting with `__` are reserved for the connection layer; all
//! other types are opaque application events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved and locally-emitted event names.
pub mod events {
    /// Heartbeat request.
    pub const PING: &str = "__ping";
    /// Heartbeat acknowledgement.
    pub const PONG: &str = "__pong";
    /// Server notice that the presented credential is no longer valid.
    pub const AUTH_EXPIRED: &str = "__auth_expired";

    /// Emitted when the connection comes back after a loss.
    pub const CONNECTION_RESTORED: &str = "connection:restored";
    /// Emitted once when an established connection drops.
    pub const CONNECTION_LOST: &str = "connection:lost";
    /// Emitted on entering `Disconnected`, with `{ "reason": ... }`.
    pub const CONNECTION_FAILED: &str = "connection:failed";
}

/// One message unit exchanged over the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame.
    pub fn new(frame_type: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            data,
        }
    }

    /// A heartbeat ping.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(events::PING, Value::Null)
    }

    /// A heartbeat pong.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(events::PONG, Value::Null)
    }

    /// Whether this frame type belongs to the connection layer.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.frame_type.starts_with("__")
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
