//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a connection ended up in [`ConnectionState::Disconnected`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `disconnect()` was called; auto-reconnect is suppressed.
    UserInitiated,
    /// The retry budget ran out. Requires an explicit `connect()` to resume.
    MaxAttemptsExceeded,
    /// A credential expired and no replacement arrived in time.
    AuthFailure,
    /// The host reported it went offline.
    NetworkOffline,
}

impl DisconnectReason {
    /// Wire name, as carried in `connection:failed` events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserInitiated => "user_initiated",
            Self::MaxAttemptsExceeded => "max_attempts_exceeded",
            Self::AuthFailure => "auth_failure",
            Self::NetworkOffline => "network_offline",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a connection.
///
/// Exactly one phase is active at a time. [`ConnectionState::Closed`] is
/// terminal: once entered, no further transitions happen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, never connected.
    #[default]
    Idle,
    /// First open attempt in flight.
    Connecting,
    /// Transport open and healthy.
    Connected,
    /// Waiting out a backoff delay, or retrying after one.
    Reconnecting {
        /// 1-based retry attempt.
        attempt: u32,
    },
    /// Not connected and not retrying.
    Disconnected {
        /// Why the connection stopped.
        reason: DisconnectReason,
    },
    /// Torn down. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether the transport is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the state is the terminal [`ConnectionState::Closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the manager is actively trying to establish a connection.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected { reason } => write!(f, "disconnected ({reason})"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Closed.is_closed());
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_connecting());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(!ConnectionState::Idle.is_connecting());
    }

    #[test]
    fn serializes_with_state_tag() {
        let value = serde_json::to_value(ConnectionState::Reconnecting { attempt: 3 }).unwrap();
        assert_eq!(value, json!({"state": "reconnecting", "attempt": 3}));

        let value = serde_json::to_value(ConnectionState::Disconnected {
            reason: DisconnectReason::AuthFailure,
        })
        .unwrap();
        assert_eq!(value, json!({"state": "disconnected", "reason": "auth_failure"}));

        let value = serde_json::to_value(ConnectionState::Idle).unwrap();
        assert_eq!(value, json!({"state": "idle"}));
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 4 }.to_string(),
            "reconnecting (attempt 4)"
        );
        assert_eq!(
            ConnectionState::Disconnected {
                reason: DisconnectReason::MaxAttemptsExceeded
            }
            .to_string(),
            "disconnected (max_attempts_exceeded)"
        );
    }

    #[test]
    fn reason_wire_names_match_serde() {
        for reason in [
            DisconnectReason::UserInitiated,
            DisconnectReason::MaxAttemptsExceeded,
            DisconnectReason::AuthFailure,
            DisconnectReason::NetworkOffline,
        ] {
            let value = serde_json::to_value(reason).unwrap();
            assert_eq!(value, json!(reason.as_str()));
        }
    }
}
