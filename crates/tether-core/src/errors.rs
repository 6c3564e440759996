//! Error taxonomy for the connection layer.
//!
//! None of these errors are thrown at application code. Transport and
//! heartbeat failures are absorbed by the state machine; queue overflow and
//! subscriber failures are routed to an error sink. The variants exist so the
//! sink, the logs, and the tests can tell the failure classes apart.

use thiserror::Error;

use crate::ids::{MessageId, SubscriptionId};

/// Errors produced by the connection layer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TetherError {
    /// Low-level I/O failure on the transport. Triggers the reconnect path.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected the credential. Triggers the token-expired path.
    #[error("authentication expired")]
    AuthExpired,

    /// The outbound queue was full; the oldest message was dropped.
    #[error("outbound queue full (capacity {capacity}), dropped message {dropped}")]
    QueueOverflow {
        /// The evicted message.
        dropped: MessageId,
        /// Configured capacity.
        capacity: usize,
    },

    /// A subscriber callback failed or panicked.
    #[error("subscriber {subscription_id} failed handling '{event_type}': {message}")]
    Subscriber {
        /// Event being dispatched.
        event_type: String,
        /// The failing subscription.
        subscription_id: SubscriptionId,
        /// Error or panic message.
        message: String,
    },

    /// The reconnect budget ran out.
    #[error("gave up after {attempts} reconnect attempts")]
    MaxAttemptsExceeded {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// An inbound frame could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TetherError {
    /// Build a transport error from anything displayable.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether the layer recovers from this error on its own.
    ///
    /// Only [`TetherError::MaxAttemptsExceeded`] needs an explicit `connect()`.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MaxAttemptsExceeded { .. })
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::QueueOverflow { .. } => "QUEUE_OVERFLOW",
            Self::Subscriber { .. } => "SUBSCRIBER",
            Self::MaxAttemptsExceeded { .. } => "MAX_ATTEMPTS_EXCEEDED",
            Self::Protocol(_) => "PROTOCOL",
        }
    }
}

/// Result type for connection-layer operations.
pub type Result<T> = std::result::Result<T, TetherError>;
