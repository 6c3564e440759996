//! Commands accepted by the connection manager.

use std::fmt;

use tether_core::{Credential, Frame, SubscriptionId};

use crate::subscriptions::Callback;

/// One request to the connection manager.
///
/// Application code and [`EnvironmentSignals`](crate::EnvironmentSignals)
/// produce these; the driver task applies them in arrival order.
pub enum Command {
    /// Start (or keep) a connection using `credential`.
    Connect(Credential),
    /// Close the connection and suppress auto-reconnect.
    Disconnect,
    /// Write a frame now, or queue it until connected.
    Send(Frame),
    /// Register a callback under a caller-generated ID.
    Subscribe {
        /// Subscription ID returned to the caller.
        id: SubscriptionId,
        /// Event type to listen for.
        event_type: String,
        /// Invoked with each matching frame's `data`.
        callback: Callback,
    },
    /// Remove a subscription. Unknown IDs are ignored.
    Unsubscribe(SubscriptionId),
    /// The credential is no longer valid.
    TokenExpired,
    /// A fresh credential is available.
    TokenRefreshed(Credential),
    /// The host regained network access.
    NetworkOnline,
    /// The host lost network access.
    NetworkOffline,
    /// Run an immediate heartbeat check.
    CheckLiveness,
    /// Release everything. Terminal.
    Teardown,
}

impl Command {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
            Self::Send(_) => "send",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::TokenExpired => "token_expired",
            Self::TokenRefreshed(_) => "token_refreshed",
            Self::NetworkOnline => "network_online",
            Self::NetworkOffline => "network_offline",
            Self::CheckLiveness => "check_liveness",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(c) | Self::TokenRefreshed(c) => {
                f.debug_tuple(self.name()).field(c).finish()
            }
            Self::Send(frame) => f.debug_tuple(self.name()).field(frame).finish(),
            Self::Subscribe { id, event_type, .. } => f
                .debug_struct(self.name())
                .field("id", id)
                .field("event_type", event_type)
                .finish_non_exhaustive(),
            Self::Unsubscribe(id) => f.debug_tuple(self.name()).field(id).finish(),
            _ => f.write_str(self.name()),
        }
    }
}
