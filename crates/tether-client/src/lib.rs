//! # tether-client
//!
//! Self-healing real-time connection for the Tether layer.
//!
//! - [`ConnectionManager`]: sans-IO state machine owning the transport,
//!   the outbound [`MessageQueue`], the [`HeartbeatMonitor`], and the
//!   [`SubscriptionRegistry`]
//! - [`TetherClient`]: cloneable handle to the tokio task driving a manager
//! - [`Transport`]: socket abstraction, with [`WsTransport`] for production
//!   and [`MemoryTransport`] for tests
//! - [`EnvironmentSignals`]: network, visibility, and credential signals
//!   turned into commands
//! - [`ErrorSink`]: where non-fatal errors go

#![deny(unsafe_code)]

pub mod client;
pub mod command;
pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod signals;
pub mod sink;
pub mod subscriptions;
pub mod transport;

pub use client::TetherClient;
pub use command::Command;
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor, HeartbeatState};
pub use manager::ConnectionManager;
pub use queue::{MessageQueue, QueuedMessage};
pub use signals::{EnvironmentSignal, EnvironmentSignals};
pub use sink::{CollectingErrorSink, ErrorSink, TracingErrorSink};
pub use subscriptions::{Callback, CallbackResult, SubscriptionRegistry};
pub use transport::{
    EventReceiver, EventSender, MemoryHandle, MemoryTransport, Transport, TransportEvent,
    TransportEventKind, WsTransport,
};
