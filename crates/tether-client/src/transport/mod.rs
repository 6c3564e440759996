//! Transport abstraction.
//!
//! The [`ConnectionManager`](crate::ConnectionManager) owns exactly one
//! transport and is the only writer to it. Opening and closing are
//! asynchronous: the transport reports their outcome, along with inbound
//! frames, as [`TransportEvent`]s on the channel handed to [`Transport::open`].
//! Writes are synchronous: `send` returning `Ok` is the acknowledgement that
//! lets a queued message be removed.

pub mod memory;
pub mod ws;

use tether_core::{Credential, Frame, TetherError};
use tokio::sync::mpsc;

pub use memory::{MemoryHandle, MemoryTransport};
pub use ws::WsTransport;

/// Channel on which a transport reports events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
/// Receiving side of [`EventSender`].
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Something that happened on a socket.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportEvent {
    /// The `open` call this event belongs to. Events from older sockets are stale.
    pub epoch: u64,
    /// What happened.
    pub kind: TransportEventKind,
}

impl TransportEvent {
    /// Build an event for `epoch`.
    pub fn new(epoch: u64, kind: TransportEventKind) -> Self {
        Self { epoch, kind }
    }
}

/// Event payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEventKind {
    /// The socket is open and writable.
    Opened,
    /// The open attempt failed.
    OpenFailed(TetherError),
    /// A text frame arrived.
    Frame(String),
    /// An open socket closed. `TetherError::AuthExpired` means the server
    /// rejected the credential.
    Closed(TetherError),
}

/// A bidirectional frame channel.
pub trait Transport: Send {
    /// Begin opening a socket, closing any previous one. The outcome and
    /// every later event for this socket are sent on `events` tagged `epoch`.
    fn open(&mut self, epoch: u64, credential: &Credential, events: EventSender);

    /// Write a frame. `Ok` means the transport accepted it.
    fn send(&mut self, frame: &Frame) -> Result<(), TetherError>;

    /// Close the current socket, if any. Must be idempotent.
    fn close(&mut self);
}
