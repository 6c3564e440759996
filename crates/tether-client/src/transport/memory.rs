//! In-process transport driven by a [`MemoryHandle`].
//!
//! Nothing touches the network: the handle decides when opens succeed, what
//! frames arrive, and whether writes fail. Used by the test suite and usable
//! by applications testing their own subscribers.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::{Credential, Frame, TetherError};

use super::{EventSender, Transport, TransportEvent, TransportEventKind};

#[derive(Default)]
struct MemoryState {
    open: bool,
    auto_open: bool,
    epoch: u64,
    events: Option<EventSender>,
    credentials: Vec<String>,
    written: Vec<Frame>,
    closes: usize,
    fail_writes: bool,
    writes_before_failure: Option<usize>,
}

impl MemoryState {
    fn emit(&self, kind: TransportEventKind) {
        if let Some(tx) = &self.events {
            let _ = tx.send(TransportEvent::new(self.epoch, kind));
        }
    }
}

/// Transport half, owned by the connection manager.
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

/// Control half, kept by the test.
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Transport whose opens stay pending until the handle resolves them.
    pub fn new() -> (Self, MemoryHandle) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MemoryHandle { state },
        )
    }

    /// Transport that reports `Opened` as soon as `open` is called.
    pub fn auto_open() -> (Self, MemoryHandle) {
        let (transport, handle) = Self::new();
        transport.state.lock().auto_open = true;
        (transport, handle)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, epoch: u64, credential: &Credential, events: EventSender) {
        let mut state = self.state.lock();
        state.open = false;
        state.epoch = epoch;
        state.events = Some(events);
        state.credentials.push(credential.expose().to_owned());
        if state.auto_open {
            state.open = true;
            state.emit(TransportEventKind::Opened);
        }
    }

    fn send(&mut self, frame: &Frame) -> Result<(), TetherError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TetherError::transport("socket not open"));
        }
        if state.fail_writes {
            return Err(TetherError::transport("write failed"));
        }
        if let Some(remaining) = state.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(TetherError::transport("write failed"));
            }
            *remaining -= 1;
        }
        state.written.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
    }
}

impl MemoryHandle {
    /// Complete the pending open.
    pub fn accept_open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        state.emit(TransportEventKind::Opened);
    }

    /// Fail the pending open with a transport error.
    pub fn fail_open(&self, reason: &str) {
        self.state
            .lock()
            .emit(TransportEventKind::OpenFailed(TetherError::transport(reason)));
    }

    /// Fail the pending open because the credential was rejected.
    pub fn reject_credential(&self) {
        self.state
            .lock()
            .emit(TransportEventKind::OpenFailed(TetherError::AuthExpired));
    }

    /// Deliver an inbound frame.
    pub fn push_frame(&self, frame: &Frame) {
        let text = frame.encode().unwrap_or_default();
        self.push_text(&text);
    }

    /// Deliver raw inbound text.
    pub fn push_text(&self, text: &str) {
        self.state
            .lock()
            .emit(TransportEventKind::Frame(text.to_owned()));
    }

    /// Close the socket from the remote side.
    pub fn close_remote(&self, reason: &str) {
        let mut state = self.state.lock();
        state.open = false;
        state.emit(TransportEventKind::Closed(TetherError::transport(reason)));
    }

    /// Close the socket with an authentication-expired signal.
    pub fn close_auth_expired(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.emit(TransportEventKind::Closed(TetherError::AuthExpired));
    }

    /// Make every write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Accept `count` more writes, then fail the rest.
    pub fn fail_after(&self, count: usize) {
        self.state.lock().writes_before_failure = Some(count);
    }

    /// Clear any `fail_after` limit.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_writes = false;
        state.writes_before_failure = None;
    }

    /// Frames accepted so far.
    pub fn written(&self) -> Vec<Frame> {
        self.state.lock().written.clone()
    }

    /// Types of frames accepted so far, in order.
    pub fn written_types(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|f| f.frame_type.clone())
            .collect()
    }

    /// Written frames excluding heartbeat traffic.
    pub fn written_app_frames(&self) -> Vec<Frame> {
        self.state
            .lock()
            .written
            .iter()
            .filter(|f| !f.is_reserved())
            .cloned()
            .collect()
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> usize {
        self.state.lock().credentials.len()
    }

    /// Credential presented on the most recent `open`.
    pub fn last_credential(&self) -> Option<String> {
        self.state.lock().credentials.last().cloned()
    }

    /// Number of times an open socket was closed locally.
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Whether the socket is currently open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn open_is_pending_until_accepted() {
        let (mut transport, handle) = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(7, &Credential::from("tok"), tx);

        assert!(rx.try_recv().is_err());
        assert!(transport.send(&Frame::ping()).is_err());

        handle.accept_open();
        let event = rx.try_recv().unwrap();
        assert_eq!(event, TransportEvent::new(7, TransportEventKind::Opened));
        assert_eq!(handle.last_credential().as_deref(), Some("tok"));
    }

    #[test]
    fn auto_open_reports_immediately() {
        let (mut transport, handle) = MemoryTransport::auto_open();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(1, &Credential::from("tok"), tx);
        assert_eq!(rx.try_recv().unwrap().kind, TransportEventKind::Opened);
        assert!(handle.is_open());
    }

    #[test]
    fn fail_after_limits_writes() {
        let (mut transport, handle) = MemoryTransport::auto_open();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(1, &Credential::from("tok"), tx);
        handle.fail_after(1);

        assert!(transport.send(&Frame::new("a", json!(1))).is_ok());
        assert!(transport.send(&Frame::new("b", json!(2))).is_err());
        assert_eq!(handle.written_types(), vec!["a"]);

        handle.clear_failures();
        assert!(transport.send(&Frame::new("c", json!(3))).is_ok());
    }

    #[test]
    fn close_counts_only_open_sockets() {
        let (mut transport, handle) = MemoryTransport::auto_open();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.close();
        transport.open(1, &Credential::from("tok"), tx);
        transport.close();
        transport.close();
        assert_eq!(handle.close_count(), 1);
    }
}
