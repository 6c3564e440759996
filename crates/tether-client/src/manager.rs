//! Connection lifecycle state machine.
//!
//! [`ConnectionManager`] owns the transport, the outbound queue, the
//! heartbeat monitor, and the subscription registry. It never sleeps or
//! awaits: every operation takes the current time, and the pending timers
//! (backoff, connect timeout, credential wait, heartbeat) are exposed as
//! deadlines through [`ConnectionManager::next_deadline`]. The driver in
//! [`crate::client`] awaits those deadlines and calls
//! [`ConnectionManager::fire_due_timers`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tether_core::{
    BackoffScheduler, ConnectionState, Credential, DisconnectReason, Frame, Jitter,
    SubscriptionId, TetherError, events,
};
use tether_settings::{ClientSettings, SettingsError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::queue::MessageQueue;
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::subscriptions::{Callback, SubscriptionRegistry};
use crate::transport::{EventSender, Transport, TransportEvent, TransportEventKind};

/// Drives one logical connection.
pub struct ConnectionManager {
    settings: ClientSettings,
    state: ConnectionState,
    transport: Box<dyn Transport>,
    events: EventSender,
    epoch: u64,
    credential: Option<Credential>,
    queue: MessageQueue,
    heartbeat: HeartbeatMonitor,
    registry: SubscriptionRegistry,
    backoff: BackoffScheduler,
    sink: Arc<dyn ErrorSink>,
    /// When the pending backoff elapses.
    reconnect_at: Option<Instant>,
    /// Set while an open attempt is in flight.
    connect_deadline: Option<Instant>,
    /// Set while waiting for `token_refreshed`.
    credential_deadline: Option<Instant>,
    failed_attempts: u32,
    reconnecting_since_reset: bool,
    lost_emitted: bool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("queued", &self.queue.len())
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Manager in [`ConnectionState::Idle`]. Transport events must be fed
    /// back through [`ConnectionManager::handle_transport_event`].
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidValue`] when `settings` fail
    /// [`ClientSettings::validate`].
    pub fn new(
        settings: ClientSettings,
        transport: Box<dyn Transport>,
        events: EventSender,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let sink: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink);
        Ok(Self {
            queue: MessageQueue::new(settings.queue_max_capacity),
            heartbeat: HeartbeatMonitor::new(
                Duration::from_millis(settings.heartbeat_interval_ms),
                settings.heartbeat_missed_threshold,
                settings.heartbeat_mode,
            ),
            registry: SubscriptionRegistry::new(Arc::clone(&sink)),
            backoff: BackoffScheduler::new(settings.backoff()),
            settings,
            state: ConnectionState::Idle,
            transport,
            events,
            epoch: 0,
            credential: None,
            sink,
            reconnect_at: None,
            connect_deadline: None,
            credential_deadline: None,
            failed_attempts: 0,
            reconnecting_since_reset: false,
            lost_emitted: false,
        })
    }

    /// Replace the backoff jitter source.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Box<dyn Jitter>) -> Self {
        self.backoff = BackoffScheduler::with_jitter(self.settings.backoff(), jitter);
        self
    }

    /// Replace the error sink for queue overflow, subscriber, protocol, and
    /// retry-exhaustion errors.
    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.registry.set_sink(Arc::clone(&sink));
        self.sink = sink;
        self
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Messages waiting for a connection.
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Failed attempts since the last successful connection.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Whether the manager is holding off until `token_refreshed`.
    pub fn awaiting_credential(&self) -> bool {
        self.credential_deadline.is_some()
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Apply one command.
    pub fn apply(&mut self, command: Command, now: Instant) {
        match command {
            Command::Connect(credential) => self.connect(credential, now),
            Command::Disconnect => self.disconnect(),
            Command::Send(frame) => self.send(frame, now),
            Command::Subscribe {
                id,
                event_type,
                callback,
            } => self.subscribe_with_id(id, event_type, callback),
            Command::Unsubscribe(id) => {
                let _ = self.unsubscribe(&id);
            }
            Command::TokenExpired => self.token_expired(now),
            Command::TokenRefreshed(credential) => self.token_refreshed(credential, now),
            Command::NetworkOnline => self.network_online(now),
            Command::NetworkOffline => self.network_offline(),
            Command::CheckLiveness => self.check_liveness(now),
            Command::Teardown => self.teardown(),
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Connect with `credential`.
    ///
    /// Idempotent while connecting or connected; while reconnecting the
    /// credential is replaced and the retry schedule continues.
    pub fn connect(&mut self, credential: Credential, now: Instant) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = %self.state, "connect ignored, already active; credential updated");
                self.credential = Some(credential);
            }
            ConnectionState::Reconnecting { .. } => {
                self.credential = Some(credential);
                if self.credential_deadline.take().is_some() {
                    self.begin_attempt(now);
                }
            }
            ConnectionState::Idle | ConnectionState::Disconnected { .. } => {
                self.credential = Some(credential);
                self.failed_attempts = 0;
                self.reconnecting_since_reset = false;
                self.lost_emitted = false;
                self.set_state(ConnectionState::Connecting);
                self.begin_attempt(now);
            }
        }
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&mut self) {
        if self.is_active() {
            self.enter_disconnected(DisconnectReason::UserInitiated);
        }
    }

    /// Write `frame` now if connected, otherwise queue it.
    pub fn send(&mut self, frame: Frame, now: Instant) {
        match self.state {
            ConnectionState::Closed => {
                debug!(frame_type = %frame.frame_type, "send after teardown dropped");
            }
            ConnectionState::Connected => {
                if let Err(e) = self.transport.send(&frame) {
                    debug!(frame_type = %frame.frame_type, error = %e, "write failed, queueing");
                    self.enqueue(frame);
                    self.on_connection_lost(e, now);
                }
            }
            _ => self.enqueue(frame),
        }
    }

    /// Register `callback` for `event_type`.
    pub fn subscribe(&mut self, event_type: impl Into<String>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribe_with_id(id.clone(), event_type, callback);
        id
    }

    /// Register `callback` under a caller-chosen ID.
    pub fn subscribe_with_id(
        &mut self,
        id: SubscriptionId,
        event_type: impl Into<String>,
        callback: Callback,
    ) {
        if !self.state.is_closed() {
            self.registry.subscribe_with_id(id, event_type, callback);
        }
    }

    /// Remove a subscription. Returns whether one was removed.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// The current credential is no longer valid.
    ///
    /// Closes the transport and holds in `Reconnecting(1)` until
    /// [`ConnectionManager::token_refreshed`] or the credential timeout.
    pub fn token_expired(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Idle | ConnectionState::Disconnected { .. } => {
                self.credential = None;
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting { .. } => {
                let was_connected = self.state.is_connected();
                info!(state = %self.state, "credential expired, waiting for refresh");
                self.heartbeat.stop();
                self.close_transport();
                self.reconnect_at = None;
                self.connect_deadline = None;
                self.credential = None;
                if was_connected {
                    self.emit_lost("credential expired");
                }
                self.set_state(ConnectionState::Reconnecting { attempt: 1 });
                self.reconnecting_since_reset = true;
                if self.credential_deadline.is_none() {
                    self.credential_deadline = Some(now + self.credential_timeout());
                }
            }
        }
    }

    /// A fresh credential is available. Opens immediately if the manager
    /// was waiting for one; otherwise it is stored for the next attempt.
    pub fn token_refreshed(&mut self, credential: Credential, now: Instant) {
        if self.state.is_closed() {
            return;
        }
        self.credential = Some(credential);
        if self.credential_deadline.take().is_some() {
            debug!("credential refreshed, reconnecting now");
            self.begin_attempt(now);
        }
    }

    /// The host regained network access.
    pub fn network_online(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Disconnected {
                reason: DisconnectReason::NetworkOffline,
            } => {
                if self.credential.is_none() {
                    warn!("network back online but no credential to reconnect with");
                    return;
                }
                info!("network back online, reconnecting");
                self.failed_attempts = 0;
                self.set_state(ConnectionState::Reconnecting { attempt: 1 });
                self.reconnecting_since_reset = true;
                self.begin_attempt(now);
            }
            ConnectionState::Reconnecting { attempt } if self.reconnect_at.is_some() => {
                info!(attempt, "network back online, skipping backoff");
                self.reconnect_at = None;
                self.begin_attempt(now);
            }
            _ => {}
        }
    }

    /// The host lost network access.
    pub fn network_offline(&mut self) {
        if self.is_active() {
            info!(state = %self.state, "network offline");
            self.enter_disconnected(DisconnectReason::NetworkOffline);
        }
    }

    /// Immediate heartbeat check, for when the host returns to the
    /// foreground and timers may have been suspended.
    pub fn check_liveness(&mut self, now: Instant) {
        if !self.state.is_connected() {
            return;
        }
        match self.heartbeat.force_check(now) {
            Some(HeartbeatAction::SendPing) => self.send_ping(now),
            Some(HeartbeatAction::Dead) => {
                warn!("connection silent too long after resume");
                self.on_connection_lost(TetherError::transport("heartbeat timeout"), now);
            }
            None => {}
        }
    }

    /// Cancel every timer, close the transport, drop all subscriptions and
    /// queued messages, and enter the terminal [`ConnectionState::Closed`].
    pub fn teardown(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.cancel_timers();
        self.heartbeat.stop();
        self.close_transport();
        self.registry.clear();
        let discarded = self.queue.clear();
        self.credential = None;
        self.set_state(ConnectionState::Closed);
        info!(discarded, "connection torn down");
    }

    // ── Inputs from the driver ──────────────────────────────────────────

    /// React to something the transport reported.
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if self.state.is_closed() {
            return;
        }
        if event.epoch != self.epoch {
            debug!(event_epoch = event.epoch, epoch = self.epoch, "ignoring stale transport event");
            return;
        }
        let in_flight = self.connect_deadline.is_some();
        match event.kind {
            TransportEventKind::Opened if in_flight => self.enter_connected(now),
            TransportEventKind::OpenFailed(err) if in_flight => self.on_attempt_failed(err, now),
            TransportEventKind::Closed(err) if in_flight => self.on_attempt_failed(err, now),
            TransportEventKind::Frame(text) if self.state.is_connected() => {
                self.handle_frame(&text, now);
            }
            TransportEventKind::Closed(TetherError::AuthExpired) if self.state.is_connected() => {
                self.token_expired(now);
            }
            TransportEventKind::Closed(err) if self.state.is_connected() => {
                self.on_connection_lost(err, now);
            }
            other => debug!(state = %self.state, event = ?other, "unexpected transport event"),
        }
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.reconnect_at,
            self.connect_deadline,
            self.credential_deadline,
            self.heartbeat.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run every timer that is due at `now`.
    pub fn fire_due_timers(&mut self, now: Instant) {
        if self.state.is_closed() {
            return;
        }
        if self.connect_deadline.is_some_and(|at| at <= now) {
            warn!(state = %self.state, "connect attempt timed out");
            self.on_attempt_failed(TetherError::transport("connect timed out"), now);
        }
        if self.credential_deadline.is_some_and(|at| at <= now) {
            warn!("no refreshed credential arrived in time");
            self.credential_deadline = None;
            self.enter_disconnected(DisconnectReason::AuthFailure);
        }
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.begin_attempt(now);
        }
        if self.state.is_connected() {
            match self.heartbeat.poll(now) {
                Some(HeartbeatAction::SendPing) => self.send_ping(now),
                Some(HeartbeatAction::Dead) => {
                    warn!(
                        missed = self.settings.heartbeat_missed_threshold,
                        "heartbeat missed, connection presumed dead"
                    );
                    self.on_connection_lost(TetherError::transport("heartbeat timeout"), now);
                }
                None => {}
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }

    fn is_active(&self) -> bool {
        self.state.is_connected() || self.state.is_connecting()
    }

    fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.credential_timeout_ms)
    }

    /// Open the transport with the stored credential, or wait for one.
    fn begin_attempt(&mut self, now: Instant) {
        let Some(credential) = self.credential.clone() else {
            debug!("no credential for attempt, waiting for refresh");
            self.credential_deadline = Some(now + self.credential_timeout());
            return;
        };
        self.epoch += 1;
        self.connect_deadline = Some(now + Duration::from_millis(self.settings.connect_timeout_ms));
        debug!(epoch = self.epoch, state = %self.state, "opening transport");
        self.transport.open(self.epoch, &credential, self.events.clone());
    }

    fn enter_connected(&mut self, now: Instant) {
        self.connect_deadline = None;
        self.reconnect_at = None;
        self.credential_deadline = None;
        self.failed_attempts = 0;
        self.backoff.reset();
        self.set_state(ConnectionState::Connected);
        self.heartbeat.start(now);
        info!(epoch = self.epoch, "connected");

        match self.queue.drain_into(self.transport.as_mut()) {
            Ok(0) => {}
            Ok(drained) => debug!(drained, "flushed queued messages"),
            Err(e) => {
                warn!(remaining = self.queue.len(), error = %e, "queue flush failed");
                self.on_connection_lost(e, now);
                return;
            }
        }

        if self.reconnecting_since_reset {
            self.reconnecting_since_reset = false;
            self.lost_emitted = false;
            let _ = self.registry.dispatch(events::CONNECTION_RESTORED, &Value::Null);
        }
    }

    /// An established connection dropped.
    fn on_connection_lost(&mut self, err: TetherError, now: Instant) {
        info!(error = %err, "connection lost");
        self.heartbeat.stop();
        self.close_transport();
        self.emit_lost(&err.to_string());
        self.enter_reconnecting(1, now);
    }

    /// An open attempt failed or timed out.
    fn on_attempt_failed(&mut self, err: TetherError, now: Instant) {
        self.connect_deadline = None;
        self.close_transport();
        if err == TetherError::AuthExpired {
            self.token_expired(now);
            return;
        }
        self.failed_attempts += 1;
        debug!(failed_attempts = self.failed_attempts, error = %err, "connect attempt failed");
        match self.state {
            ConnectionState::Reconnecting { attempt }
                if attempt >= self.settings.max_reconnect_attempts =>
            {
                warn!(attempt, "reconnect attempts exhausted");
                self.enter_disconnected(DisconnectReason::MaxAttemptsExceeded);
                self.sink
                    .report(&TetherError::MaxAttemptsExceeded { attempts: attempt });
            }
            ConnectionState::Reconnecting { attempt } => self.enter_reconnecting(attempt + 1, now),
            _ => self.enter_reconnecting(1, now),
        }
    }

    fn enter_reconnecting(&mut self, attempt: u32, now: Instant) {
        let delay = self.backoff.delay(attempt);
        self.connect_deadline = None;
        self.reconnect_at = Some(now + delay);
        self.reconnecting_since_reset = true;
        self.set_state(ConnectionState::Reconnecting { attempt });
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        info!(attempt, delay_ms, "reconnect scheduled");
    }

    fn enter_disconnected(&mut self, reason: DisconnectReason) {
        self.cancel_timers();
        self.heartbeat.stop();
        self.close_transport();
        self.reconnecting_since_reset = false;
        self.lost_emitted = false;
        self.set_state(ConnectionState::Disconnected { reason });
        info!(%reason, queued = self.queue.len(), "disconnected");
        let _ = self
            .registry
            .dispatch(events::CONNECTION_FAILED, &json!({ "reason": reason.as_str() }));
    }

    fn cancel_timers(&mut self) {
        self.reconnect_at = None;
        self.connect_deadline = None;
        self.credential_deadline = None;
    }

    fn close_transport(&mut self) {
        self.transport.close();
        // Anything the old socket still reports is now stale.
        self.epoch += 1;
    }

    fn emit_lost(&mut self, error: &str) {
        if !self.lost_emitted {
            self.lost_emitted = true;
            let _ = self
                .registry
                .dispatch(events::CONNECTION_LOST, &json!({ "error": error }));
        }
    }

    // ── Traffic ─────────────────────────────────────────────────────────

    fn enqueue(&mut self, frame: Frame) {
        if let Some(evicted) = self.queue.enqueue(frame) {
            warn!(
                dropped = %evicted.id,
                frame_type = %evicted.frame.frame_type,
                capacity = self.queue.capacity(),
                "outbound queue full, dropped oldest message"
            );
            self.sink.report(&TetherError::QueueOverflow {
                dropped: evicted.id,
                capacity: self.queue.capacity(),
            });
        }
    }

    fn send_ping(&mut self, now: Instant) {
        if let Err(e) = self.transport.send(&Frame::ping()) {
            self.on_connection_lost(e, now);
        }
    }

    fn handle_frame(&mut self, text: &str, now: Instant) {
        self.heartbeat.record_traffic(now);
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping unparseable frame");
                self.sink.report(&TetherError::Protocol(e.to_string()));
                return;
            }
        };
        match frame.frame_type.as_str() {
            events::PONG => self.heartbeat.record_pong(now),
            events::PING => {
                if let Err(e) = self.transport.send(&Frame::pong()) {
                    self.on_connection_lost(e, now);
                }
            }
            events::AUTH_EXPIRED => self.token_expired(now),
            other if frame.is_reserved() => debug!(frame_type = other, "ignoring reserved frame"),
            other => {
                let _ = self.registry.dispatch(other, &frame.data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingErrorSink;
    use crate::subscriptions::CallbackResult;
    use crate::transport::{EventReceiver, MemoryHandle, MemoryTransport};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use tether_core::FixedJitter;
    use tokio::sync::mpsc;

    struct Harness {
        manager: ConnectionManager,
        handle: MemoryHandle,
        events: EventReceiver,
        sink: Arc<CollectingErrorSink>,
        seen: Arc<Mutex<Vec<(String, Value)>>>,
        now: Instant,
    }

    impl Harness {
        fn new(settings: ClientSettings) -> Self {
            let (transport, handle) = MemoryTransport::new();
            let (tx, events) = mpsc::unbounded_channel();
            let sink = Arc::new(CollectingErrorSink::new());
            let mut manager = ConnectionManager::new(settings, Box::new(transport), tx)
                .unwrap()
                .with_jitter(Box::new(FixedJitter(1.0)))
                .with_error_sink(sink.clone());
            let seen = Arc::new(Mutex::new(Vec::new()));
            for event_type in [
                events::CONNECTION_LOST,
                events::CONNECTION_RESTORED,
                events::CONNECTION_FAILED,
                "job:update",
            ] {
                let seen = Arc::clone(&seen);
                let name = event_type.to_owned();
                let _ = manager.subscribe(
                    event_type,
                    Arc::new(move |data: &Value| -> CallbackResult {
                        seen.lock().push((name.clone(), data.clone()));
                        Ok(())
                    }),
                );
            }
            Self {
                manager,
                handle,
                events,
                sink,
                seen,
                now: Instant::now(),
            }
        }

        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.manager.handle_transport_event(event, self.now);
            }
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
            self.manager.fire_due_timers(self.now);
            self.pump();
        }

        fn advance_to_deadline(&mut self) {
            let deadline = self.manager.next_deadline().expect("a timer is pending");
            self.now = deadline;
            self.manager.fire_due_timers(self.now);
            self.pump();
        }

        fn connect(&mut self) {
            self.manager.connect(Credential::from("tok"), self.now);
            self.handle.accept_open();
            self.pump();
        }

        fn count(&self, event_type: &str) -> usize {
            self.seen.lock().iter().filter(|(t, _)| t == event_type).count()
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            heartbeat_interval_ms: 10_000,
            heartbeat_missed_threshold: 2,
            ..ClientSettings::default()
        }
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let (transport, _handle) = MemoryTransport::new();
        let (tx, _events) = mpsc::unbounded_channel();
        let result = ConnectionManager::new(
            ClientSettings {
                heartbeat_interval_ms: 0,
                ..settings()
            },
            Box::new(transport),
            tx,
        );
        assert_matches!(result, Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn reconnect_delays_restart_after_success() {
        let mut h = Harness::new(ClientSettings {
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            ..settings()
        });
        h.manager.connect(Credential::from("tok"), h.now);
        h.handle.fail_open("refused");
        h.pump();
        for _ in 0..3 {
            h.advance_to_deadline();
            h.handle.fail_open("refused");
            h.pump();
        }
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 4 });

        h.advance_to_deadline();
        h.handle.accept_open();
        h.pump();
        assert_eq!(h.manager.state(), ConnectionState::Connected);

        let lost_at = h.now;
        h.handle.close_remote("reset");
        h.pump();
        assert_eq!(h.manager.next_deadline(), Some(lost_at + Duration::from_millis(1000)));
    }

    #[test]
    fn connect_opens_and_reaches_connected() {
        let mut h = Harness::new(settings());
        h.manager.connect(Credential::from("tok"), h.now);
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert_eq!(h.handle.last_credential().as_deref(), Some("tok"));

        h.handle.accept_open();
        h.pump();
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.count(events::CONNECTION_RESTORED), 0);
    }

    #[test]
    fn connect_is_idempotent_while_active() {
        let mut h = Harness::new(settings());
        h.connect();
        h.manager.connect(Credential::from("newer"), h.now);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.handle.open_count(), 1);
    }

    #[test]
    fn send_while_connected_writes_immediately() {
        let mut h = Harness::new(settings());
        h.connect();
        h.manager.send(Frame::new("job:update", json!({"id": 1})), h.now);

        assert_eq!(h.manager.queue().len(), 0);
        let written = h.handle.written_app_frames();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].data, json!({"id": 1}));
    }

    #[test]
    fn messages_sent_while_disconnected_flush_in_order() {
        let mut h = Harness::new(settings());
        for n in 1..=3 {
            h.manager.send(Frame::new("job:update", json!({"id": n})), h.now);
        }
        assert_eq!(h.manager.queue().len(), 3);

        h.connect();
        assert!(h.manager.queue().is_empty());
        let ids: Vec<_> = h
            .handle
            .written_app_frames()
            .iter()
            .map(|f| f.data["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    fn send_batch(h: &mut Harness, next: &mut u64, count: usize) {
        for _ in 0..count {
            h.manager.send(Frame::new("job:update", json!({"id": *next})), h.now);
            *next += 1;
        }
    }

    proptest! {
        #[test]
        fn sends_reach_the_socket_in_order_across_drain_failures(
            initial in 0usize..20,
            rounds in proptest::collection::vec((0usize..6, 0usize..6), 0..6),
            trailing in 0usize..6,
        ) {
            let mut h = Harness::new(settings());
            let mut next = 0u64;
            send_batch(&mut h, &mut next, initial);
            h.manager.connect(Credential::from("tok"), h.now);

            for (budget, extra) in rounds {
                h.handle.fail_after(budget);
                h.handle.accept_open();
                h.pump();
                send_batch(&mut h, &mut next, extra);
                if h.manager.state().is_connected() {
                    h.handle.close_remote("reset");
                    h.pump();
                }
                prop_assert!(matches!(h.manager.state(), ConnectionState::Reconnecting { .. }), "expected Reconnecting state");
                h.advance_to_deadline();
            }

            h.handle.clear_failures();
            h.handle.accept_open();
            h.pump();
            send_batch(&mut h, &mut next, trailing);

            prop_assert_eq!(h.manager.state(), ConnectionState::Connected);
            prop_assert!(h.manager.queue().is_empty());
            let ids: Vec<u64> = h
                .handle
                .written_app_frames()
                .iter()
                .filter_map(|f| f.data["id"].as_u64())
                .collect();
            prop_assert_eq!(ids, (0..next).collect::<Vec<_>>());
        }
    }

    #[test]
    fn overflow_drops_oldest_and_reports() {
        let mut h = Harness::new(ClientSettings {
            queue_max_capacity: 3,
            ..settings()
        });
        for n in 1..=5 {
            h.manager.send(Frame::new("job:update", json!({"id": n})), h.now);
        }
        let ids: Vec<_> = h.manager.queue().iter().map(|m| m.frame.data["id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(4), json!(5)]);
        assert_eq!(h.sink.count("QUEUE_OVERFLOW"), 2);
    }

    #[test]
    fn overflow_logs_warning() {
        let (logs, _guard) = tether_logging::capture_logs();
        let mut h = Harness::new(ClientSettings {
            queue_max_capacity: 1,
            ..settings()
        });
        h.manager.send(Frame::new("job:update", json!({"id": 1})), h.now);
        h.manager.send(Frame::new("job:update", json!({"id": 2})), h.now);

        assert!(logs.has_event(tracing::Level::WARN, "outbound queue full"));
        let warned = logs
            .events()
            .into_iter()
            .find(|e| e.message.contains("outbound queue full"))
            .unwrap();
        assert_eq!(warned.field("capacity"), Some("1"));
    }

    #[test]
    fn failed_write_queues_and_reconnects() {
        let mut h = Harness::new(settings());
        h.connect();
        h.handle.set_fail_writes(true);
        h.manager.send(Frame::new("job:update", json!({"id": 9})), h.now);

        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(h.manager.queue().len(), 1);
        assert_eq!(h.count(events::CONNECTION_LOST), 1);
    }

    #[test]
    fn open_failure_from_connecting_enters_reconnecting() {
        let mut h = Harness::new(settings());
        h.manager.connect(Credential::from("tok"), h.now);
        h.handle.fail_open("refused");
        h.pump();
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(h.manager.failed_attempts(), 1);
        assert_eq!(h.count(events::CONNECTION_LOST), 0);
    }

    #[test]
    fn connect_timeout_counts_as_failure() {
        let mut h = Harness::new(settings());
        h.manager.connect(Credential::from("tok"), h.now);
        h.advance(Duration::from_millis(10_000));
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn fourth_attempt_delay_follows_backoff() {
        let mut h = Harness::new(ClientSettings {
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            ..settings()
        });
        h.connect();
        h.handle.close_remote("reset");
        h.pump();
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });

        for _ in 0..3 {
            h.advance_to_deadline();
            h.handle.fail_open("refused");
            h.pump();
        }
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 4 });
        let delay = h.manager.next_deadline().unwrap() - h.now;
        assert!(
            (Duration::from_millis(6800)..=Duration::from_millis(9200)).contains(&delay),
            "delay {delay:?}"
        );
        assert_eq!(h.count(events::CONNECTION_LOST), 1);
    }

    #[test]
    fn retry_budget_exhaustion_disconnects() {
        let mut h = Harness::new(ClientSettings {
            max_reconnect_attempts: 2,
            ..settings()
        });
        h.manager.connect(Credential::from("tok"), h.now);
        h.handle.fail_open("refused");
        h.pump();
        for _ in 0..2 {
            h.advance_to_deadline();
            h.handle.fail_open("refused");
            h.pump();
        }
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected {
                reason: DisconnectReason::MaxAttemptsExceeded
            }
        );
        assert_eq!(h.manager.next_deadline(), None);
        assert_eq!(h.sink.count("MAX_ATTEMPTS_EXCEEDED"), 1);
        let failed = h.seen.lock().last().cloned().unwrap();
        assert_eq!(failed, (events::CONNECTION_FAILED.to_owned(), json!({"reason": "max_attempts_exceeded"})));
    }

    #[test]
    fn reconnect_success_emits_restored_and_resets_backoff() {
        let mut h = Harness::new(settings());
        h.connect();
        h.handle.close_remote("reset");
        h.pump();
        h.advance_to_deadline();
        h.handle.fail_open("refused");
        h.pump();
        h.advance_to_deadline();
        h.handle.accept_open();
        h.pump();

        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.manager.failed_attempts(), 0);
        assert_eq!(h.count(events::CONNECTION_LOST), 1);
        assert_eq!(h.count(events::CONNECTION_RESTORED), 1);
    }

    #[test]
    fn two_missed_pongs_force_reconnect() {
        let mut h = Harness::new(settings());
        h.connect();
        h.advance(Duration::from_secs(10));
        h.advance(Duration::from_secs(10));
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        h.advance(Duration::from_secs(10));

        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(h.count(events::CONNECTION_LOST), 1);
        assert_eq!(h.handle.written_types(), vec![events::PING, events::PING]);
    }

    #[test]
    fn pongs_keep_connection_alive() {
        let mut h = Harness::new(settings());
        h.connect();
        for _ in 0..5 {
            h.advance(Duration::from_secs(10));
            h.handle.push_frame(&Frame::pong());
            h.pump();
        }
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn server_ping_is_answered() {
        let mut h = Harness::new(settings());
        h.connect();
        h.handle.push_frame(&Frame::ping());
        h.pump();
        assert_eq!(h.handle.written_types(), vec![events::PONG]);
    }

    #[test]
    fn inbound_frames_dispatch_and_bad_frames_report() {
        let mut h = Harness::new(settings());
        h.connect();
        h.handle.push_frame(&Frame::new("job:update", json!({"id": 7})));
        h.handle.push_text("{not json");
        h.handle.push_frame(&Frame::new("__internal", Value::Null));
        h.pump();

        assert_eq!(h.count("job:update"), 1);
        assert_eq!(h.sink.count("PROTOCOL"), 1);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn stale_epoch_events_are_ignored() {
        let mut h = Harness::new(settings());
        h.connect();
        let stale = TransportEvent::new(0, TransportEventKind::Closed(TetherError::transport("old")));
        h.manager.handle_transport_event(stale, h.now);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn disconnect_suppresses_reconnect_and_keeps_queue() {
        let mut h = Harness::new(settings());
        h.manager.send(Frame::new("job:update", json!({"id": 1})), h.now);
        h.manager.connect(Credential::from("tok"), h.now);
        h.manager.disconnect();

        assert_matches!(
            h.manager.state(),
            ConnectionState::Disconnected { reason: DisconnectReason::UserInitiated }
        );
        assert_eq!(h.manager.next_deadline(), None);
        assert_eq!(h.manager.queue().len(), 1);

        h.handle.accept_open();
        h.pump();
        assert_matches!(h.manager.state(), ConnectionState::Disconnected { .. });
    }

    #[test]
    fn token_expired_waits_for_refresh() {
        let mut h = Harness::new(settings());
        h.connect();
        h.manager.token_expired(h.now);

        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert!(h.manager.awaiting_credential());
        assert_eq!(h.handle.close_count(), 1);
        assert_eq!(h.count(events::CONNECTION_LOST), 1);

        h.manager.token_refreshed(Credential::from("fresh"), h.now);
        assert_eq!(h.handle.last_credential().as_deref(), Some("fresh"));
        h.handle.accept_open();
        h.pump();
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.count(events::CONNECTION_RESTORED), 1);
    }

    #[test]
    fn credential_timeout_is_auth_failure() {
        let mut h = Harness::new(settings());
        h.connect();
        h.manager.token_expired(h.now);
        h.advance(Duration::from_millis(30_000));
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected {
                reason: DisconnectReason::AuthFailure
            }
        );
    }

    #[test]
    fn server_auth_signals_take_token_expired_path() {
        let mut h = Harness::new(settings());
        h.connect();
        h.handle.push_frame(&Frame::new(events::AUTH_EXPIRED, Value::Null));
        h.pump();
        assert!(h.manager.awaiting_credential());

        let mut h = Harness::new(settings());
        h.connect();
        h.handle.close_auth_expired();
        h.pump();
        assert!(h.manager.awaiting_credential());

        let mut h = Harness::new(settings());
        h.manager.connect(Credential::from("tok"), h.now);
        h.handle.reject_credential();
        h.pump();
        assert!(h.manager.awaiting_credential());
        assert_eq!(h.manager.failed_attempts(), 0);
    }

    #[test]
    fn offline_then_online_reconnects_immediately() {
        let mut h = Harness::new(settings());
        h.connect();
        h.manager.network_offline();
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected {
                reason: DisconnectReason::NetworkOffline
            }
        );
        let opens = h.handle.open_count();

        h.manager.network_online(h.now);
        assert_eq!(h.handle.open_count(), opens + 1);
        h.handle.accept_open();
        h.pump();
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn online_skips_pending_backoff() {
        let mut h = Harness::new(settings());
        h.connect();
        h.handle.close_remote("reset");
        h.pump();
        let opens = h.handle.open_count();
        h.manager.network_online(h.now);
        assert_eq!(h.handle.open_count(), opens + 1);
    }

    #[test]
    fn online_after_user_disconnect_does_nothing() {
        let mut h = Harness::new(settings());
        h.connect();
        h.manager.disconnect();
        h.manager.network_online(h.now);
        assert_eq!(h.handle.open_count(), 1);
    }

    #[test]
    fn liveness_check_after_long_silence_reconnects() {
        let mut h = Harness::new(settings());
        h.connect();
        h.now += Duration::from_secs(60);
        h.manager.check_liveness(h.now);
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn liveness_check_pings_when_healthy() {
        let mut h = Harness::new(settings());
        h.connect();
        h.now += Duration::from_secs(5);
        h.manager.check_liveness(h.now);
        assert_eq!(h.handle.written_types(), vec![events::PING]);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn teardown_is_terminal() {
        let mut h = Harness::new(settings());
        h.manager.send(Frame::new("job:update", json!({"id": 1})), h.now);
        h.connect();
        h.handle.close_remote("reset");
        h.pump();
        h.manager.teardown();

        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert_eq!(h.manager.next_deadline(), None);
        assert_eq!(h.manager.subscription_count(), 0);

        let writes = h.handle.written().len();
        h.manager.connect(Credential::from("tok"), h.now);
        h.manager.send(Frame::new("job:update", json!({"id": 2})), h.now);
        h.manager.network_offline();
        h.manager.network_online(h.now);
        h.manager.token_expired(h.now);
        h.manager.token_refreshed(Credential::from("fresh"), h.now);
        h.manager.check_liveness(h.now);
        let epoch = h.manager.epoch;
        for kind in [
            TransportEventKind::Opened,
            TransportEventKind::Frame(r#"{"type":"__ping"}"#.into()),
            TransportEventKind::Closed(TetherError::transport("reset")),
            TransportEventKind::Closed(TetherError::AuthExpired),
        ] {
            h.manager.handle_transport_event(TransportEvent::new(epoch, kind), h.now);
        }
        h.advance(Duration::from_secs(120));

        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert_eq!(h.manager.next_deadline(), None);
        assert!(h.manager.queue().is_empty());
        assert!(!h.manager.awaiting_credential());
        assert_eq!(h.handle.open_count(), 1);
        assert_eq!(h.handle.written().len(), writes);
    }

    #[test]
    fn failing_drain_returns_to_reconnecting() {
        let mut h = Harness::new(settings());
        for n in 1..=3 {
            h.manager.send(Frame::new("job:update", json!({"id": n})), h.now);
        }
        h.manager.connect(Credential::from("tok"), h.now);
        h.handle.fail_after(1);
        h.handle.accept_open();
        h.pump();

        assert_eq!(h.manager.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(h.manager.queue().len(), 2);
        assert_eq!(h.count(events::CONNECTION_RESTORED), 0);
    }
}
