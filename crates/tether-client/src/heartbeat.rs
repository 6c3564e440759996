//! Heartbeat ping/pong liveness monitoring.
//!
//! Guards against connections that stay open at the transport level but no
//! longer deliver data, e.g. behind proxies that silently drop idle sockets.
//!
//! The monitor does no I/O. It tells the connection manager when to send a
//! ping and when to give up; the manager performs the write.

use std::time::Duration;

use tether_settings::HeartbeatMode;
use tokio::time::Instant;

/// Liveness bookkeeping for the current connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatState {
    /// When the last ping went out.
    pub last_sent_at: Option<Instant>,
    /// When the last acknowledgement arrived.
    pub last_ack_at: Option<Instant>,
    /// Consecutive pings that went unacknowledged.
    pub missed_count: u32,
}

/// What the manager should do after a heartbeat check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Write a `__ping` frame.
    SendPing,
    /// The connection is dead; force a reconnect.
    Dead,
}

/// Periodic liveness check.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    missed_threshold: u32,
    mode: HeartbeatMode,
    state: HeartbeatState,
    started_at: Option<Instant>,
    next_tick: Option<Instant>,
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl HeartbeatMonitor {
    /// Monitor pinging every `interval`, declaring death after
    /// `missed_threshold` consecutive unacknowledged pings.
    ///
    /// A zero interval is raised to one millisecond so the timer always
    /// moves forward.
    pub fn new(interval: Duration, missed_threshold: u32, mode: HeartbeatMode) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            missed_threshold: missed_threshold.max(1),
            mode,
            state: HeartbeatState::default(),
            started_at: None,
            next_tick: None,
        }
    }

    /// Reset state and schedule the first tick one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.state = HeartbeatState::default();
        self.started_at = Some(now);
        self.next_tick = Some(now + self.interval);
    }

    /// Cancel the timer.
    pub fn stop(&mut self) {
        self.started_at = None;
        self.next_tick = None;
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// When the next tick is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Current bookkeeping.
    pub fn state(&self) -> &HeartbeatState {
        &self.state
    }

    /// A `__pong` arrived.
    pub fn record_pong(&mut self, now: Instant) {
        self.acknowledge(now);
    }

    /// Any inbound frame arrived. Counts as an acknowledgement only in
    /// [`HeartbeatMode::AnyTraffic`].
    pub fn record_traffic(&mut self, now: Instant) {
        if self.mode == HeartbeatMode::AnyTraffic {
            self.acknowledge(now);
        }
    }

    fn acknowledge(&mut self, now: Instant) {
        if self.started_at.is_none() {
            return;
        }
        self.state.last_ack_at = Some(now);
        self.state.missed_count = 0;
    }

    fn ping_outstanding(&self) -> bool {
        match (self.state.last_sent_at, self.state.last_ack_at) {
            (Some(sent), Some(ack)) => ack < sent,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Run the periodic check if it is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<HeartbeatAction> {
        let due = self.next_tick?;
        if now < due {
            return None;
        }

        if self.ping_outstanding() {
            self.state.missed_count += 1;
            if self.state.missed_count >= self.missed_threshold {
                self.stop();
                return Some(HeartbeatAction::Dead);
            }
        }

        self.state.last_sent_at = Some(now);
        self.next_tick = Some(now + self.interval);
        Some(HeartbeatAction::SendPing)
    }

    /// Immediate liveness check, used when the host returns to the
    /// foreground and timers may have been suspended.
    ///
    /// Declares the connection dead if it has been silent for longer than
    /// `interval * missed_threshold`; otherwise pings now and restarts the
    /// interval. Returns `None` when the monitor is not running.
    pub fn force_check(&mut self, now: Instant) -> Option<HeartbeatAction> {
        let started_at = self.started_at?;
        let last_heard = self.state.last_ack_at.unwrap_or(started_at);
        let silence = now.saturating_duration_since(last_heard);
        if silence > self.interval * self.missed_threshold {
            self.stop();
            return Some(HeartbeatAction::Dead);
        }

        self.state.last_sent_at = Some(now);
        self.next_tick = Some(now + self.interval);
        Some(HeartbeatAction::SendPing)
    }
}
