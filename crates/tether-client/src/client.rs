//! Async driver and the cloneable [`TetherClient`] handle.
//!
//! One tokio task owns the [`ConnectionManager`]. It waits on three inputs:
//! commands from [`TetherClient`] handles, events from the transport, and
//! the manager's next timer deadline. State is published through a `watch`
//! channel after every step so [`TetherClient::get_state`] never blocks.

use serde_json::Value;
use tether_core::{ConnectionState, Credential, Frame, SubscriptionId};
use tether_settings::{ClientSettings, SettingsError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::command::Command;
use crate::manager::ConnectionManager;
use crate::subscriptions::CallbackResult;
use crate::transport::{EventReceiver, Transport, WsTransport};

/// Handle to a running connection. Cheap to clone; every clone talks to
/// the same driver task.
///
/// All methods return immediately. When the last handle is dropped the
/// driver tears the connection down.
#[derive(Clone, Debug)]
pub struct TetherClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl TetherClient {
    /// Spawn a driver for a WebSocket connection to `settings.url`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidValue`] when `settings` fail
    /// validation. No task is spawned in that case.
    pub fn connect_ws(settings: ClientSettings) -> Result<(Self, JoinHandle<()>), SettingsError> {
        let transport = WsTransport::new(settings.url.clone());
        Self::with_transport(settings, Box::new(transport))
    }

    /// Spawn a driver over any transport.
    ///
    /// # Errors
    ///
    /// Same as [`TetherClient::connect_ws`].
    pub fn with_transport(
        settings: ClientSettings,
        transport: Box<dyn Transport>,
    ) -> Result<(Self, JoinHandle<()>), SettingsError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(settings, transport, events_tx)?;
        Ok(Self::spawn(manager, events_rx))
    }

    /// Spawn a driver for a pre-configured manager. `events` must be the
    /// receiving half of the channel the manager was built with.
    pub fn spawn(manager: ConnectionManager, events: EventReceiver) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(manager.state());
        let task = tokio::spawn(run(manager, events, commands_rx, state_tx));
        (
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            task,
        )
    }

    /// Hand a command to the driver. Silently dropped after teardown.
    pub fn execute(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("command after teardown ignored");
        }
    }

    /// Connect with `credential`.
    pub fn connect(&self, credential: impl Into<Credential>) {
        self.execute(Command::Connect(credential.into()));
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.execute(Command::Disconnect);
    }

    /// Write `data` as a `frame_type` frame, queueing it while disconnected.
    pub fn send(&self, frame_type: impl Into<String>, data: Value) {
        self.execute(Command::Send(Frame::new(frame_type, data)));
    }

    /// Call `callback` with the `data` of every `event_type` frame.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) -> CallbackResult + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.execute(Command::Subscribe {
            id: id.clone(),
            event_type: event_type.into(),
            callback: std::sync::Arc::new(callback),
        });
        id
    }

    /// Remove a subscription. Unknown IDs are ignored.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        self.execute(Command::Unsubscribe(id.clone()));
    }

    /// Report that the credential expired.
    pub fn token_expired(&self) {
        self.execute(Command::TokenExpired);
    }

    /// Supply a refreshed credential.
    pub fn token_refreshed(&self, credential: impl Into<Credential>) {
        self.execute(Command::TokenRefreshed(credential.into()));
    }

    /// Report that the host is back online.
    pub fn network_online(&self) {
        self.execute(Command::NetworkOnline);
    }

    /// Report that the host went offline.
    pub fn network_offline(&self) {
        self.execute(Command::NetworkOffline);
    }

    /// Run an immediate heartbeat check.
    pub fn check_liveness(&self) {
        self.execute(Command::CheckLiveness);
    }

    /// Release the connection. Every later command is ignored.
    pub fn teardown(&self) {
        self.execute(Command::Teardown);
    }

    /// Latest published state.
    pub fn get_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut manager: ConnectionManager,
    mut events: EventReceiver,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    debug!("connection driver started");
    loop {
        let deadline = manager.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => manager.apply(command, Instant::now()),
                None => {
                    debug!("all client handles dropped");
                    manager.teardown();
                }
            },
            Some(event) = events.recv() => manager.handle_transport_event(event, Instant::now()),
            () = sleep_until_deadline(deadline) => manager.fire_due_timers(Instant::now()),
        }

        let current = manager.state();
        let _ = state.send_if_modified(|published| {
            if *published == current {
                false
            } else {
                *published = current;
                true
            }
        });
        if current.is_closed() {
            break;
        }
    }
    debug!("connection driver stopped");
}
