//! Host environment signals.
//!
//! Network reachability, foreground/background visibility, and credential
//! expiry arrive from outside the connection layer, often repeated. This
//! adapter turns edges into manager commands and swallows repeats.

use tokio::sync::mpsc;
use tracing::debug;

use crate::client::TetherClient;
use crate::command::Command;

/// Something the host environment reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvironmentSignal {
    /// Network access came back.
    NetworkOnline,
    /// Network access went away.
    NetworkOffline,
    /// The application became visible.
    Foreground,
    /// The application was hidden or suspended.
    Background,
    /// The auth layer says the credential expired.
    CredentialExpired,
}

/// Edge detector over [`EnvironmentSignal`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentSignals {
    online: bool,
    visible: bool,
}

impl Default for EnvironmentSignals {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl EnvironmentSignals {
    /// Start from a known environment.
    pub fn new(online: bool, visible: bool) -> Self {
        Self { online, visible }
    }

    /// Whether the host is believed online.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Whether the application is believed visible.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Command for `signal`, or `None` if it changes nothing.
    pub fn translate(&mut self, signal: EnvironmentSignal) -> Option<Command> {
        match signal {
            EnvironmentSignal::NetworkOnline if !self.online => {
                self.online = true;
                Some(Command::NetworkOnline)
            }
            EnvironmentSignal::NetworkOffline if self.online => {
                self.online = false;
                Some(Command::NetworkOffline)
            }
            EnvironmentSignal::Foreground if !self.visible => {
                self.visible = true;
                Some(Command::CheckLiveness)
            }
            EnvironmentSignal::Background => {
                self.visible = false;
                None
            }
            EnvironmentSignal::CredentialExpired => Some(Command::TokenExpired),
            _ => None,
        }
    }

    /// Translate `signal` and hand the result to `client`. Returns whether
    /// a command was issued.
    pub fn apply(&mut self, signal: EnvironmentSignal, client: &TetherClient) -> bool {
        match self.translate(signal) {
            Some(command) => {
                debug!(?signal, command = command.name(), "environment signal");
                client.execute(command);
                true
            }
            None => false,
        }
    }

    /// Forward every signal from `signals` until the sender side closes.
    pub async fn forward(mut self, mut signals: mpsc::Receiver<EnvironmentSignal>, client: TetherClient) {
        while let Some(signal) = signals.recv().await {
            let _ = self.apply(signal, &client);
        }
    }
}
