//! Connection, heartbeat, and queue settings.

use serde::{Deserialize, Serialize};
use tether_core::BackoffConfig;
use tether_core::backoff::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MULTIPLIER};

use crate::errors::{Result, SettingsError};

/// What counts as a heartbeat acknowledgement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatMode {
    /// Only `__pong` frames reset the missed counter.
    #[default]
    Pong,
    /// Any inbound frame resets the missed counter.
    AnyTraffic,
}

/// Options recognized by the connection manager.
///
/// Every field has a default and can be overridden independently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server endpoint.
    pub url: String,
    /// Delay before the first reconnect attempt, in ms.
    pub base_delay_ms: u64,
    /// Ceiling for any single reconnect delay, in ms.
    pub max_delay_ms: u64,
    /// Growth factor between reconnect delays.
    pub backoff_multiplier: f64,
    /// Retries before giving up with `MaxAttemptsExceeded`.
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeat pings, in ms.
    pub heartbeat_interval_ms: u64,
    /// Consecutive unacknowledged pings that declare the connection dead.
    pub heartbeat_missed_threshold: u32,
    /// What acknowledges a heartbeat.
    pub heartbeat_mode: HeartbeatMode,
    /// Outbound messages kept while disconnected.
    pub queue_max_capacity: usize,
    /// Timeout for a single open attempt, in ms.
    pub connect_timeout_ms: u64,
    /// How long to wait for a refreshed credential, in ms.
    pub credential_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 25_000,
            heartbeat_missed_threshold: 2,
            heartbeat_mode: HeartbeatMode::Pong,
            queue_max_capacity: 200,
            connect_timeout_ms: 10_000,
            credential_timeout_ms: 30_000,
        }
    }
}

impl ClientSettings {
    /// Backoff parameters derived from these settings.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.backoff_multiplier,
        }
    }

    /// Reject combinations the connection manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(SettingsError::InvalidValue("url must not be empty".into()));
        }
        if self.base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "baseDelayMs must be greater than 0".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "maxDelayMs ({}) must be >= baseDelayMs ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SettingsError::InvalidValue(format!(
                "backoffMultiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "maxReconnectAttempts must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_missed_threshold == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs and heartbeatMissedThreshold must be greater than 0".into(),
            ));
        }
        if self.queue_max_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "queueMaxCapacity must be at least 1".into(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.credential_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connectTimeoutMs and credentialTimeoutMs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
