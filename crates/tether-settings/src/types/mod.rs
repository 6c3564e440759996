//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so partial JSON works: missing fields get their default value.

mod client;

pub use client::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Loaded from `~/.tether/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "client": { "url": "wss://jobs.example.com/ws", "queueMaxCapacity": 500 },
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Connection manager options.
    pub client: ClientSettings,
    /// Logging options.
    pub logging: LoggingSettings,
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
