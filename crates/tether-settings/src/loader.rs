//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)
//! 4. Validate the client section
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{HeartbeatMode, TetherSettings};

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, reading overrides through `lookup`.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<TetherSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.client.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules; invalid values are logged and
/// ignored (the file/default value stays).
pub fn apply_overrides<F>(settings: &mut TetherSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };
    let client = &mut settings.client;

    if let Some(v) = env.string("TETHER_URL") {
        client.url = v;
    }
    if let Some(v) = env.u64("TETHER_BASE_DELAY_MS", 1, 3_600_000) {
        client.base_delay_ms = v;
    }
    if let Some(v) = env.u64("TETHER_MAX_DELAY_MS", 1, 3_600_000) {
        client.max_delay_ms = v;
    }
    if let Some(v) = env.f64("TETHER_BACKOFF_MULTIPLIER", 1.0, 10.0) {
        client.backoff_multiplier = v;
    }
    if let Some(v) = env.u64("TETHER_MAX_RECONNECT_ATTEMPTS", 1, 10_000) {
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        client.max_reconnect_attempts = attempts;
    }
    if let Some(v) = env.u64("TETHER_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        client.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("TETHER_HEARTBEAT_MISSED_THRESHOLD", 1, 100) {
        #[allow(clippy::cast_possible_truncation)]
        let threshold = v as u32;
        client.heartbeat_missed_threshold = threshold;
    }
    if let Some(v) = env.string("TETHER_HEARTBEAT_MODE") {
        match serde_json::from_value::<HeartbeatMode>(Value::String(v.clone())) {
            Ok(mode) => client.heartbeat_mode = mode,
            Err(_) => {
                tracing::warn!(key = "TETHER_HEARTBEAT_MODE", value = %v, "invalid heartbeat mode, ignoring");
            }
        }
    }
    if let Some(v) = env.usize("TETHER_QUEUE_MAX_CAPACITY", 1, 1_000_000) {
        client.queue_max_capacity = v;
    }
    if let Some(v) = env.u64("TETHER_CONNECT_TIMEOUT_MS", 100, 600_000) {
        client.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("TETHER_CREDENTIAL_TIMEOUT_MS", 100, 3_600_000) {
        client.credential_timeout_ms = v;
    }

    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = (self.lookup)(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
