//! # tether-settings
//!
//! Layered configuration for the Tether connection layer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = TetherSettings::default();
        settings.client.validate().unwrap();
        assert_eq!(settings.client.base_delay_ms, 1000);
        assert_eq!(settings.client.max_delay_ms, 30_000);
        assert_eq!(settings.client.connect_timeout_ms, 10_000);
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn settings_path_is_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".tether/settings.json"));
    }
}
