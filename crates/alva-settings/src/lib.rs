//! # alva-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AlvaSettings::default()`]
//! 2. **User file**: `~/.alva/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ALVA_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    alva_dir, apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_with_env, settings_path,
};
pub use types::{AlvaSettings, BackendSettings, LoggingSettings, RealtimeSettings, SessionSettings};
