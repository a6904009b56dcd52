//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AlvaSettings::default()`]
//! 2. If `~/.alva/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `ALVA_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::AlvaSettings;

/// `~/.alva`, or `/tmp/.alva` when `HOME` is unset.
pub fn alva_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".alva")
}

pub fn settings_path() -> PathBuf {
    alva_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AlvaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<AlvaSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] but reading overrides through `env`.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<AlvaSettings> {
    let defaults = serde_json::to_value(AlvaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AlvaSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ALVA_*` overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut AlvaSettings, env: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(v) = string("ALVA_URL") {
        settings.backend.url = v;
    }
    if let Some(v) = string("ALVA_ANON_KEY") {
        settings.backend.anon_key = v;
    }
    if let Some(v) = string("ALVA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("ALVA_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => tracing::warn!(key = "ALVA_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = string("ALVA_HEARTBEAT_INTERVAL_MS") {
        match parse_u64_range(&v, 1000, 600_000) {
            Some(n) => settings.realtime.heartbeat_interval_ms = n,
            None => tracing::warn!(
                key = "ALVA_HEARTBEAT_INTERVAL_MS",
                value = %v,
                "invalid u64 env var, ignoring"
            ),
        }
    }
    if let Some(v) = string("ALVA_SESSION_FILE") {
        settings.session.path = Some(PathBuf::from(v));
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
