//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section implements [`Default`]
//! and is `#[serde(default)]`, so a partial file only overrides what it names.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;

use alva_core::security::AnonKey;

use crate::errors::{Result, SettingsError};
use crate::loader::alva_dir;

/// Root settings for the dashboard client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlvaSettings {
    pub backend: BackendSettings,
    pub realtime: RealtimeSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

impl AlvaSettings {
    /// Check values that deserialize fine but can't be used.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.logging.level()?;
        self.logging.module_levels()?;
        Ok(())
    }
}

/// Where the hosted backend lives.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Publishable anon key. Empty means unset.
    pub anon_key: String,
    /// Per-request timeout for REST and auth calls.
    pub request_timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("url", &self.url)
            .field("anon_key", &if self.anon_key.is_empty() { "" } else { "[REDACTED]" })
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl BackendSettings {
    pub fn anon_key(&self) -> Result<AnonKey> {
        if self.anon_key.trim().is_empty() {
            return Err(SettingsError::MissingAnonKey);
        }
        Ok(AnonKey::new(self.anon_key.trim()))
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    fn validate(&self) -> Result<()> {
        let url = self.base_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "backend.url must be an http(s) URL, got {:?}",
                self.url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "backend.requestTimeoutMs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Interval between `heartbeat` frames on the change-feed socket.
    pub heartbeat_interval_ms: u64,
    /// How long to wait for a channel join to be acknowledged.
    pub join_timeout_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 25_000,
            join_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Where the signed-in session is stored. Defaults to `~/.alva/session.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl SessionSettings {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| alva_dir().join("session.json"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Module path to level, e.g. `{"alva_sync": "debug"}`.
    pub modules: BTreeMap<String, String>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}

impl LoggingSettings {
    pub fn level(&self) -> Result<Level> {
        parse_level(&self.level)
    }

    pub fn module_levels(&self) -> Result<Vec<(String, Level)>> {
        self.modules
            .iter()
            .map(|(module, level)| Ok((module.clone(), parse_level(level)?)))
            .collect()
    }
}

fn parse_level(s: &str) -> Result<Level> {
    s.trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue(format!("unknown log level {s:?}")))
}
