//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults, so an
//! empty file (or no file at all) yields a working configuration.

use serde::Deserialize;

#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub server: RawServer,
    #[serde(default)]
    pub storage: RawStorage,
    #[serde(default)]
    pub security: RawSecurity,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawServer {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            log_level: default_log_level(),
            body_limit_mb: default_body_limit_mb(),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawStorage {
    #[serde(default = "default_history_dir")]
    pub history_dir: String,
    #[serde(default = "default_providers_dir")]
    pub providers_dir: String,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            providers_dir: default_providers_dir(),
        }
    }
}

#[derive(Deserialize, Default)]
pub(super) struct RawSecurity {
    #[serde(default)]
    pub require_device_binding: bool,
}

// ── Defaults ────────────────────────────────────────────────────────────────

pub(super) fn default_host() -> String {
    "0.0.0.0".into()
}

pub(super) fn default_port() -> u16 {
    12399
}

pub(super) fn default_cors_origins() -> Vec<String> {
    vec![
        "https://redink-self.vercel.app".into(),
        "http://localhost:5173".into(),
        "http://localhost:3000".into(),
    ]
}

pub(super) fn default_log_level() -> String {
    "info".into()
}

pub(super) fn default_body_limit_mb() -> usize {
    50
}

pub(super) fn default_history_dir() -> String {
    "history".into()
}

pub(super) fn default_providers_dir() -> String {
    ".".into()
}
