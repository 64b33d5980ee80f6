//! Resolved configuration consumed by the rest of the crate.

use std::path::PathBuf;

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins, matched exactly or through one `*` wildcard.
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub body_limit_bytes: usize,
    /// Root of generated images: `<history_dir>/<task_id>/<file>`.
    pub history_dir: PathBuf,
    /// Directory holding `text_providers.yaml` and `image_providers.yaml`.
    pub providers_dir: PathBuf,
    /// Require a bound `X-Device-ID` on outline requests.
    pub require_device_binding: bool,
}

impl Config {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Values that take precedence over the TOML file, normally read from the
/// environment. Tests construct these directly.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<String>,
    /// Comma-separated.
    pub cors_origins: Option<String>,
    pub history_dir: Option<String>,
    pub providers_dir: Option<String>,
    pub log_level: Option<String>,
    pub require_device_binding: Option<String>,
}

impl Overrides {
    /// `HOST`, `PORT`, `CORS_ORIGINS`, `HISTORY_DIR`, `REDINK_PROVIDERS_DIR`,
    /// `REDINK_LOG_LEVEL`, `REDINK_REQUIRE_DEVICE_BINDING`.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            host: var("HOST"),
            port: var("PORT"),
            cors_origins: var("CORS_ORIGINS"),
            history_dir: var("HISTORY_DIR"),
            providers_dir: var("REDINK_PROVIDERS_DIR"),
            log_level: var("REDINK_LOG_LEVEL"),
            require_device_binding: var("REDINK_REQUIRE_DEVICE_BINDING"),
        }
    }
}
