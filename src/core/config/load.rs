//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains, and
//! applies [`Overrides`] on top of the merged result.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::core::error::AppError;

use super::raw::RawConfig;
use super::types::{Config, Overrides};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Deep-merge two TOML values.
/// Tables merge recursively; any other overlay value replaces the base value.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file and follow its `[meta] base` chain. `visited` holds the
/// canonical paths already seen so cycles fail instead of recursing forever.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let overlay: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let base = overlay
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str());
    match base {
        Some(base) => {
            let base_path = if Path::new(base).is_absolute() {
                PathBuf::from(base)
            } else {
                path.parent().unwrap_or(Path::new(".")).join(base)
            };
            debug!(config = %path.display(), base = %base_path.display(), "following config base");
            Ok(merge_toml(load_raw_merged(&base_path, visited)?, overlay))
        }
        None => Ok(overlay),
    }
}

/// Load config from `config_path`, or `config/default.toml` when it exists,
/// or built-in defaults; then apply environment overrides.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        resolve(RawConfig::default(), &overrides)
    }
}

/// Built-in defaults with `overrides` applied.
pub fn load_defaults(overrides: &Overrides) -> Result<Config, AppError> {
    resolve(RawConfig::default(), overrides)
}

/// Load an explicit file. Tests pass overrides directly instead of mutating
/// the process environment.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let merged = load_raw_merged(path, &mut HashSet::new())?;
    let parsed: RawConfig = Deserialize::deserialize(merged)
        .map_err(|e: toml::de::Error| AppError::Config(format!("config error in {}: {e}", path.display())))?;
    resolve(parsed, overrides)
}

fn resolve(raw: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let server = raw.server;

    let port = match overrides.port.as_deref() {
        Some(p) => p
            .trim()
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("invalid PORT '{p}': {e}")))?,
        None => server.port,
    };

    let cors_origins = match overrides.cors_origins.as_deref() {
        Some(list) => split_origins(list),
        None => server.cors_origins,
    };

    let require_device_binding = match overrides.require_device_binding.as_deref() {
        Some(v) => parse_bool(v)
            .ok_or_else(|| AppError::Config(format!("invalid REDINK_REQUIRE_DEVICE_BINDING '{v}'")))?,
        None => raw.security.require_device_binding,
    };

    let history_dir = overrides.history_dir.as_deref().unwrap_or(&raw.storage.history_dir);
    let providers_dir = overrides.providers_dir.as_deref().unwrap_or(&raw.storage.providers_dir);

    Ok(Config {
        host: overrides.host.clone().unwrap_or(server.host),
        port,
        cors_origins,
        log_level: overrides.log_level.clone().unwrap_or(server.log_level),
        body_limit_bytes: server.body_limit_mb * 1024 * 1024,
        history_dir: expand_home(history_dir),
        providers_dir: expand_home(providers_dir),
        require_device_binding,
    })
}

fn split_origins(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
