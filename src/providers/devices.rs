//! Per-provider device bindings.
//!
//! A provider's API key may be restricted to a small set of client devices,
//! identified by the fingerprint the frontend sends as `X-Device-ID`. Bindings
//! live in the provider file under `authorized_devices` and expire 24 hours
//! after they were made (or last renewed). A provider with no bindings at all
//! is open to every device.
//!
//! The registry reads and writes the provider file directly. A provider that
//! only exists through a `*_API_KEY` override cannot carry bindings.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::service::ProviderConfigService;
use super::types::{DeviceRecord, Domain, ProviderConfig};
use super::ConfigError;

pub const MAX_DEVICES_PER_KEY: usize = 5;
pub const BINDING_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("provider {0} does not exist")]
    UnknownProvider(String),

    #[error("device limit reached ({max} devices), remove another device first")]
    LimitReached { max: usize },

    #[error("device {0} is not bound")]
    NotBound(String),

    #[error("provider {0} comes from environment variables and cannot bind devices\nfix: add the provider to the config file on the settings page")]
    EnvManaged(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Outcome of checking a device against a provider's bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    /// The provider has no bindings; every device passes.
    BindingDisabled,
    Valid,
    Expired,
    NotBound,
    UnknownProvider,
}

impl Validation {
    pub fn is_allowed(self) -> bool {
        matches!(self, Validation::BindingDisabled | Validation::Valid)
    }

    pub fn message(self) -> &'static str {
        match self {
            Validation::BindingDisabled => "device binding not enabled",
            Validation::Valid => "device verified",
            Validation::Expired => "device binding expired, bind this device again",
            Validation::NotBound => "device not authorised for this API key",
            Validation::UnknownProvider => "provider does not exist",
        }
    }
}

/// Whether a new binding was made or an existing one renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindOutcome {
    Bound,
    Renewed,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Device bindings of one domain, kept in the domain's provider file.
pub struct DeviceRegistry<'a> {
    service: &'a ProviderConfigService,
    domain: Domain,
}

impl<'a> DeviceRegistry<'a> {
    pub fn new(service: &'a ProviderConfigService, domain: Domain) -> Self {
        Self { service, domain }
    }

    fn missing(&self, provider: &str) -> DeviceError {
        if self.service.env_override_active(self.domain) {
            DeviceError::EnvManaged(provider.to_string())
        } else {
            DeviceError::UnknownProvider(provider.to_string())
        }
    }

    pub fn bind(&self, provider: &str, device_id: &str, device_name: Option<&str>) -> Result<BindOutcome, DeviceError> {
        let mut cfg = self.service.load_file(self.domain)?;
        let Some(entry) = cfg.providers.get_mut(provider) else {
            return Err(self.missing(provider));
        };

        let outcome = bind_device(entry, device_id, device_name, Utc::now())?;
        self.service.save(self.domain, &cfg)?;

        info!(domain = %self.domain, provider, device = short_id(device_id), ?outcome, "device bound");
        Ok(outcome)
    }

    /// Check a device and record the use when it passes.
    pub fn validate(&self, provider: &str, device_id: &str) -> Result<Validation, DeviceError> {
        let mut cfg = self.service.load_file(self.domain)?;
        let Some(entry) = cfg.providers.get_mut(provider) else {
            return Ok(self.unlisted());
        };

        let now = Utc::now();
        let result = check_device(entry, device_id, now);
        if result == Validation::Valid {
            touch_device(entry, device_id, now);
            self.service.save(self.domain, &cfg)?;
        } else if !result.is_allowed() {
            warn!(domain = %self.domain, provider, device = short_id(device_id), ?result, "device rejected");
        }
        Ok(result)
    }

    /// Check a device without recording the use.
    pub fn is_valid(&self, provider: &str, device_id: &str) -> Result<bool, DeviceError> {
        let cfg = self.service.load_file(self.domain)?;
        Ok(match cfg.providers.get(provider) {
            Some(entry) => check_device(entry, device_id, Utc::now()),
            None => self.unlisted(),
        }
        .is_allowed())
    }

    /// Result for a provider absent from the file.
    fn unlisted(&self) -> Validation {
        if self.service.env_override_active(self.domain) {
            Validation::BindingDisabled
        } else {
            Validation::UnknownProvider
        }
    }

    /// Live bindings of `provider`. Expired ones are purged (and saved) first.
    pub fn list(&self, provider: &str) -> Result<Vec<DeviceRecord>, DeviceError> {
        let mut cfg = self.service.load_file(self.domain)?;
        let Some(entry) = cfg.providers.get_mut(provider) else {
            return Ok(Vec::new());
        };

        let purged = purge_expired(entry, Utc::now());
        let devices = entry.authorized_devices.clone();
        if purged > 0 {
            self.service.save(self.domain, &cfg)?;
        }
        Ok(devices)
    }

    pub fn remove(&self, provider: &str, device_id: &str) -> Result<(), DeviceError> {
        let mut cfg = self.service.load_file(self.domain)?;
        let Some(entry) = cfg.providers.get_mut(provider) else {
            return Err(self.missing(provider));
        };

        let before = entry.authorized_devices.len();
        entry.authorized_devices.retain(|d| d.device_id != device_id);
        if entry.authorized_devices.len() == before {
            return Err(DeviceError::NotBound(device_id.to_string()));
        }

        self.service.save(self.domain, &cfg)?;
        info!(domain = %self.domain, provider, device = short_id(device_id), "device removed");
        Ok(())
    }
}

// ── Binding rules ─────────────────────────────────────────────────────────────

fn bind_device(
    provider: &mut ProviderConfig,
    device_id: &str,
    device_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<BindOutcome, DeviceError> {
    let stamp = now.to_rfc3339();
    let device_name = device_name.map(str::trim).filter(|n| !n.is_empty());

    if let Some(existing) = provider.authorized_devices.iter_mut().find(|d| d.device_id == device_id) {
        existing.bound_at = stamp.clone();
        existing.last_used = stamp;
        if let Some(name) = device_name {
            existing.device_name = name.to_string();
        }
        return Ok(BindOutcome::Renewed);
    }

    purge_expired(provider, now);
    let devices = &mut provider.authorized_devices;
    if devices.len() >= MAX_DEVICES_PER_KEY {
        return Err(DeviceError::LimitReached { max: MAX_DEVICES_PER_KEY });
    }

    let device_name = device_name
        .map(str::to_string)
        .unwrap_or_else(|| format!("设备 {}", devices.len() + 1));
    devices.push(DeviceRecord {
        device_id: device_id.to_string(),
        device_name,
        bound_at: stamp.clone(),
        last_used: stamp,
    });
    Ok(BindOutcome::Bound)
}

fn check_device(provider: &ProviderConfig, device_id: &str, now: DateTime<Utc>) -> Validation {
    if provider.authorized_devices.is_empty() {
        return Validation::BindingDisabled;
    }
    match provider.authorized_devices.iter().find(|d| d.device_id == device_id) {
        Some(device) if is_expired(device, now) => Validation::Expired,
        Some(_) => Validation::Valid,
        None => Validation::NotBound,
    }
}

fn touch_device(provider: &mut ProviderConfig, device_id: &str, now: DateTime<Utc>) {
    if let Some(device) = provider.authorized_devices.iter_mut().find(|d| d.device_id == device_id) {
        device.last_used = now.to_rfc3339();
    }
}

/// Drop expired bindings; returns how many were removed.
fn purge_expired(provider: &mut ProviderConfig, now: DateTime<Utc>) -> usize {
    let before = provider.authorized_devices.len();
    provider.authorized_devices.retain(|d| !is_expired(d, now));
    before - provider.authorized_devices.len()
}

/// A binding without a readable `bound_at` counts as expired.
fn is_expired(device: &DeviceRecord, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(&device.bound_at) {
        Ok(bound_at) => now - bound_at.with_timezone(&Utc) > Duration::hours(BINDING_HOURS),
        Err(_) => true,
    }
}

fn short_id(device_id: &str) -> &str {
    match device_id.char_indices().nth(8) {
        Some((end, _)) => &device_id[..end],
        None => device_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::env::{fixed_env, no_env};
    use std::fs;
    use tempfile::TempDir;

    const YAML: &str = r#"
active_provider: openai
providers:
  openai:
    type: openai_compatible
    api_key: sk-test
    base_url: http://x
    model: m
"#;

    fn setup() -> (TempDir, ProviderConfigService) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(Domain::Text.file_name()), YAML).unwrap();
        let svc = ProviderConfigService::with_env(dir.path(), no_env());
        (dir, svc)
    }

    fn record(id: &str, bound_at: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord {
            device_id: id.into(),
            device_name: id.into(),
            bound_at: bound_at.to_rfc3339(),
            last_used: bound_at.to_rfc3339(),
        }
    }

    #[test]
    fn no_bindings_means_open() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        assert_eq!(reg.validate("openai", "anything").unwrap(), Validation::BindingDisabled);
        assert!(reg.is_valid("openai", "anything").unwrap());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        assert_eq!(reg.validate("nope", "d").unwrap(), Validation::UnknownProvider);
        assert!(!reg.is_valid("nope", "d").unwrap());
        assert!(matches!(reg.bind("nope", "d", None), Err(DeviceError::UnknownProvider(_))));
    }

    #[test]
    fn bound_device_passes_and_others_fail() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        assert_eq!(reg.bind("openai", "device-a", Some("laptop")).unwrap(), BindOutcome::Bound);
        assert_eq!(reg.validate("openai", "device-a").unwrap(), Validation::Valid);
        assert_eq!(reg.validate("openai", "device-b").unwrap(), Validation::NotBound);

        let listed = reg.list("openai").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].device_name, "laptop");
    }

    #[test]
    fn rebinding_renews() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        reg.bind("openai", "device-a", None).unwrap();
        assert_eq!(reg.bind("openai", "device-a", Some("desk")).unwrap(), BindOutcome::Renewed);
        let listed = reg.list("openai").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].device_name, "desk");
    }

    #[test]
    fn default_names_are_numbered() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        reg.bind("openai", "a", None).unwrap();
        reg.bind("openai", "b", Some("  ")).unwrap();
        let names: Vec<_> = reg.list("openai").unwrap().into_iter().map(|d| d.device_name).collect();
        assert_eq!(names, vec!["设备 1", "设备 2"]);
    }

    #[test]
    fn limit_is_enforced() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        for i in 0..MAX_DEVICES_PER_KEY {
            reg.bind("openai", &format!("d{i}"), None).unwrap();
        }
        let err = reg.bind("openai", "one-too-many", None).unwrap_err();
        assert!(matches!(err, DeviceError::LimitReached { max: 5 }));
        // Existing devices can still renew at the limit.
        assert_eq!(reg.bind("openai", "d0", None).unwrap(), BindOutcome::Renewed);
    }

    #[test]
    fn expired_slots_are_reclaimed_on_bind() {
        let now = Utc::now();
        let mut provider = ProviderConfig::default();
        provider.authorized_devices = (0..MAX_DEVICES_PER_KEY)
            .map(|i| record(&format!("old{i}"), now - Duration::hours(30)))
            .collect();
        assert_eq!(bind_device(&mut provider, "new", None, now).unwrap(), BindOutcome::Bound);
        assert_eq!(provider.authorized_devices.len(), 1);
        assert_eq!(provider.authorized_devices[0].device_name, "设备 1");
    }

    #[test]
    fn expiry_is_24_hours_after_binding() {
        let now = Utc::now();
        let mut provider = ProviderConfig::default();
        provider.authorized_devices = vec![
            record("fresh", now - Duration::hours(23)),
            record("stale", now - Duration::hours(25)),
        ];
        assert_eq!(check_device(&provider, "fresh", now), Validation::Valid);
        assert_eq!(check_device(&provider, "stale", now), Validation::Expired);
        assert_eq!(purge_expired(&mut provider, now), 1);
        assert_eq!(provider.authorized_devices[0].device_id, "fresh");
    }

    #[test]
    fn unreadable_timestamp_counts_as_expired() {
        let now = Utc::now();
        let mut device = record("d", now);
        device.bound_at = "yesterday".into();
        assert!(is_expired(&device, now));
    }

    #[test]
    fn validation_updates_last_used() {
        let now = Utc::now();
        let mut provider = ProviderConfig::default();
        provider.authorized_devices = vec![record("d", now - Duration::hours(2))];
        touch_device(&mut provider, "d", now);
        assert_eq!(provider.authorized_devices[0].last_used, now.to_rfc3339());
        assert_eq!(provider.authorized_devices[0].bound_at, (now - Duration::hours(2)).to_rfc3339());
    }

    #[test]
    fn remove_unbinds() {
        let (_dir, svc) = setup();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        reg.bind("openai", "a", None).unwrap();
        reg.remove("openai", "a").unwrap();
        assert!(reg.list("openai").unwrap().is_empty());
        assert!(matches!(reg.remove("openai", "a"), Err(DeviceError::NotBound(_))));
    }

    #[test]
    fn bindings_persist_to_disk() {
        let (dir, svc) = setup();
        DeviceRegistry::new(&svc, Domain::Text).bind("openai", "a", None).unwrap();
        let raw = fs::read_to_string(dir.path().join(Domain::Text.file_name())).unwrap();
        assert!(raw.contains("authorized_devices"));
        assert!(raw.contains("device_id: a"));
    }

    fn setup_with_env_key() -> (TempDir, ProviderConfigService) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(Domain::Text.file_name()), YAML).unwrap();
        let svc = ProviderConfigService::with_env(dir.path(), fixed_env([("TEXT_API_KEY", "ENV-SECRET")]));
        (dir, svc)
    }

    #[test]
    fn env_provider_refuses_binding_and_leaves_file_alone() {
        let (dir, svc) = setup_with_env_key();
        let path = dir.path().join(Domain::Text.file_name());
        let before = fs::read_to_string(&path).unwrap();

        let active = svc.active_provider(Domain::Text).unwrap();
        assert_eq!(active, "gemini");
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        assert!(matches!(reg.bind(&active, "d", None), Err(DeviceError::EnvManaged(_))));
        assert!(matches!(reg.remove(&active, "d"), Err(DeviceError::EnvManaged(_))));
        assert_eq!(reg.validate(&active, "d").unwrap(), Validation::BindingDisabled);
        assert!(reg.list(&active).unwrap().is_empty());

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn file_provider_binds_under_env_override() {
        let (dir, svc) = setup_with_env_key();
        let reg = DeviceRegistry::new(&svc, Domain::Text);
        assert_eq!(reg.bind("openai", "d", Some("phone")).unwrap(), BindOutcome::Bound);

        let raw = fs::read_to_string(dir.path().join(Domain::Text.file_name())).unwrap();
        assert!(!raw.contains("ENV-SECRET"));
        assert!(raw.contains("sk-test"));
        assert!(raw.contains("device_id: d"));
        assert_eq!(reg.list("openai").unwrap().len(), 1);
        assert_eq!(reg.validate("openai", "d").unwrap(), Validation::Valid);
        // The effective config is still the env one.
        assert_eq!(svc.load(Domain::Text).unwrap().active_provider, "gemini");
    }

    #[test]
    fn short_id_truncates_on_char_boundary() {
        assert_eq!(short_id("abcdefghijkl"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("设备设备设备设备设备"), "设备设备设备设备");
    }
}
