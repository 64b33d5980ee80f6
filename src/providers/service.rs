//! Provider configuration resolution.
//!
//! Precedence per domain, evaluated on every cache miss:
//!
//! ```text
//! 1. cached config            (until save / reload)
//! 2. *_API_KEY env override   (cached; the file is never opened)
//! 3. <providers_dir>/<domain>_providers.yaml
//! 4. empty default            (file absent)
//! ```
//!
//! A malformed file is an error, never a partial config. The service is
//! constructed once and shared as `Arc<ProviderConfigService>`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use super::env::{self, EnvLookup};
use super::store::{self, ProvidersUpdate};
use super::types::{Domain, ProviderConfig, ProvidersConfig};
use super::ConfigError;

pub struct ProviderConfigService {
    providers_dir: PathBuf,
    env: EnvLookup,
    text: Mutex<Option<ProvidersConfig>>,
    image: Mutex<Option<ProvidersConfig>>,
}

impl ProviderConfigService {
    /// Service reading the process environment.
    pub fn new(providers_dir: impl Into<PathBuf>) -> Self {
        Self::with_env(providers_dir, env::process_env())
    }

    /// Service with an explicit environment lookup (tests).
    pub fn with_env(providers_dir: impl Into<PathBuf>, env: EnvLookup) -> Self {
        Self {
            providers_dir: providers_dir.into(),
            env,
            text: Mutex::new(None),
            image: Mutex::new(None),
        }
    }

    /// Path of the backing YAML file for `domain`.
    pub fn path(&self, domain: Domain) -> PathBuf {
        self.providers_dir.join(domain.file_name())
    }

    fn slot(&self, domain: Domain) -> MutexGuard<'_, Option<ProvidersConfig>> {
        let slot = match domain {
            Domain::Text => &self.text,
            Domain::Image => &self.image,
        };
        // A poisoned slot only ever holds a fully built config or None.
        slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the effective config for `domain`.
    pub fn load(&self, domain: Domain) -> Result<ProvidersConfig, ConfigError> {
        if let Some(cached) = self.slot(domain).as_ref() {
            return Ok(cached.clone());
        }

        let resolved = match env::from_env(&self.env, domain) {
            Some(cfg) => cfg,
            None => read_file(&self.path(domain), domain)?,
        };

        *self.slot(domain) = Some(resolved.clone());
        Ok(resolved)
    }

    /// The domain's file on its own, ignoring env overrides and the cache.
    ///
    /// Anything that edits and saves a config starts from here, so a
    /// synthesized env provider never lands on disk.
    pub fn load_file(&self, domain: Domain) -> Result<ProvidersConfig, ConfigError> {
        read_file(&self.path(domain), domain)
    }

    /// Whether `*_API_KEY` replaces the file for `domain`.
    pub fn env_override_active(&self, domain: Domain) -> bool {
        env::overrides(&self.env, domain)
    }

    /// Run `f` against the service on tokio's blocking pool.
    pub async fn blocking<T, E, F>(self: &Arc<Self>, f: F) -> Result<T, E>
    where
        F: FnOnce(&ProviderConfigService) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<ConfigError> + Send + 'static,
    {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| E::from(ConfigError::Task(e.to_string())))?
    }

    /// Name of the active provider, falling back to the domain default.
    pub fn active_provider(&self, domain: Domain) -> Result<String, ConfigError> {
        let cfg = self.load(domain)?;
        let active = if cfg.active_provider.trim().is_empty() {
            domain.default_active_provider().to_string()
        } else {
            cfg.active_provider
        };
        debug!(%domain, %active, "active provider");
        Ok(active)
    }

    /// Validated config for provider `name`, or for the active provider.
    pub fn provider_config(&self, domain: Domain, name: Option<&str>) -> Result<ProviderConfig, ConfigError> {
        let cfg = self.load(domain)?;
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => self.active_provider(domain)?,
        };

        info!(%domain, provider = %name, "resolving provider config");
        validate(domain, &cfg, &name).cloned()
    }

    /// Write `config` to the domain's file and drop the cached copy.
    pub fn save(&self, domain: Domain, config: &ProvidersConfig) -> Result<(), ConfigError> {
        let path = self.path(domain);
        let write_err = |detail: String| ConfigError::Write {
            file: path.display().to_string(),
            detail,
        };

        let yaml = serde_yaml::to_string(config).map_err(|e| write_err(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        fs::write(&path, yaml).map_err(|e| {
            error!(%domain, path = %path.display(), error = %e, "failed to save provider config");
            write_err(e.to_string())
        })?;

        *self.slot(domain) = None;
        info!(%domain, path = %path.display(), providers = config.providers.len(), "provider config saved");
        Ok(())
    }

    /// Merge a settings-page update into the stored file and save it.
    pub fn apply_update(&self, domain: Domain, update: ProvidersUpdate) -> Result<(), ConfigError> {
        let existing = self.load_file(domain)?;
        let merged = store::merge_update(existing, update);
        self.save(domain, &merged)
    }

    /// Drop both cached configs; the next access re-resolves from env / disk.
    pub fn reload(&self) {
        info!("reloading provider configs");
        for domain in Domain::ALL {
            *self.slot(domain) = None;
        }
    }
}

/// Validation order: empty map, unknown name, api key, base url.
fn validate<'a>(domain: Domain, cfg: &'a ProvidersConfig, name: &str) -> Result<&'a ProviderConfig, ConfigError> {
    if cfg.providers.is_empty() {
        return Err(ConfigError::NoProviders {
            domain,
            file: domain.file_name(),
        });
    }

    let Some(provider) = cfg.providers.get(name) else {
        let available = cfg.provider_names();
        error!(%domain, provider = %name, available = %available.join(", "), "provider not found");
        return Err(ConfigError::ProviderNotFound {
            domain,
            name: name.to_string(),
            available,
        });
    };

    if provider.api_key.trim().is_empty() {
        error!(%domain, provider = %name, "provider has no api_key");
        return Err(ConfigError::MissingApiKey { name: name.to_string() });
    }

    let kind = provider.effective_kind(name);
    if kind.requires_base_url() && provider.base_url().is_none() {
        error!(%domain, provider = %name, %kind, "provider has no base_url");
        return Err(ConfigError::MissingBaseUrl {
            name: name.to_string(),
            kind,
        });
    }

    Ok(provider)
}

fn read_file(path: &Path, domain: Domain) -> Result<ProvidersConfig, ConfigError> {
    debug!(%domain, path = %path.display(), "loading provider config");

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(%domain, path = %path.display(), "provider config not found, using defaults");
            return Ok(ProvidersConfig::empty(domain));
        }
        Err(e) => {
            return Err(ConfigError::Malformed {
                file: path.display().to_string(),
                detail: format!("cannot read: {e}"),
            });
        }
    };

    parse(&raw, domain).map_err(|detail| {
        error!(%domain, path = %path.display(), %detail, "provider config YAML parse failed");
        ConfigError::Malformed {
            file: path.display().to_string(),
            detail,
        }
    })
}

/// Parse a provider file. An empty or `null` document yields the default.
fn parse(raw: &str, domain: Domain) -> Result<ProvidersConfig, String> {
    let value: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
    if value.is_null() {
        return Ok(ProvidersConfig::empty(domain));
    }
    let cfg: ProvidersConfig = serde_yaml::from_value(value).map_err(|e| e.to_string())?;
    debug!(%domain, providers = %cfg.provider_names().join(", "), "provider config loaded");
    Ok(cfg)
}
