//! Environment-variable provider overrides.
//!
//! When `TEXT_API_KEY` / `IMAGE_API_KEY` is set the whole domain is replaced by
//! a synthesized single-provider config and the YAML file is never read.
//! With `*_BASE_URL` the provider is an OpenAI-style custom endpoint named
//! `env_provider`; without it the provider is Google's, named `gemini`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::types::{Domain, ProviderConfig, ProviderKind, ProvidersConfig};

const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
const DEFAULT_TEMPERATURE: f32 = 1.0;
const DEFAULT_MAX_TOKENS: u32 = 8000;

/// Environment lookup used by the config service.
///
/// Production code reads the process environment; tests inject a map so they
/// never have to mutate global state.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by `std::env::var`.
pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

/// Lookup that never finds anything.
pub fn no_env() -> EnvLookup {
    Arc::new(|_| None)
}

/// Lookup backed by a fixed set of pairs.
pub fn fixed_env<I, K, V>(pairs: I) -> EnvLookup
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let map: BTreeMap<String, String> = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Arc::new(move |key| map.get(key).cloned())
}

fn var(env: &EnvLookup, domain: Domain, suffix: &str) -> Option<String> {
    env(&format!("{}{suffix}", domain.env_prefix()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether `domain`'s API key variable is set.
pub fn overrides(env: &EnvLookup, domain: Domain) -> bool {
    var(env, domain, "API_KEY").is_some()
}

/// Build the override config for `domain`, or `None` when its API key is unset.
pub fn from_env(env: &EnvLookup, domain: Domain) -> Option<ProvidersConfig> {
    let api_key = var(env, domain, "API_KEY")?;
    let base_url = var(env, domain, "BASE_URL");

    let (name, kind) = match (domain, base_url.is_some()) {
        (Domain::Text, true) => ("env_provider", ProviderKind::OpenAiCompatible),
        (Domain::Text, false) => ("gemini", ProviderKind::GoogleGemini),
        (Domain::Image, true) => ("env_provider", ProviderKind::ImageApi),
        (Domain::Image, false) => ("gemini", ProviderKind::GoogleGenai),
    };

    let mut provider = ProviderConfig {
        kind: Some(kind),
        api_key,
        base_url,
        ..Default::default()
    };

    match domain {
        Domain::Text => {
            provider.model = var(env, domain, "MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.into());
            provider.temperature = Some(parse_or(env, domain, "TEMPERATURE", DEFAULT_TEMPERATURE));
            provider.max_output_tokens = Some(parse_or(env, domain, "MAX_TOKENS", DEFAULT_MAX_TOKENS));
        }
        Domain::Image => {
            provider.model = var(env, domain, "MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.into());
            provider.high_concurrency =
                Some(var(env, domain, "HIGH_CONCURRENCY").as_deref() == Some("true"));
        }
    }

    info!(%domain, provider = name, "using provider config from environment");

    Some(ProvidersConfig {
        active_provider: name.to_string(),
        providers: BTreeMap::from([(name.to_string(), provider)]),
    })
}

fn parse_or<T: std::str::FromStr + Copy>(env: &EnvLookup, domain: Domain, suffix: &str, default: T) -> T {
    match var(env, domain, suffix) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(%domain, var = suffix, value = %raw, "unparseable env value, using default");
            default
        }),
        None => default,
    }
}
