//! Settings-page view of provider configs.
//!
//! Reading masks secrets; writing merges secrets. An update that leaves a
//! provider's `api_key` blank keeps whatever key is already stored under that
//! name, so the UI never has to round-trip real keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{ProviderConfig, ProvidersConfig};

/// Display-only fields the UI may echo back. Never persisted.
const TRANSIENT_FIELDS: [&str; 2] = ["api_key_masked", "api_key_env"];

/// Redact a secret for display: first 4 and last 4 characters survive.
/// Keys of 8 characters or fewer are fully masked.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let len = chars.len();
    if len == 0 {
        return String::new();
    }
    if len <= 8 {
        return "*".repeat(len);
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(len - 8))
}

// ── Read side ─────────────────────────────────────────────────────────────────

/// One provider as shown on the settings page.
#[derive(Debug, Clone, Serialize)]
pub struct MaskedProvider {
    #[serde(flatten)]
    pub config: ProviderConfig,
    pub api_key_masked: String,
}

/// A whole domain as shown on the settings page.
#[derive(Debug, Clone, Serialize)]
pub struct MaskedProviders {
    pub active_provider: String,
    pub providers: BTreeMap<String, MaskedProvider>,
}

/// Blank every `api_key`, attach its masked form and hide device bindings.
pub fn masked_view(config: &ProvidersConfig) -> MaskedProviders {
    let providers = config
        .providers
        .iter()
        .map(|(name, provider)| {
            let mut shown = provider.clone();
            let api_key_masked = mask_api_key(&shown.api_key);
            shown.api_key.clear();
            shown.authorized_devices.clear();
            (name.clone(), MaskedProvider { config: shown, api_key_masked })
        })
        .collect();

    MaskedProviders {
        active_provider: config.active_provider.clone(),
        providers,
    }
}

// ── Write side ────────────────────────────────────────────────────────────────

/// Body of one domain in `POST /api/config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersUpdate {
    #[serde(default)]
    pub active_provider: Option<String>,
    #[serde(default)]
    pub providers: Option<BTreeMap<String, ProviderConfig>>,
}

/// Apply `update` on top of `existing`.
///
/// The incoming provider map replaces the stored one wholesale (deleting a
/// provider in the UI deletes it here), except that blank secrets and absent
/// device lists are carried over from the stored entry of the same name.
pub fn merge_update(mut existing: ProvidersConfig, update: ProvidersUpdate) -> ProvidersConfig {
    if let Some(active) = update.active_provider.filter(|a| !a.trim().is_empty()) {
        existing.active_provider = active;
    }

    if let Some(incoming) = update.providers {
        let mut merged = BTreeMap::new();
        for (name, mut provider) in incoming {
            strip_transient(&mut provider);
            if let Some(stored) = existing.providers.get(&name) {
                if provider.api_key.trim().is_empty() {
                    provider.api_key = stored.api_key.clone();
                }
                if provider.authorized_devices.is_empty() {
                    provider.authorized_devices = stored.authorized_devices.clone();
                }
            }
            merged.insert(name, provider);
        }
        existing.providers = merged;
    }

    existing
}

fn strip_transient(provider: &mut ProviderConfig) {
    for field in TRANSIENT_FIELDS {
        provider.extra.remove(field);
    }
}
