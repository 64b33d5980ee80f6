//! Provider configuration: the text and image provider YAML files.
//!
//! - **types**: serde model of one provider file (`ProvidersConfig`).
//! - **env**: `TEXT_*` / `IMAGE_*` environment overrides.
//! - **service**: [`ProviderConfigService`]: cached resolution, validation,
//!   save and reload.
//! - **store**: secret masking and merge-on-update for the settings API.
//! - **devices**: per-provider device bindings.

pub mod devices;
pub mod env;
pub mod service;
pub mod store;
pub mod types;

use thiserror::Error;

pub use service::ProviderConfigService;
pub use types::{DeviceRecord, Domain, ProviderConfig, ProviderKind, ProvidersConfig};

// ── Error ─────────────────────────────────────────────────────────────────────

/// Failures resolving or persisting provider configuration.
///
/// Every message ends with a hint the settings UI can show as-is.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config file {file}: {detail}\nfix: check YAML indentation and syntax")]
    Malformed { file: String, detail: String },

    #[error("no {domain} providers configured\nfix: add a provider on the settings page or edit {file}")]
    NoProviders { domain: Domain, file: &'static str },

    #[error(
        "{domain} provider not found: {name}\navailable providers: {}\nfix: select an existing provider or add this one on the settings page",
        available_list(.available)
    )]
    ProviderNotFound {
        domain: Domain,
        name: String,
        available: Vec<String>,
    },

    #[error("provider {name} has no api_key configured\nfix: edit the provider on the settings page and fill in the API key")]
    MissingApiKey { name: String },

    #[error("provider {name} has no base_url configured (type {kind} requires one)\nfix: edit the provider on the settings page and fill in the base URL")]
    MissingBaseUrl { name: String, kind: ProviderKind },

    #[error("failed to save config {file}: {detail}")]
    Write { file: String, detail: String },

    #[error("config task failed: {0}")]
    Task(String),
}

fn available_list(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_available() {
        let e = ConfigError::ProviderNotFound {
            domain: Domain::Text,
            name: "missing".into(),
            available: vec!["a".into(), "b".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("a, b"));
    }

    #[test]
    fn missing_api_key_mentions_field() {
        let e = ConfigError::MissingApiKey { name: "openai".into() };
        assert!(e.to_string().contains("api_key"));
    }

    #[test]
    fn malformed_carries_diagnostic() {
        let e = ConfigError::Malformed {
            file: "text_providers.yaml".into(),
            detail: "did not find expected key at line 3".into(),
        };
        assert!(e.to_string().contains("line 3"));
    }
}
