//! Provider configuration data model.
//!
//! These structs mirror the shape of `text_providers.yaml` /
//! `image_providers.yaml` one-to-one. Keys this crate does not know about are
//! kept in [`ProviderConfig::extra`] so a load → save round trip never drops
//! user data.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ── Domain ──────────────────────────────────────────────────────────────────

/// The two independent provider configuration domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Text,
    Image,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Text, Domain::Image];

    /// Backing YAML file name, relative to the providers directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Domain::Text => "text_providers.yaml",
            Domain::Image => "image_providers.yaml",
        }
    }

    /// Prefix of the environment variables that override this domain.
    pub fn env_prefix(self) -> &'static str {
        match self {
            Domain::Text => "TEXT_",
            Domain::Image => "IMAGE_",
        }
    }

    /// Provider name used when `active_provider` is unset.
    pub fn default_active_provider(self) -> &'static str {
        match self {
            Domain::Text => "google_gemini",
            Domain::Image => "google_genai",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Text => "text",
            Domain::Image => "image",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Provider kind ───────────────────────────────────────────────────────────

/// Wire-format family of a provider (`type:` in the YAML).
///
/// Unrecognised strings are carried as [`ProviderKind::Other`] and written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderKind {
    GoogleGemini,
    GoogleGenai,
    OpenAi,
    OpenAiCompatible,
    ImageApi,
    Other(String),
}

impl ProviderKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::GoogleGemini => "google_gemini",
            ProviderKind::GoogleGenai => "google_genai",
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::ImageApi => "image_api",
            ProviderKind::Other(s) => s,
        }
    }

    /// Kinds that talk to a user-supplied endpoint and therefore need `base_url`.
    pub fn requires_base_url(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible | ProviderKind::ImageApi
        )
    }

    /// Kinds served by Google's `generateContent` API.
    pub fn is_google(&self) -> bool {
        match self {
            ProviderKind::GoogleGemini | ProviderKind::GoogleGenai => true,
            ProviderKind::Other(s) => s == "gemini",
            _ => false,
        }
    }
}

impl From<String> for ProviderKind {
    fn from(s: String) -> Self {
        ProviderKind::from(s.as_str())
    }
}

impl From<&str> for ProviderKind {
    fn from(s: &str) -> Self {
        match s {
            "google_gemini" => ProviderKind::GoogleGemini,
            "google_genai" => ProviderKind::GoogleGenai,
            "openai" => ProviderKind::OpenAi,
            "openai_compatible" => ProviderKind::OpenAiCompatible,
            "image_api" => ProviderKind::ImageApi,
            other => ProviderKind::Other(other.to_string()),
        }
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Devices ─────────────────────────────────────────────────────────────────

/// One device authorised to use a provider's API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub device_name: String,
    /// RFC 3339 timestamp of the (last renewed) binding.
    #[serde(default, deserialize_with = "null_as_default")]
    pub bound_at: String,
    /// RFC 3339 timestamp of the last successful validation.
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_used: String,
}

// ── Provider config ─────────────────────────────────────────────────────────

/// A single named provider entry.
///
/// Text providers use `temperature` / `max_output_tokens`; image providers use
/// `high_concurrency`, `default_aspect_ratio`, `default_size`, `quality` and
/// `short_prompt`. Both share one struct so either file parses with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_concurrency: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_prompt: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub authorized_devices: Vec<DeviceRecord>,
    /// Any other keys found in the file.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ProviderConfig {
    /// The declared `type`, or the provider name when no type is declared.
    pub fn effective_kind(&self, name: &str) -> ProviderKind {
        self.kind.clone().unwrap_or_else(|| ProviderKind::from(name))
    }

    /// `base_url` with surrounding whitespace removed, `None` when blank.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Contents of one provider YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub active_provider: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl ProvidersConfig {
    /// Empty config whose active provider is the domain default.
    pub fn empty(domain: Domain) -> Self {
        Self {
            active_provider: domain.default_active_provider().to_string(),
            providers: BTreeMap::new(),
        }
    }

    /// Sorted provider names.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// A key written without a value (`api_key:`) reads as null; treat it like an
/// absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
