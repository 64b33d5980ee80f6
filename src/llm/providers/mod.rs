//! LLM provider implementations.
//!
//! `build(name, config)` is the factory, called per request with the freshly
//! resolved provider config. Adding a backend = new module + new match arm.

pub mod gemini;
pub mod openai_compatible;

use tracing::debug;

use crate::llm::{LlmProvider, ProviderError};
use crate::providers::{ProviderConfig, ProviderKind};

/// Construct the client for the provider named `name`.
///
/// Google kinds speak `generateContent`; everything else, including untyped
/// entries, is treated as an OpenAI-compatible endpoint.
pub fn build(name: &str, config: &ProviderConfig) -> Result<LlmProvider, ProviderError> {
    let api_key = config.api_key.trim();
    if api_key.is_empty() {
        return Err(ProviderError::Auth(format!("provider {name} has no api_key configured")));
    }

    let kind = config.effective_kind(name);
    debug!(provider = name, %kind, base_url = ?config.base_url(), "building LLM client");

    let provider = if kind.is_google() {
        LlmProvider::Gemini(gemini::GeminiProvider::new(api_key.to_string(), config.base_url())?)
    } else {
        if !matches!(kind, ProviderKind::OpenAi | ProviderKind::OpenAiCompatible) {
            debug!(provider = name, %kind, "treating provider as OpenAI-compatible");
        }
        LlmProvider::OpenAiCompatible(openai_compatible::OpenAiCompatibleProvider::new(
            api_key.to_string(),
            config.base_url(),
        )?)
    };
    Ok(provider)
}
