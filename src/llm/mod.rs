//! Text generation client.
//!
//! `LlmProvider` is an enum over the two wire formats the backend speaks:
//! OpenAI-style chat completions and Google's `generateContent`. Callers hand
//! it a [`TextRequest`] and get the reply text back; wire types stay private
//! to each provider module.
//!
//! Failures are classified at the source into [`ProviderError`] variants so
//! the outline layer can map them to user-facing hints without parsing text.

pub mod providers;

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Fixed per-request timeout for every provider call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rejected credentials (401/403) or no key configured.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Unknown model or endpoint (404).
    #[error("model unavailable: {0}")]
    Model(String),
    /// Rate limited or out of quota (429).
    #[error("quota exceeded: {0}")]
    Quota(String),
    /// Transport failure: timeout, refused connection, DNS.
    #[error("network error: {0}")]
    Network(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status with the provider's message.
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::Auth(message),
            404 => ProviderError::Model(message),
            429 => ProviderError::Quota(message),
            _ => ProviderError::Request(message),
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ProviderError::Network(e.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// One text generation call.
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Reference image bytes, already compressed; providers only encode them.
    pub images: Vec<Vec<u8>>,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Gemini(providers::gemini::GeminiProvider),
}

impl LlmProvider {
    /// Send `request` and return the reply text.
    pub async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.generate_text(request).await,
            LlmProvider::Gemini(p) => p.generate_text(request).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAiCompatible(_) => "openai_compatible",
            LlmProvider::Gemini(_) => "gemini",
        }
    }
}

/// Shared HTTP client construction.
pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))
}
