//! Outline failure classification.
//!
//! Structured errors are mapped by variant. Anything that arrives as a plain
//! message (generic request failures, config errors without a dedicated
//! bucket) falls back to keyword matching on the message text.

use crate::llm::ProviderError;
use crate::providers::ConfigError;

use super::OutlineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    ModelAccess,
    Network,
    Quota,
    Unknown,
}

impl FailureKind {
    pub fn of(err: &OutlineError) -> Self {
        match err {
            OutlineError::Provider(ProviderError::Auth(_)) => FailureKind::Auth,
            OutlineError::Provider(ProviderError::Model(_)) => FailureKind::ModelAccess,
            OutlineError::Provider(ProviderError::Network(_)) => FailureKind::Network,
            OutlineError::Provider(ProviderError::Quota(_)) => FailureKind::Quota,
            OutlineError::Config(ConfigError::MissingApiKey { .. }) => FailureKind::Auth,
            other => Self::from_message(&other.to_string()),
        }
    }

    /// Keyword fallback, checked in bucket order.
    pub fn from_message(message: &str) -> Self {
        let m = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

        if has(&["api_key", "unauthorized", "401"]) {
            FailureKind::Auth
        } else if has(&["model", "404"]) {
            FailureKind::ModelAccess
        } else if has(&["timeout", "timed out", "connection", "连接"]) {
            FailureKind::Network
        } else if has(&["rate", "429", "quota"]) {
            FailureKind::Quota
        } else {
            FailureKind::Unknown
        }
    }

    /// Multi-line message for the UI, embedding `detail`.
    pub fn describe(self, detail: &str) -> String {
        match self {
            FailureKind::Auth => format!(
                "API authentication failed.\nDetail: {detail}\nPossible causes:\n\
                 1. The API key is invalid or expired\n\
                 2. The API key has no access to this model\n\
                 Fix: check and update the API key on the settings page"
            ),
            FailureKind::ModelAccess => format!(
                "Model access failed.\nDetail: {detail}\nPossible causes:\n\
                 1. The model name is wrong\n\
                 2. The account has no access to this model\n\
                 Fix: check the model name on the settings page"
            ),
            FailureKind::Network => format!(
                "Network connection failed.\nDetail: {detail}\nPossible causes:\n\
                 1. The network connection is unstable\n\
                 2. The provider API is temporarily unavailable\n\
                 Fix: check the network connection and retry later"
            ),
            FailureKind::Quota => format!(
                "API quota exceeded.\nDetail: {detail}\nPossible causes:\n\
                 1. Too many requests\n\
                 2. The account quota is used up\n\
                 Fix: wait for the quota to reset or upgrade the plan"
            ),
            FailureKind::Unknown => format!(
                "Outline generation failed.\nDetail: {detail}\n\
                 Fix: check the text provider configuration (text_providers.yaml)"
            ),
        }
    }
}
