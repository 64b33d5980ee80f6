//! Outline generation.
//!
//! Topic (plus optional reference images) → prompt → active text provider →
//! raw outline text → typed pages. The provider is resolved on every call so
//! a config saved from the settings page takes effect immediately.

pub mod classify;
pub mod parse;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::imaging;
use crate::llm::{self, ProviderError, TextRequest};
use crate::providers::{ConfigError, Domain, ProviderConfigService};

pub use classify::FailureKind;
pub use parse::{Page, PageType, parse_outline};

const OUTLINE_PROMPT: &str = include_str!("../../config/prompts/outline_prompt.txt");

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f32 = 1.0;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8000;

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Body of a `/api/outline` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<Page>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutlineResult {
    fn ok(outline: String, pages: Vec<Page>, has_images: bool) -> Self {
        Self {
            success: true,
            outline: Some(outline),
            pages: Some(pages),
            has_images: Some(has_images),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outline: None,
            pages: None,
            has_images: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone)]
pub struct OutlineService {
    providers: Arc<ProviderConfigService>,
}

impl OutlineService {
    pub fn new(providers: Arc<ProviderConfigService>) -> Self {
        Self { providers }
    }

    /// Generate an outline. Never errors: failures come back as
    /// `success: false` with a classified, user-readable message.
    pub async fn generate_outline(&self, topic: &str, images: Vec<Vec<u8>>) -> OutlineResult {
        let topic = topic.trim();
        if topic.is_empty() {
            return OutlineResult::failure("invalid parameter: topic must not be empty");
        }

        let preview: String = topic.chars().take(50).collect();
        info!(topic = %preview, images = images.len(), "generating outline");

        let has_images = !images.is_empty();
        match self.run(topic, images).await {
            Ok(outline) => {
                let pages = parse_outline(&outline);
                info!(pages = pages.len(), "outline parsed");
                OutlineResult::ok(outline, pages, has_images)
            }
            Err(e) => {
                let detail = e.to_string();
                let kind = FailureKind::of(&e);
                error!(?kind, error = %detail, "outline generation failed");
                OutlineResult::failure(kind.describe(&detail))
            }
        }
    }

    async fn run(&self, topic: &str, images: Vec<Vec<u8>>) -> Result<String, OutlineError> {
        let (name, config) = self
            .providers
            .blocking(|svc| -> Result<_, ConfigError> {
                let name = svc.active_provider(Domain::Text)?;
                let config = svc.provider_config(Domain::Text, Some(&name))?;
                Ok((name, config))
            })
            .await?;
        let client = llm::providers::build(&name, &config)?;
        let images = imaging::compress_all(images, imaging::REFERENCE_IMAGE_MAX_KB)
            .await
            .map_err(|e| ProviderError::Request(format!("image compression task failed: {e}")))?;

        let request = TextRequest {
            prompt: build_prompt(topic, images.len()),
            model: Some(config.model.trim())
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_output_tokens: config
                .max_output_tokens
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            images,
        };

        info!(provider = %name, client = client.name(), model = %request.model, temperature = request.temperature, "calling text provider");
        let outline = client.generate_text(&request).await?;
        debug!(chars = outline.chars().count(), "provider returned outline");
        Ok(outline)
    }
}

/// Fill the template; mention reference images when there are any.
pub fn build_prompt(topic: &str, image_count: usize) -> String {
    let mut prompt = OUTLINE_PROMPT.replacen("{topic}", topic, 1);
    if image_count > 0 {
        prompt.push_str(&format!(
            "\n\n注意：用户提供了 {image_count} 张参考图片，请在生成大纲时考虑这些图片的内容和风格。"
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::env::no_env;
    use tempfile::TempDir;

    #[test]
    fn prompt_substitutes_topic() {
        let prompt = build_prompt("秋季穿搭", 0);
        assert!(prompt.contains("秋季穿搭"));
        assert!(!prompt.contains("{topic}"));
        assert!(!prompt.contains("参考图片"));
    }

    #[test]
    fn prompt_mentions_image_count() {
        let prompt = build_prompt("t", 3);
        assert!(prompt.ends_with("请在生成大纲时考虑这些图片的内容和风格。"));
        assert!(prompt.contains("用户提供了 3 张参考图片"));
    }

    #[tokio::test]
    async fn blank_topic_is_rejected_without_provider_call() {
        let dir = TempDir::new().unwrap();
        let svc = OutlineService::new(Arc::new(ProviderConfigService::with_env(dir.path(), no_env())));
        let result = svc.generate_outline("   ", Vec::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("topic"));
    }

    #[tokio::test]
    async fn config_errors_become_failures() {
        let dir = TempDir::new().unwrap();
        let svc = OutlineService::new(Arc::new(ProviderConfigService::with_env(dir.path(), no_env())));
        let result = svc.generate_outline("topic", Vec::new()).await;
        assert!(!result.success);
        assert!(result.pages.is_none());
        assert!(result.error.unwrap().contains("no text providers configured"));
    }

    #[test]
    fn failure_omits_absent_fields() {
        let json = serde_json::to_value(OutlineResult::failure("x")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "x"}));
    }
}
