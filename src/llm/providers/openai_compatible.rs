//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Covers OpenAI itself and any hosted or local server exposing the same
//! endpoint. Reference images travel as `image_url` content parts carrying
//! `data:` URLs. All wire types are private to this module.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::imaging;
use crate::llm::{ProviderError, TextRequest, http_client};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const CHAT_PATH: &str = "/v1/chat/completions";

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Cheap to clone: `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: String, base_url: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client()?,
            endpoint: chat_endpoint(base_url),
            api_key,
        })
    }

    /// One chat round-trip with a single user message.
    pub async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let payload = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![Message {
                role: "user",
                content: build_content(&request.prompt, &request.images),
            }],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        };

        debug!(
            endpoint = %self.endpoint,
            model = %payload.model,
            temperature = payload.temperature,
            max_tokens = payload.max_tokens,
            images = request.images.len(),
            prompt_len = request.prompt.len(),
            "sending chat completion request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full chat completion payload");
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "chat completion request failed (transport)");
                ProviderError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize chat completion response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received chat completion response");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))
    }
}

/// `base_url` with a trailing `/` and `/v1` removed, plus the chat path.
fn chat_endpoint(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim();
    let base = base.trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}{CHAT_PATH}")
}

fn build_content(prompt: &str, images: &[Vec<u8>]) -> MessageContent {
    if images.is_empty() {
        return MessageContent::Text(prompt.to_string());
    }

    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(ContentPart::Text { text: prompt.to_string() });
    for image in images {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: imaging::data_url(image),
            },
        });
    }
    MessageContent::Parts(parts)
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Return the response if successful, otherwise a classified error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => {
            let code = env
                .error
                .code
                .map(|v| match v {
                    serde_json::Value::String(s) => format!(" [code={s}]"),
                    other => format!(" [code={other}]"),
                })
                .unwrap_or_default();
            format!("HTTP {status}{code}: {}", env.error.message)
        }
        Err(_) => format!("HTTP {status}: {body}"),
    };

    error!(%status, %message, "chat completion returned HTTP error");
    Err(ProviderError::from_status(status, message))
}
