//! RedInk backend: outline generation for Xiaohongshu-style posts, a simulated
//! image generation stream, and per-domain provider configuration with
//! device binding.
//!
//! - **core**: config loading and the application error.
//! - **bootstrap**: logger initialisation.
//! - **providers**: YAML provider files, env fallback, masking, device bindings.
//! - **llm**: text generation clients (OpenAI-compatible, Gemini).
//! - **outline**: prompt building, page parsing, failure classification.
//! - **imaging**: reference image compression and base64 helpers.
//! - **server**: axum router for the `/api/*` endpoints.

pub mod bootstrap;
pub mod core;
pub mod imaging;
pub mod llm;
pub mod outline;
pub mod providers;
pub mod server;

pub use crate::core::{config, error};
