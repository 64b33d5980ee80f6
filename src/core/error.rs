//! Application-wide error types.
//!
//! Startup and server lifecycle failures. Request-level failures have their
//! own enums (`providers::ConfigError`, `llm::ProviderError`) and are turned
//! into JSON at the HTTP boundary instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
