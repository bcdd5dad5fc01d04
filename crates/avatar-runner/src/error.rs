//! Error types for the avatar runner.
//!
//! Uses `thiserror` for typed errors that surface while wiring the process
//! together: configuration, LLM calls and response parsing.

use avatar_core::config::ConfigError;

/// Errors that can occur during runner operation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration is invalid or unreadable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The configured LLM backend name is not supported.
    #[error("unknown LLM backend: {0}")]
    UnknownBackend(String),

    /// An LLM backend returned an error or was unreachable.
    #[error("LLM backend error: {0}")]
    LlmBackend(String),

    /// The LLM response could not be parsed into a decision.
    #[error("response parse error: {0}")]
    Parse(String),
}
