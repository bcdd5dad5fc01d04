//! LLM backend abstraction and implementations.
//!
//! Enum dispatch over the supported HTTP APIs: OpenAI-compatible chat
//! completions (`OpenAI`, `DeepSeek`, Ollama) and the Anthropic Messages API.
//! All backends communicate over HTTP via `reqwest`.
//!
//! [`LlmDecisionSource`] turns a backend into a
//! [`DecisionSource`](avatar_core::decision::DecisionSource): render the
//! prompt, call the backend, parse the reply.

use avatar_core::config::LlmConfig;
use avatar_core::decision::{DecisionError, DecisionSource};
use avatar_types::{Decision, DecisionContext};
use tracing::debug;

use crate::error::RunnerError;
use crate::parse::parse_decision;
use crate::prompt::{RenderedPrompt, render};

/// Upper bound on generated tokens; replies are one short JSON object.
const MAX_TOKENS: u32 = 200;

// ---------------------------------------------------------------------------
// Unified backend enum
// ---------------------------------------------------------------------------

/// An LLM backend that can process a prompt and return a response.
#[derive(Debug)]
pub enum LlmBackend {
    /// OpenAI-compatible chat completions API.
    OpenAi(OpenAiBackend),
    /// Anthropic Messages API.
    Anthropic(AnthropicBackend),
}

impl LlmBackend {
    /// Send a prompt to the LLM and return the response text.
    pub async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, RunnerError> {
        match self {
            Self::OpenAi(backend) => backend.complete(prompt).await,
            Self::Anthropic(backend) => backend.complete(prompt).await,
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
        }
    }
}

/// Connection settings shared by every backend.
#[derive(Debug)]
struct Endpoint {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl Endpoint {
    fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    /// Send `body` through `request` and return the decoded JSON reply.
    async fn send_json(
        backend: &str,
        request: reqwest::RequestBuilder,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, RunnerError> {
        let response = request
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| RunnerError::LlmBackend(format!("{backend} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(RunnerError::LlmBackend(format!(
                "{backend} returned {status}: {error_body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RunnerError::LlmBackend(format!("{backend} response parse failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible backend
// ---------------------------------------------------------------------------

/// Backend for OpenAI-compatible chat completions APIs.
///
/// Sends requests to `{api_url}/chat/completions`.
#[derive(Debug)]
pub struct OpenAiBackend {
    endpoint: Endpoint,
}

impl OpenAiBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            endpoint: Endpoint::new(config),
        }
    }

    async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, RunnerError> {
        let endpoint = &self.endpoint;
        let url = format!("{}/chat/completions", endpoint.api_url);
        let body = serde_json::json!({
            "model": endpoint.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": endpoint.temperature,
            "max_tokens": MAX_TOKENS,
        });

        let request = endpoint
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", endpoint.api_key));
        let json = Endpoint::send_json("OpenAI", request, &body).await?;
        extract_openai_content(&json)
    }
}

/// Extract the text content from an `OpenAI` chat completions response.
fn extract_openai_content(json: &serde_json::Value) -> Result<String, RunnerError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            RunnerError::LlmBackend(
                "OpenAI response missing choices[0].message.content".to_owned(),
            )
        })
}

// ---------------------------------------------------------------------------
// Anthropic Messages API backend
// ---------------------------------------------------------------------------

/// Backend for the Anthropic Messages API.
///
/// Uses the `x-api-key` header, a top-level `system` field, and returns
/// text under `content[0].text`.
#[derive(Debug)]
pub struct AnthropicBackend {
    endpoint: Endpoint,
}

impl AnthropicBackend {
    /// Create a new Anthropic Messages API backend.
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            endpoint: Endpoint::new(config),
        }
    }

    async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, RunnerError> {
        let endpoint = &self.endpoint;
        let url = format!("{}/messages", endpoint.api_url);
        let body = serde_json::json!({
            "model": endpoint.model,
            "max_tokens": MAX_TOKENS,
            "temperature": endpoint.temperature,
            "system": prompt.system,
            "messages": [
                {"role": "user", "content": prompt.user}
            ]
        });

        let request = endpoint
            .client
            .post(&url)
            .header("x-api-key", &endpoint.api_key)
            .header("anthropic-version", "2023-06-01");
        let json = Endpoint::send_json("Anthropic", request, &body).await?;
        extract_anthropic_content(&json)
    }
}

/// Extract the text content from an Anthropic Messages API response.
fn extract_anthropic_content(json: &serde_json::Value) -> Result<String, RunnerError> {
    json.get("content")
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            RunnerError::LlmBackend("Anthropic response missing content[0].text".to_owned())
        })
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create an LLM backend from configuration.
///
/// `openai`, `deepseek` and `ollama` use the chat completions API;
/// `anthropic` uses the Messages API.
pub fn create_backend(config: &LlmConfig) -> Result<LlmBackend, RunnerError> {
    match config.backend.trim().to_lowercase().as_str() {
        "openai" | "deepseek" | "ollama" => Ok(LlmBackend::OpenAi(OpenAiBackend::new(config))),
        "anthropic" => Ok(LlmBackend::Anthropic(AnthropicBackend::new(config))),
        other => Err(RunnerError::UnknownBackend(other.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Decision source
// ---------------------------------------------------------------------------

/// Decision source backed by an LLM.
#[derive(Debug)]
pub struct LlmDecisionSource {
    backend: LlmBackend,
    persona: String,
}

impl LlmDecisionSource {
    /// Wrap `backend`, using `persona` as the system prompt.
    pub fn new(backend: LlmBackend, persona: impl Into<String>) -> Self {
        Self {
            backend,
            persona: persona.into(),
        }
    }

    /// The wrapped backend.
    pub const fn backend(&self) -> &LlmBackend {
        &self.backend
    }
}

impl DecisionSource for LlmDecisionSource {
    async fn decide(&self, context: &DecisionContext) -> Result<Decision, DecisionError> {
        let prompt = render(&self.persona, context);
        let reply = self
            .backend
            .complete(&prompt)
            .await
            .map_err(|e| DecisionError::Internal {
                message: e.to_string(),
            })?;
        debug!(backend = self.backend.name(), reply = %reply, "LLM reply");
        parse_decision(&reply).map_err(|e| DecisionError::Malformed {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: &str) -> LlmConfig {
        LlmConfig {
            backend: backend.to_owned(),
            api_url: "https://api.example.com/v1/".to_owned(),
            api_key: "test".to_owned(),
            model: "test-model".to_owned(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn extract_openai_content_valid() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "{\"type\": \"SAY\", \"value\": \"hi\"}"
                }
            }]
        });
        let result = extract_openai_content(&json);
        assert!(result.unwrap_or_default().contains("SAY"));
    }

    #[test]
    fn extract_openai_content_missing_choices() {
        let json = serde_json::json!({"error": "rate_limit"});
        assert!(extract_openai_content(&json).is_err());
    }

    #[test]
    fn extract_anthropic_content_valid() {
        let json = serde_json::json!({
            "content": [{
                "type": "text",
                "text": "{\"type\": \"IDLE\"}"
            }]
        });
        let result = extract_anthropic_content(&json);
        assert!(result.unwrap_or_default().contains("IDLE"));
    }

    #[test]
    fn extract_anthropic_content_missing() {
        let json = serde_json::json!({"content": []});
        assert!(extract_anthropic_content(&json).is_err());
    }

    #[test]
    fn create_backend_dispatches_correctly() {
        for name in ["openai", "DeepSeek", "ollama"] {
            let backend = create_backend(&config(name));
            assert!(matches!(backend, Ok(LlmBackend::OpenAi(_))), "{name}");
        }
        let anthropic = create_backend(&config("anthropic"));
        assert_eq!(anthropic.map(|b| b.name().to_owned()).unwrap_or_default(), "anthropic");

        assert!(matches!(
            create_backend(&config("carrier-pigeon")),
            Err(RunnerError::UnknownBackend(_))
        ));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let backend = OpenAiBackend::new(&config("openai"));
        assert_eq!(backend.endpoint.api_url, "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_internal_error() {
        let mut cfg = config("openai");
        cfg.api_url = "http://127.0.0.1:9".to_owned();
        let source = LlmDecisionSource::new(LlmBackend::OpenAi(OpenAiBackend::new(&cfg)), "persona");
        let result = source.decide(&DecisionContext::Autonomous).await;
        assert!(matches!(result, Err(DecisionError::Internal { .. })));
    }
}
