//! Selection of the decision collaborator.
//!
//! An LLM backend when one is configured, the offline stub otherwise.

use avatar_core::config::LlmConfig;
use avatar_core::decision::{DecisionError, DecisionSource, StubDecisionSource};
use avatar_types::{Decision, DecisionContext};
use tracing::{info, warn};

use crate::llm::{LlmDecisionSource, create_backend};

/// The decision collaborator used by the multiplexer.
#[derive(Debug)]
pub enum Brain {
    /// Canned replies, no network.
    Stub(StubDecisionSource),
    /// LLM over HTTP.
    Llm(LlmDecisionSource),
}

impl Brain {
    /// Build from configuration, falling back to the stub when the backend
    /// is missing or unknown.
    pub fn from_config(config: &LlmConfig) -> Self {
        if !config.is_configured() {
            info!("no LLM backend configured, using stub decisions");
            return Self::Stub(StubDecisionSource::new());
        }
        match create_backend(config) {
            Ok(backend) => {
                info!(
                    backend = backend.name(),
                    model = %config.model,
                    "LLM backend configured"
                );
                Self::Llm(LlmDecisionSource::new(backend, config.persona.clone()))
            }
            Err(e) => {
                warn!(error = %e, "LLM backend unavailable, using stub decisions");
                Self::Stub(StubDecisionSource::new())
            }
        }
    }

    /// Name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Stub(_) => "stub",
            Self::Llm(source) => source.backend().name(),
        }
    }
}

impl DecisionSource for Brain {
    async fn decide(&self, context: &DecisionContext) -> Result<Decision, DecisionError> {
        match self {
            Self::Stub(source) => source.decide(context).await,
            Self::Llm(source) => source.decide(context).await,
        }
    }
}
